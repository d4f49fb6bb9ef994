use crate::config::AppConfig;
use crate::core::{NoOpReason, SyncAction, SyncEngine};
use anyhow::Result;

/// 演练：打印将要执行的动作，不做任何修改
pub async fn run(config: &AppConfig, peer_name: &str, show_all: bool) -> Result<()> {
    let peers = config.select_peers(&[peer_name.to_string()])?;
    let engine = SyncEngine::new(config.sync.clone());

    for peer in &peers {
        let plan = engine.plan(peer).await?;

        for action in &plan.actions {
            let identical = matches!(
                action,
                SyncAction::NoOp {
                    reason: NoOpReason::Identical,
                    ..
                }
            );
            if identical && !show_all {
                continue;
            }
            match action.conflict() {
                Some(info) => println!(
                    "{}  [冲突 本地 {:?} / 远程 {:?}]",
                    action, info.local_modified, info.remote_modified
                ),
                None => println!("{}", action),
            }
        }

        let s = &plan.summary;
        println!(
            "\n{}: 上传 {}, 下载 {}, 删除远程 {}, 删除本地 {}, 相同 {}, 只读跳过 {}, 无权限 {}, 新增删除记录 {}",
            plan.peer,
            s.push_count,
            s.fetch_count,
            s.delete_remote_count,
            s.delete_local_count,
            s.identical_count,
            s.read_only_skipped,
            s.denied_count,
            plan.new_tombstones.len()
        );
    }
    Ok(())
}
