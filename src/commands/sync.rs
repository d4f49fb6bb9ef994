use crate::config::AppConfig;
use crate::core::SyncEngine;
use anyhow::Result;

/// 与选定的对端（默认全部）同步，返回是否全部成功
pub async fn run(config: &AppConfig, peer_names: &[String]) -> Result<bool> {
    let peers = config.select_peers(peer_names)?;
    if peers.is_empty() {
        anyhow::bail!("没有配置任何对端，请编辑 {}", AppConfig::default_path().display());
    }

    let mut engine = SyncEngine::new(config.sync.clone());
    if let Some(history) = super::open_history().await {
        engine = engine.with_history(history);
    }

    let outcomes = engine.run_all(&peers).await;

    let mut all_ok = true;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                println!(
                    "{:<16} {:<9} 上传 {} 下载 {} 删除远程 {} 删除本地 {} 跳过 {} 冲突 {} 失败 {}",
                    outcome.peer,
                    report.status.to_string(),
                    report.files_pushed,
                    report.files_fetched,
                    report.files_deleted_remote,
                    report.files_deleted_local,
                    report.files_skipped,
                    report.conflicts.len(),
                    report.failures.len()
                );
                for failure in &report.failures {
                    println!("    {} {}: {}", failure.action, failure.path, failure.error);
                }
                all_ok &= report.is_success();
            }
            Err(e) => {
                println!("{:<16} {:<9} {}", outcome.peer, "error", e);
                all_ok = false;
            }
        }
    }

    if let Some(history) = engine.history() {
        history.close().await;
    }

    Ok(all_ok)
}
