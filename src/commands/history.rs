use crate::db::HistoryStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};

/// 打印最近的会话记录
pub async fn run(peer: Option<&str>, limit: u32, show_conflicts: bool) -> Result<()> {
    let path = HistoryStore::default_path();
    let history = HistoryStore::open(&path)
        .await
        .with_context(|| format!("打开同步历史 {:?} 失败", path))?;

    let sessions = history.recent_sessions(peer, limit).await?;
    if sessions.is_empty() {
        println!("暂无同步记录");
    }

    for session in &sessions {
        let started = DateTime::<Utc>::from_timestamp(session.start_time, 0)
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "#{:<5} {} {:<16} {:<9} 上传 {} 下载 {} 删除 {} 失败 {}{}",
            session.id,
            started,
            session.peer,
            session.status,
            session.files_pushed,
            session.files_fetched,
            session.files_deleted_remote + session.files_deleted_local,
            session.files_failed,
            if session.committed { "" } else { " (未提交)" }
        );
        if let Some(message) = &session.error_message {
            println!("       {}", message);
        }
        if show_conflicts {
            for conflict in history.conflicts(session.id).await? {
                println!("       冲突 {} -> {}", conflict.path, conflict.winner);
            }
        }
    }

    history.close().await;
    Ok(())
}
