//! 命令行子命令的实现

pub mod history;
pub mod plan;
pub mod serve;
pub mod sync;

use crate::db::HistoryStore;
use tracing::warn;

/// 打开默认的同步历史；失败时只记录警告，不影响同步
pub(crate) async fn open_history() -> Option<HistoryStore> {
    let path = HistoryStore::default_path();
    match HistoryStore::open(&path).await {
        Ok(history) => Some(history),
        Err(e) => {
            warn!("无法打开同步历史 {:?}: {}", path, e);
            None
        }
    }
}
