//! 删除检测：对比上次提交的快照与本次扫描结果，记录本副本主动删除的文件

use crate::core::file_state::StateStore;
use crate::core::snapshot::{Snapshot, StoredSnapshot, TombstoneSet};
use crate::error::SyncError;
use tracing::{debug, info};

/// 上次快照中存在、本次扫描中消失的文件（保留删除前的指纹）
pub fn detect_local_deletions(stored: &StoredSnapshot, current: &Snapshot) -> TombstoneSet {
    stored
        .iter()
        .filter(|(path, _)| !current.contains(path))
        .map(|(path, fingerprint)| (path.clone(), *fingerprint))
        .collect()
}

/// 合并删除记录，同一路径以新检测到的为准；从不移除已有记录
pub fn merge(existing: &TombstoneSet, delta: &TombstoneSet) -> TombstoneSet {
    let mut merged = existing.clone();
    merged.extend(delta.iter().map(|(path, fp)| (path.clone(), *fp)));
    merged
}

/// 一次检测的结果
#[derive(Debug, Clone, Default)]
pub struct TrackedState {
    /// 上次提交的快照
    pub stored: StoredSnapshot,
    /// 本次新检测到的删除
    pub delta: TombstoneSet,
    /// 合并后的全部删除记录（尚未持久化）
    pub tombstones: TombstoneSet,
}

/// 删除记录跟踪器，客户端会话与服务端刷新共用
#[derive(Debug, Clone)]
pub struct TombstoneTracker {
    store: StateStore,
}

impl TombstoneTracker {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// 读取已有记录并与当前扫描结果比较
    pub async fn track(&self, current: &Snapshot) -> Result<TrackedState, SyncError> {
        let stored = self.store.load_snapshot().await?;
        let existing = self.store.load_tombstones().await?;

        let delta = detect_local_deletions(&stored, current);
        if delta.is_empty() {
            debug!("未检测到本地删除");
        } else {
            info!("检测到 {} 个本地删除", delta.len());
            for path in delta.keys() {
                debug!("  删除: {}", path);
            }
        }

        let tombstones = merge(&existing, &delta);
        Ok(TrackedState {
            stored,
            delta,
            tombstones,
        })
    }
}
