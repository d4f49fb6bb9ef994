//! 服务端角色：维护本副本自己的快照与删除记录，供对端会话读取
//!
//! 目录本身由外部 FTP / WebDAV 服务提供给对端访问，这里只负责刷新 `.sync/` 下的记录。

use crate::core::file_state::StateStore;
use crate::core::scanner::FileScanner;
use crate::core::snapshot::STATE_DIR;
use crate::core::tombstone::TombstoneTracker;
use crate::error::SyncError;
use notify::{EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 一次刷新的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub files: usize,
    pub bytes_hashed: u64,
    pub new_tombstones: usize,
    pub total_tombstones: usize,
    pub duration_ms: u64,
}

/// 状态维护者
pub struct StateKeeper {
    root: PathBuf,
    scanner: FileScanner,
    tracker: TombstoneTracker,
}

impl StateKeeper {
    pub fn new(root: impl AsRef<Path>, hash_workers: usize) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            scanner: FileScanner::new(hash_workers),
            tracker: TombstoneTracker::new(StateStore::open(&root)),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 扫描目录、检测删除并提交记录（与客户端使用同一套删除检测规则）
    pub async fn refresh(&self) -> Result<RefreshReport, SyncError> {
        let started = Instant::now();

        let scan = self.scanner.compute_snapshot(&self.root).await?;
        let tracked = self.tracker.track(&scan.snapshot).await?;
        self.tracker
            .store()
            .commit(&scan.snapshot, &tracked.tombstones)
            .await?;

        let report = RefreshReport {
            files: scan.snapshot.len(),
            bytes_hashed: scan.bytes_hashed,
            new_tombstones: tracked.delta.len(),
            total_tombstones: tracked.tombstones.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "状态已刷新: {} 个文件, 新增 {} 条删除记录, 耗时 {}ms",
            report.files, report.new_tombstones, report.duration_ms
        );
        Ok(report)
    }

    /// 先刷新一次，之后每当目录变化并静默 `debounce` 后再刷新，直到 Ctrl-C
    pub async fn watch(&self, debounce: Duration) -> Result<(), SyncError> {
        self.refresh().await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| SyncError::Watch(e.to_string()))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Watch(e.to_string()))?;

        let state_dir = self.root.join(STATE_DIR);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!("开始监听目录变化: {:?} (Ctrl+C 停止)", self.root);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("停止监听");
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        Ok(event) if touches_tracked_paths(&event, &state_dir) => {
                            debug!("目录变化: {:?}", event.paths);
                            wait_quiet(&mut rx, debounce).await;
                            if let Err(e) = self.refresh().await {
                                // 目录仍在变化时扫描可能失败，下次变化时重试
                                error!("刷新状态失败: {}", e);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("监听错误: {}", e),
                    }
                }
            }
        }

        Ok(())
    }
}

/// 丢弃事件直到 `debounce` 内没有新事件
async fn wait_quiet<T>(rx: &mut mpsc::UnboundedReceiver<T>, debounce: Duration) {
    while let Ok(Some(_)) = tokio::time::timeout(debounce, rx.recv()).await {}
}

/// 事件是否涉及状态目录以外的路径
fn touches_tracked_paths(event: &notify::Event, state_dir: &Path) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event.paths.iter().any(|p| !p.starts_with(state_dir))
}
