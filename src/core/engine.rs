use crate::config::{PeerConfig, SyncSettings};
use crate::core::conflict::{ConflictRecord, ConflictWinner};
use crate::core::file_state::{
    decode_snapshot, decode_tombstones, StateStore, SNAPSHOT_RECORD, TOMBSTONE_RECORD,
};
use crate::core::reconciler::{
    ActionKind, ActionSummary, ReconcileInput, ReconcileOptions, Reconciler, SyncAction, TimeTable,
};
use crate::core::scanner::{FileScanner, ScanResult};
use crate::core::snapshot::{PathKey, Snapshot, TombstoneSet};
use crate::core::tombstone::{TombstoneTracker, TrackedState};
use crate::core::transfer::{Transfer, TransferOutcome};
use crate::db::HistoryStore;
use crate::error::SyncError;
use crate::storage::{self, LocalStorage, Storage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 会话结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// 所有动作成功，状态已提交
    Completed,
    /// 有动作失败，未提交
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 单个路径的失败
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFailure {
    pub path: String,
    pub action: ActionKind,
    pub error: String,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub peer: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: SyncStatus,
    pub files_scanned: usize,
    /// 协调阶段的动作统计
    pub summary: ActionSummary,
    pub files_pushed: usize,
    pub files_fetched: usize,
    pub files_deleted_remote: usize,
    pub files_deleted_local: usize,
    /// 只读或权限不足而跳过的路径
    pub files_skipped: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<ActionFailure>,
    pub conflicts: Vec<ConflictRecord>,
    pub committed: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Completed
    }

    /// 失败路径汇总（写入历史记录）
    pub fn error_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|f| format!("{} {}: {}", f.action, f.path, f.error))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// 演练结果：只计算动作，不执行
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub peer: String,
    pub actions: Vec<SyncAction>,
    pub summary: ActionSummary,
    /// 本次新检测到的本地删除
    pub new_tombstones: TombstoneSet,
}

/// 多对端同步时每个对端的结果
#[derive(Debug)]
pub struct PeerOutcome {
    pub peer: String,
    pub result: Result<SyncReport, SyncError>,
}

/// 会话准备阶段得到的全部输入
struct PreparedSession {
    local: Arc<LocalStorage>,
    remote: Arc<dyn Storage>,
    store: StateStore,
    scan: ScanResult,
    tracked: TrackedState,
    remote_snapshot: Snapshot,
    actions: Vec<SyncAction>,
    summary: ActionSummary,
}

/// 同步引擎
pub struct SyncEngine {
    settings: SyncSettings,
    scanner: FileScanner,
    history: Option<HistoryStore>,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            scanner: FileScanner::new(settings.hash_workers),
            settings,
            history: None,
        }
    }

    /// 会话结束后写入同步历史
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn history(&self) -> Option<&HistoryStore> {
        self.history.as_ref()
    }

    /// 依次与每个对端同步，一个对端失败不影响其他对端
    ///
    /// 多个对端可能共用同一个本地目录，因此不并行执行。
    pub async fn run_all(&self, peers: &[PeerConfig]) -> Vec<PeerOutcome> {
        let mut outcomes = Vec::with_capacity(peers.len());

        for peer in peers {
            let result = self.run_session(peer).await;
            match &result {
                Ok(report) if report.is_success() => {
                    info!("对端 {} 同步完成", peer.name);
                }
                Ok(report) => {
                    warn!("对端 {} 有 {} 个动作失败，未提交", peer.name, report.failures.len());
                }
                Err(e) => {
                    error!("对端 {} 同步失败，跳过: {}", peer.name, e);
                }
            }
            outcomes.push(PeerOutcome {
                peer: peer.name.clone(),
                result,
            });
        }

        outcomes
    }

    /// 与一个对端执行一次完整会话
    pub async fn run_session(&self, peer: &PeerConfig) -> Result<SyncReport, SyncError> {
        let start_time = Utc::now().timestamp();
        let started = Instant::now();

        info!("开始同步: {} -> {:?}", peer.name, peer.local_root);

        let result = match self.prepare(peer).await {
            Ok(prepared) => self.execute(peer, prepared, start_time, started).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => {
                if let Some(history) = &self.history {
                    if let Err(e) = history.record_session(report).await {
                        warn!("记录同步历史失败: {}", e);
                    }
                }
            }
            Err(e) => {
                if let Some(history) = &self.history {
                    if let Err(db_err) = history
                        .record_failure(&peer.name, start_time, &e.to_string())
                        .await
                    {
                        warn!("记录同步历史失败: {}", db_err);
                    }
                }
            }
        }

        result
    }

    /// 只计算动作，不传输也不提交
    pub async fn plan(&self, peer: &PeerConfig) -> Result<SessionPlan, SyncError> {
        let prepared = self.prepare(peer).await?;
        Ok(SessionPlan {
            peer: peer.name.clone(),
            actions: prepared.actions,
            summary: prepared.summary,
            new_tombstones: prepared.tracked.delta,
        })
    }

    /// 连接对端，收集四项输入并计算动作
    async fn prepare(&self, peer: &PeerConfig) -> Result<PreparedSession, SyncError> {
        let remote = storage::connect(peer, self.settings.connect_timeout()).await?;

        let remote_snapshot = fetch_remote_snapshot(remote.as_ref(), peer).await?;
        let remote_tombstones = fetch_remote_tombstones(remote.as_ref(), peer).await?;
        let remote_times = fetch_remote_times(remote.as_ref()).await?;
        debug!(
            "远程状态: {} 个文件, {} 条删除记录",
            remote_snapshot.len(),
            remote_tombstones.len()
        );

        let local = Arc::new(
            LocalStorage::new(&peer.local_root)
                .map_err(|e| SyncError::local_storage(&peer.local_root, e))?,
        );
        let scan = self.scanner.compute_snapshot(&peer.local_root).await?;

        let store = StateStore::open(&peer.local_root);
        let tracked = TombstoneTracker::new(store.clone()).track(&scan.snapshot).await?;

        let times = TimeTable {
            local: scan.modified.clone(),
            remote: remote_times,
        };
        let reconciler = Reconciler::new(ReconcileOptions {
            read_only: peer.read_only,
            permissions: peer.permissions.clone(),
        });
        let actions = reconciler.reconcile(
            &ReconcileInput {
                local: &scan.snapshot,
                local_tombstones: &tracked.tombstones,
                remote: &remote_snapshot,
                remote_tombstones: &remote_tombstones,
            },
            &times,
        );

        let summary = ActionSummary::from_actions(&actions);
        info!(
            "对端 {}: 上传 {}, 下载 {}, 删除远程 {}, 删除本地 {}, 相同 {}, 跳过 {}, 冲突 {}",
            peer.name,
            summary.push_count,
            summary.fetch_count,
            summary.delete_remote_count,
            summary.delete_local_count,
            summary.identical_count,
            summary.read_only_skipped + summary.denied_count,
            summary.conflict_count
        );

        Ok(PreparedSession {
            local,
            remote,
            store,
            scan,
            tracked,
            remote_snapshot,
            actions,
            summary,
        })
    }

    /// 顺序执行动作；全部成功才提交新的快照和删除记录
    async fn execute(
        &self,
        peer: &PeerConfig,
        prepared: PreparedSession,
        start_time: i64,
        started: Instant,
    ) -> Result<SyncReport, SyncError> {
        let PreparedSession {
            local,
            remote,
            store,
            scan,
            tracked,
            remote_snapshot,
            actions,
            summary,
        } = prepared;

        let transfer = Transfer::new(local, remote, peer.permissions.clone());
        let mut committed_snapshot = scan.snapshot.clone();
        let mut failures = Vec::new();
        let mut report = SyncReport {
            peer: peer.name.clone(),
            start_time,
            end_time: start_time,
            status: SyncStatus::Completed,
            files_scanned: scan.snapshot.len(),
            files_skipped: summary.read_only_skipped + summary.denied_count,
            summary,
            files_pushed: 0,
            files_fetched: 0,
            files_deleted_remote: 0,
            files_deleted_local: 0,
            bytes_transferred: 0,
            failures: Vec::new(),
            conflicts: collect_conflicts(&actions),
            committed: false,
            duration_ms: 0,
        };

        for action in actions.iter().filter(|a| !a.is_noop()) {
            match transfer.execute(action).await {
                Ok(outcome) => {
                    report.bytes_transferred += outcome.bytes();
                    apply_outcome(action, &outcome, &remote_snapshot, &mut committed_snapshot);
                    match action.kind() {
                        ActionKind::Push => report.files_pushed += 1,
                        ActionKind::Fetch => report.files_fetched += 1,
                        ActionKind::DeleteRemote => report.files_deleted_remote += 1,
                        ActionKind::DeleteLocal => report.files_deleted_local += 1,
                        ActionKind::NoOp => {}
                    }
                }
                Err(e) => {
                    error!("{} 失败: {}", action, e);
                    let aborts = e.aborts_session();
                    failures.push(ActionFailure {
                        path: action.path().to_string(),
                        action: action.kind(),
                        error: e.to_string(),
                    });
                    if aborts {
                        error!("会话中止，剩余动作不再执行");
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            store.commit(&committed_snapshot, &tracked.tombstones).await?;
            report.committed = true;
        } else {
            warn!("{} 个动作失败，本次不提交，下次运行将重新同步", failures.len());
            report.status = SyncStatus::Failed;
        }

        report.failures = failures;
        report.end_time = Utc::now().timestamp();
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "对端 {} 会话结束: 上传 {}, 下载 {}, 删除 {}, 失败 {}, 传输 {} 字节, 耗时 {}ms",
            report.peer,
            report.files_pushed,
            report.files_fetched,
            report.files_deleted_remote + report.files_deleted_local,
            report.failures.len(),
            report.bytes_transferred,
            report.duration_ms
        );

        Ok(report)
    }
}

/// 将成功执行的动作反映到待提交的快照上
fn apply_outcome(
    action: &SyncAction,
    outcome: &TransferOutcome,
    remote_snapshot: &Snapshot,
    snapshot: &mut Snapshot,
) {
    match (action, outcome) {
        (SyncAction::Fetch { path, .. }, TransferOutcome::Downloaded { fingerprint, .. }) => {
            if remote_snapshot.get(path) != Some(fingerprint) {
                warn!("远程文件在其快照记录之后被修改: {}", path);
            }
            snapshot.insert(path.clone(), *fingerprint);
        }
        (SyncAction::DeleteLocal { path }, _) => {
            snapshot.remove(path);
        }
        _ => {}
    }
}

fn collect_conflicts(actions: &[SyncAction]) -> Vec<ConflictRecord> {
    actions
        .iter()
        .filter_map(|action| {
            let times = *action.conflict()?;
            let winner = match action.kind() {
                ActionKind::Fetch => ConflictWinner::Remote,
                _ => ConflictWinner::Local,
            };
            Some(ConflictRecord {
                path: action.path().to_string(),
                winner,
                times,
            })
        })
        .collect()
}

/// 读取对端的状态记录，不存在返回 None
async fn read_remote_record(
    remote: &dyn Storage,
    record: &str,
) -> Result<Option<bytes::Bytes>, SyncError> {
    match remote.read(record).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(SyncError::Remote {
            path: record.to_string(),
            source: e,
        }),
    }
}

async fn fetch_remote_snapshot(remote: &dyn Storage, peer: &PeerConfig) -> Result<Snapshot, SyncError> {
    match read_remote_record(remote, SNAPSHOT_RECORD).await? {
        Some(data) => decode_snapshot(&data, &format!("{}:{}", peer.name, SNAPSHOT_RECORD)),
        None => Err(SyncError::RemoteStateMissing {
            peer: peer.name.clone(),
        }),
    }
}

async fn fetch_remote_tombstones(
    remote: &dyn Storage,
    peer: &PeerConfig,
) -> Result<TombstoneSet, SyncError> {
    match read_remote_record(remote, TOMBSTONE_RECORD).await? {
        Some(data) => decode_tombstones(&data, &format!("{}:{}", peer.name, TOMBSTONE_RECORD)),
        None => Ok(TombstoneSet::new()),
    }
}

/// 远程文件修改时间（用于冲突判定）
async fn fetch_remote_times(
    remote: &dyn Storage,
) -> Result<BTreeMap<PathKey, DateTime<Utc>>, SyncError> {
    let files = remote.list_files().await.map_err(|e| SyncError::Remote {
        path: String::new(),
        source: e,
    })?;

    let mut times = BTreeMap::new();
    for file in files.into_iter().filter(|f| !f.is_dir) {
        let (Ok(key), Some(modified)) = (PathKey::new(&file.path), file.modified_time) else {
            continue;
        };
        times.insert(key, modified);
    }
    Ok(times)
}
