//! 双副本协调：根据本地快照、远程快照以及两侧删除记录计算同步动作

use crate::config::Permissions;
use crate::core::conflict::ConflictInfo;
use crate::core::snapshot::{ContentFingerprint, PathKey, Snapshot, TombstoneSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Push,
    Fetch,
    DeleteRemote,
    DeleteLocal,
    NoOp,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Push => "push",
            ActionKind::Fetch => "fetch",
            ActionKind::DeleteRemote => "delete_remote",
            ActionKind::DeleteLocal => "delete_local",
            ActionKind::NoOp => "noop",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 不执行的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// 两侧内容一致
    Identical,
    /// 只读对端，原本应执行的动作被跳过
    ReadOnly(ActionKind),
    /// 对端权限不允许
    Denied(ActionKind),
}

/// 同步动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// 上传本地文件
    Push {
        path: PathKey,
        /// 冲突解决的结果时记录两侧时间
        conflict: Option<ConflictInfo>,
    },
    /// 下载远程文件
    Fetch {
        path: PathKey,
        conflict: Option<ConflictInfo>,
    },
    /// 删除远程文件（本地已主动删除）
    DeleteRemote { path: PathKey },
    /// 删除本地文件（远程已主动删除）
    DeleteLocal { path: PathKey },
    NoOp { path: PathKey, reason: NoOpReason },
}

impl SyncAction {
    pub fn path(&self) -> &PathKey {
        match self {
            SyncAction::Push { path, .. }
            | SyncAction::Fetch { path, .. }
            | SyncAction::DeleteRemote { path }
            | SyncAction::DeleteLocal { path }
            | SyncAction::NoOp { path, .. } => path,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            SyncAction::Push { .. } => ActionKind::Push,
            SyncAction::Fetch { .. } => ActionKind::Fetch,
            SyncAction::DeleteRemote { .. } => ActionKind::DeleteRemote,
            SyncAction::DeleteLocal { .. } => ActionKind::DeleteLocal,
            SyncAction::NoOp { .. } => ActionKind::NoOp,
        }
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        match self {
            SyncAction::Push { conflict, .. } | SyncAction::Fetch { conflict, .. } => {
                conflict.as_ref()
            }
            _ => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, SyncAction::NoOp { .. })
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::NoOp {
                path,
                reason: NoOpReason::ReadOnly(kind),
            } => write!(f, "noop({}, 只读跳过 {})", path, kind),
            SyncAction::NoOp {
                path,
                reason: NoOpReason::Denied(kind),
            } => write!(f, "noop({}, 无权限 {})", path, kind),
            other => write!(f, "{}({})", other.kind(), other.path()),
        }
    }
}

/// 协调的四项输入
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub local: &'a Snapshot,
    pub local_tombstones: &'a TombstoneSet,
    pub remote: &'a Snapshot,
    pub remote_tombstones: &'a TombstoneSet,
}

/// 查询两侧文件的修改时间（未知时返回 None）
pub trait ModifyTimes {
    fn local(&self, path: &PathKey) -> Option<DateTime<Utc>>;
    fn remote(&self, path: &PathKey) -> Option<DateTime<Utc>>;
}

/// 预先收集好的修改时间表
#[derive(Debug, Clone, Default)]
pub struct TimeTable {
    pub local: BTreeMap<PathKey, DateTime<Utc>>,
    pub remote: BTreeMap<PathKey, DateTime<Utc>>,
}

impl ModifyTimes for TimeTable {
    fn local(&self, path: &PathKey) -> Option<DateTime<Utc>> {
        self.local.get(path).copied()
    }

    fn remote(&self, path: &PathKey) -> Option<DateTime<Utc>> {
        self.remote.get(path).copied()
    }
}

/// 协调选项
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// 只读：本地只做远程的镜像
    pub read_only: bool,
    pub permissions: Permissions,
}

/// 协调器
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    /// 为两侧出现过的每个路径生成且仅生成一个动作
    ///
    /// 先按路径顺序处理本地存在的路径，再处理仅远程存在的路径。
    pub fn reconcile(&self, input: &ReconcileInput<'_>, times: &dyn ModifyTimes) -> Vec<SyncAction> {
        let mut actions = Vec::with_capacity(input.local.len() + input.remote.len());

        for (path, local_fp) in input.local.iter() {
            let action = self.classify_local(path, local_fp, input, times);
            actions.push(self.authorize(action));
        }

        for (path, remote_fp) in input.remote.iter() {
            if input.local.contains(path) {
                continue;
            }
            let action = if input.local_tombstones.get(path) == Some(remote_fp) {
                SyncAction::DeleteRemote { path: path.clone() }
            } else {
                SyncAction::Fetch {
                    path: path.clone(),
                    conflict: None,
                }
            };
            actions.push(self.authorize(action));
        }

        actions
    }

    /// 本地存在的路径
    fn classify_local(
        &self,
        path: &PathKey,
        local_fp: &ContentFingerprint,
        input: &ReconcileInput<'_>,
        times: &dyn ModifyTimes,
    ) -> SyncAction {
        let path = path.clone();
        let remote_fp = input.remote.get(&path);

        if remote_fp == Some(local_fp) {
            return SyncAction::NoOp {
                path,
                reason: NoOpReason::Identical,
            };
        }

        // 远程删除过这份内容，本地仍是旧版本
        if input.remote_tombstones.get(&path) == Some(local_fp) {
            return SyncAction::DeleteLocal { path };
        }

        if remote_fp.is_none() {
            return SyncAction::Push {
                path,
                conflict: None,
            };
        }

        let info = ConflictInfo {
            local_modified: times.local(&path),
            remote_modified: times.remote(&path),
        };
        let fetch = self.options.read_only || info.remote_is_newer();
        debug!(
            "冲突: {} (本地 {:?}, 远程 {:?}) -> {}",
            path,
            info.local_modified,
            info.remote_modified,
            if fetch { "下载" } else { "上传" }
        );

        if fetch {
            SyncAction::Fetch {
                path,
                conflict: Some(info),
            }
        } else {
            SyncAction::Push {
                path,
                conflict: Some(info),
            }
        }
    }

    /// 按只读标记和对端权限降级动作
    pub fn authorize(&self, action: SyncAction) -> SyncAction {
        let kind = action.kind();
        let permissions = &self.options.permissions;

        let reason = match kind {
            ActionKind::Push | ActionKind::DeleteRemote if self.options.read_only => {
                Some(NoOpReason::ReadOnly(kind))
            }
            ActionKind::Push if !permissions.can_write() => Some(NoOpReason::Denied(kind)),
            ActionKind::DeleteRemote if !permissions.can_delete() => {
                Some(NoOpReason::Denied(kind))
            }
            ActionKind::Fetch if !permissions.can_read() => Some(NoOpReason::Denied(kind)),
            _ => None,
        };

        match reason {
            Some(reason) => {
                debug!("跳过 {}: {:?}", action, reason);
                SyncAction::NoOp {
                    path: action.path().clone(),
                    reason,
                }
            }
            None => action,
        }
    }
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub push_count: usize,
    pub fetch_count: usize,
    pub delete_remote_count: usize,
    pub delete_local_count: usize,
    pub identical_count: usize,
    /// 只读跳过的动作
    pub read_only_skipped: usize,
    /// 权限不足跳过的动作
    pub denied_count: usize,
    pub conflict_count: usize,
}

impl ActionSummary {
    pub fn from_actions(actions: &[SyncAction]) -> Self {
        let mut summary = Self::default();

        for action in actions {
            if action.conflict().is_some() {
                summary.conflict_count += 1;
            }
            match action {
                SyncAction::Push { .. } => summary.push_count += 1,
                SyncAction::Fetch { .. } => summary.fetch_count += 1,
                SyncAction::DeleteRemote { .. } => summary.delete_remote_count += 1,
                SyncAction::DeleteLocal { .. } => summary.delete_local_count += 1,
                SyncAction::NoOp { reason, .. } => match reason {
                    NoOpReason::Identical => summary.identical_count += 1,
                    NoOpReason::ReadOnly(_) => summary.read_only_skipped += 1,
                    NoOpReason::Denied(_) => summary.denied_count += 1,
                },
            }
        }

        summary
    }

    /// 需要实际执行的动作数
    pub fn pending(&self) -> usize {
        self.push_count + self.fetch_count + self.delete_remote_count + self.delete_local_count
    }

    pub fn total_paths(&self) -> usize {
        self.pending() + self.identical_count + self.read_only_skipped + self.denied_count
    }
}
