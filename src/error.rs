//! 同步过程的错误类型

use crate::storage::StorageError;
use std::path::PathBuf;

/// 同步会话中可能出现的错误
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 对端不可达、认证失败或超时；只影响该对端的会话
    #[error("连接对端 {peer} 失败: {message}")]
    Connection { peer: String, message: String },

    /// 上传目标的父目录缺失，且创建目录后重试仍然失败
    #[error("远程目录不存在且无法创建 ({path}): {source}")]
    MissingRemoteDirectory {
        path: String,
        #[source]
        source: StorageError,
    },

    /// 扫描或传输过程中本地文件消失 / 不可读
    #[error("本地文件读写失败 ({}): {source}", .path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 已持久化的快照或删除记录无法解析
    #[error("状态记录损坏 ({origin}): {reason}")]
    StateCorruption { origin: String, reason: String },

    /// 对端没有发布快照记录
    #[error("对端 {peer} 没有快照记录，请先在对端运行 serve")]
    RemoteStateMissing { peer: String },

    /// 单个路径的远程操作失败
    #[error("远程操作失败 ({path}): {source}")]
    Remote {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("文件监听失败: {0}")]
    Watch(String),

    #[error("后台任务失败: {0}")]
    Task(String),
}

impl SyncError {
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// 本地存储返回的错误统一视为本地 IO 错误
    pub fn local_storage(path: impl Into<PathBuf>, source: StorageError) -> Self {
        Self::LocalIo {
            path: path.into(),
            source: source.into_io(),
        }
    }

    pub fn corruption(origin: impl Into<String>, reason: impl ToString) -> Self {
        Self::StateCorruption {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    /// 出现此类错误时立即中止会话，不再处理剩余路径
    pub fn aborts_session(&self) -> bool {
        matches!(
            self,
            Self::LocalIo { .. } | Self::MissingRemoteDirectory { .. } | Self::Connection { .. }
        )
    }
}
