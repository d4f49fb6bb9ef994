pub mod local;
pub mod remote;

use crate::config::{PeerConfig, Protocol};
use crate::error::SyncError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use local::LocalStorage;
pub use remote::RemoteStorage;

// ============ 公共常量 ============

/// 默认连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// 存储层错误
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("文件不存在: {0}")]
    NotFound(String),

    /// 写入时父目录不存在，调用方可创建目录后重试
    #[error("父目录不存在: {0}")]
    MissingDirectory(String),

    #[error("非法路径: {0}")]
    InvalidPath(String),

    #[error("IO 错误 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Backend(#[from] opendal::Error),
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            Self::Backend(e) => e.kind() == opendal::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// 转换为 io::Error（保留原始 IO 错误）
    pub fn into_io(self) -> std::io::Error {
        match self {
            Self::Io { source, .. } => source,
            Self::NotFound(_) | Self::MissingDirectory(_) => {
                std::io::Error::new(std::io::ErrorKind::NotFound, self)
            }
            other => std::io::Error::other(other),
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// 文件元数据（用于快速检查）
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// 副本访问接口：本地目录和远程对端都通过它读写
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出所有文件（不含 .sync 状态目录）
    async fn list_files(&self) -> StorageResult<Vec<FileInfo>>;

    /// 获取文件元数据，不存在时返回 None
    async fn stat(&self, path: &str) -> StorageResult<Option<FileMeta>>;

    /// 读取整个文件
    async fn read(&self, path: &str) -> StorageResult<Bytes>;

    /// 写入整个文件；父目录不存在时返回 `StorageError::MissingDirectory`
    async fn write(&self, path: &str, data: Bytes) -> StorageResult<()>;

    /// 删除单个文件，文件不存在不算错误
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// 检查文件是否存在
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 递归创建目录，已存在视为成功
    async fn create_dir(&self, path: &str) -> StorageResult<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 列出路径的所有祖先目录，由浅到深：`a/b/c.txt` -> [`a`, `a/b`]
pub(crate) fn ancestor_dirs(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    (1..parts.len()).map(|n| parts[..n].join("/")).collect()
}

/// 根据对端配置创建存储实例
pub fn create_storage(peer: &PeerConfig) -> Result<Arc<dyn Storage>, SyncError> {
    let storage: Arc<dyn Storage> = match peer.protocol {
        Protocol::Ftp => {
            let endpoint = peer.endpoint();
            tracing::info!("初始化 FTP 存储: {}", endpoint);
            Arc::new(
                RemoteStorage::ftp(
                    &endpoint,
                    &peer.username,
                    &peer.password,
                    peer.remote_root.as_deref(),
                )
                .map_err(|e| connection_error(peer, e))?,
            )
        }
        Protocol::WebDav => {
            let endpoint = peer.endpoint();
            tracing::info!("初始化 WebDAV 存储: {}", endpoint);
            Arc::new(
                RemoteStorage::webdav(
                    &endpoint,
                    &peer.username,
                    &peer.password,
                    peer.remote_root.as_deref(),
                )
                .map_err(|e| connection_error(peer, e))?,
            )
        }
        Protocol::Local => {
            tracing::info!("初始化本地对端: {}", peer.address);
            Arc::new(LocalStorage::new(&peer.address).map_err(|e| connection_error(peer, e))?)
        }
    };
    Ok(storage)
}

/// 建立连接并探测对端是否可用
///
/// 超时或认证失败都返回 `SyncError::Connection`，不做重试。
pub async fn connect(peer: &PeerConfig, timeout: Duration) -> Result<Arc<dyn Storage>, SyncError> {
    let storage = create_storage(peer)?;

    match tokio::time::timeout(timeout, storage.stat("")).await {
        Ok(Ok(Some(_))) => {
            tracing::debug!("对端可访问: {}", storage.name());
            Ok(storage)
        }
        Ok(Ok(None)) => Err(SyncError::Connection {
            peer: peer.name.clone(),
            message: format!("根目录不存在: {}", storage.name()),
        }),
        Ok(Err(e)) => Err(connection_error(peer, e)),
        Err(_) => Err(SyncError::Connection {
            peer: peer.name.clone(),
            message: format!("{} 秒内未响应", timeout.as_secs()),
        }),
    }
}

fn connection_error(peer: &PeerConfig, e: StorageError) -> SyncError {
    SyncError::Connection {
        peer: peer.name.clone(),
        message: e.to_string(),
    }
}
