//! 动作执行 - 整文件上传 / 下载 / 删除

use crate::config::Permissions;
use crate::core::reconciler::SyncAction;
use crate::core::snapshot::{ContentFingerprint, PathKey};
use crate::error::SyncError;
use crate::storage::{LocalStorage, Storage, StorageError};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// 单个动作的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded { bytes: u64 },
    /// 下载完成，附带实际写入内容的指纹
    Downloaded {
        fingerprint: ContentFingerprint,
        bytes: u64,
    },
    Deleted,
    Skipped,
}

impl TransferOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            TransferOutcome::Uploaded { bytes } | TransferOutcome::Downloaded { bytes, .. } => {
                *bytes
            }
            _ => 0,
        }
    }
}

/// 一个会话内的传输执行器，持有本地副本与对端连接
pub struct Transfer {
    local: Arc<LocalStorage>,
    remote: Arc<dyn Storage>,
    permissions: Permissions,
}

impl Transfer {
    pub fn new(local: Arc<LocalStorage>, remote: Arc<dyn Storage>, permissions: Permissions) -> Self {
        Self {
            local,
            remote,
            permissions,
        }
    }

    pub async fn execute(&self, action: &SyncAction) -> Result<TransferOutcome, SyncError> {
        match action {
            SyncAction::Push { path, .. } => self.push(path).await,
            SyncAction::Fetch { path, .. } => self.fetch(path).await,
            SyncAction::DeleteRemote { path } => {
                debug!("删除远程: {}", path);
                self.remote
                    .delete(path.as_str())
                    .await
                    .map_err(|e| remote_error(path, e))?;
                Ok(TransferOutcome::Deleted)
            }
            SyncAction::DeleteLocal { path } => {
                debug!("删除本地: {}", path);
                self.local
                    .delete(path.as_str())
                    .await
                    .map_err(|e| SyncError::local_storage(self.local_path(path), e))?;
                Ok(TransferOutcome::Deleted)
            }
            SyncAction::NoOp { .. } => Ok(TransferOutcome::Skipped),
        }
    }

    fn local_path(&self, path: &PathKey) -> PathBuf {
        path.to_path(self.local.base_path())
    }

    async fn push(&self, path: &PathKey) -> Result<TransferOutcome, SyncError> {
        let data = self
            .local
            .read(path.as_str())
            .await
            .map_err(|e| SyncError::local_storage(self.local_path(path), e))?;
        let bytes = data.len() as u64;

        debug!("上传: {} ({} 字节)", path, bytes);

        match self.remote.write(path.as_str(), data.clone()).await {
            Ok(()) => {}
            Err(StorageError::MissingDirectory(_)) => {
                let parent = self.create_remote_parent(path).await?;
                // 只重试一次
                self.remote
                    .write(path.as_str(), data)
                    .await
                    .map_err(|e| match e {
                        StorageError::MissingDirectory(_) => SyncError::MissingRemoteDirectory {
                            path: parent,
                            source: e,
                        },
                        other => remote_error(path, other),
                    })?;
            }
            Err(e) => return Err(remote_error(path, e)),
        }

        Ok(TransferOutcome::Uploaded { bytes })
    }

    /// 创建远程父目录链，返回父目录路径
    async fn create_remote_parent(&self, path: &PathKey) -> Result<String, SyncError> {
        let parent = path.parent().unwrap_or_default().to_string();

        if parent.is_empty() || !self.permissions.can_mkdir() {
            return Err(SyncError::MissingRemoteDirectory {
                source: StorageError::MissingDirectory(path.to_string()),
                path: parent,
            });
        }

        debug!("远程目录不存在，创建: {}", parent);
        self.remote
            .create_dir(&parent)
            .await
            .map_err(|e| SyncError::MissingRemoteDirectory {
                path: parent.clone(),
                source: e,
            })?;
        Ok(parent)
    }

    async fn fetch(&self, path: &PathKey) -> Result<TransferOutcome, SyncError> {
        let data = self
            .remote
            .read(path.as_str())
            .await
            .map_err(|e| remote_error(path, e))?;
        let bytes = data.len() as u64;
        let fingerprint = ContentFingerprint::of(&data);

        debug!("下载: {} ({} 字节)", path, bytes);

        self.write_local(path, data).await?;

        Ok(TransferOutcome::Downloaded { fingerprint, bytes })
    }

    /// 写入本地，目标目录不存在时创建后重试一次
    async fn write_local(&self, path: &PathKey, data: Bytes) -> Result<(), SyncError> {
        match self.local.write(path.as_str(), data.clone()).await {
            Ok(()) => Ok(()),
            Err(StorageError::MissingDirectory(_)) => {
                if let Some(parent) = path.parent() {
                    debug!("本地目录不存在，创建: {}", parent);
                    self.local
                        .create_dir(parent)
                        .await
                        .map_err(|e| SyncError::local_storage(self.local.base_path().join(parent), e))?;
                }
                self.local
                    .write(path.as_str(), data)
                    .await
                    .map_err(|e| SyncError::local_storage(self.local_path(path), e))
            }
            Err(e) => Err(SyncError::local_storage(self.local_path(path), e)),
        }
    }
}

fn remote_error(path: &PathKey, source: StorageError) -> SyncError {
    SyncError::Remote {
        path: path.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> PathKey {
        PathKey::new(s).unwrap()
    }

    struct Pair {
        _local_dir: tempfile::TempDir,
        _remote_dir: tempfile::TempDir,
        local_root: PathBuf,
        remote_root: PathBuf,
    }

    impl Pair {
        fn new() -> Self {
            let local_dir = tempfile::tempdir().unwrap();
            let remote_dir = tempfile::tempdir().unwrap();
            Self {
                local_root: local_dir.path().to_path_buf(),
                remote_root: remote_dir.path().to_path_buf(),
                _local_dir: local_dir,
                _remote_dir: remote_dir,
            }
        }

        fn transfer(&self, permissions: &str) -> Transfer {
            Transfer::new(
                Arc::new(LocalStorage::new(&self.local_root).unwrap()),
                Arc::new(LocalStorage::new(&self.remote_root).unwrap()),
                Permissions::parse(permissions).unwrap(),
            )
        }
    }

    #[tokio::test]
    async fn test_push_creates_remote_parents() {
        let pair = Pair::new();
        std::fs::create_dir_all(pair.local_root.join("dir1/dir2")).unwrap();
        std::fs::write(pair.local_root.join("dir1/dir2/file.ext"), "deep").unwrap();

        let outcome = pair
            .transfer("elradfmw")
            .execute(&SyncAction::Push {
                path: key("dir1/dir2/file.ext"),
                conflict: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Uploaded { bytes: 4 });
        assert_eq!(
            std::fs::read_to_string(pair.remote_root.join("dir1/dir2/file.ext")).unwrap(),
            "deep"
        );
    }

    #[tokio::test]
    async fn test_push_without_mkdir_permission_fails() {
        let pair = Pair::new();
        std::fs::create_dir_all(pair.local_root.join("sub")).unwrap();
        std::fs::write(pair.local_root.join("sub/a.txt"), "a").unwrap();

        let err = pair
            .transfer("elrw")
            .execute(&SyncAction::Push {
                path: key("sub/a.txt"),
                conflict: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::MissingRemoteDirectory { ref path, .. } if path == "sub"));
        assert!(err.aborts_session());
    }

    #[tokio::test]
    async fn test_push_missing_local_file_is_local_io() {
        let pair = Pair::new();
        let err = pair
            .transfer("elradfmw")
            .execute(&SyncAction::Push {
                path: key("vanished.txt"),
                conflict: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::LocalIo { .. }));
    }

    #[tokio::test]
    async fn test_fetch_creates_local_parents() {
        let pair = Pair::new();
        std::fs::create_dir_all(pair.remote_root.join("x/y")).unwrap();
        std::fs::write(pair.remote_root.join("x/y/b.txt"), "remote").unwrap();

        let outcome = pair
            .transfer("elr")
            .execute(&SyncAction::Fetch {
                path: key("x/y/b.txt"),
                conflict: None,
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TransferOutcome::Downloaded {
                fingerprint: ContentFingerprint::of(b"remote"),
                bytes: 6
            }
        );
        assert_eq!(
            std::fs::read_to_string(pair.local_root.join("x/y/b.txt")).unwrap(),
            "remote"
        );
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_ok() {
        let pair = Pair::new();
        let transfer = pair.transfer("elradfmw");
        let outcome = transfer
            .execute(&SyncAction::DeleteRemote { path: key("nope.txt") })
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Deleted);
        transfer
            .execute(&SyncAction::DeleteLocal { path: key("nope.txt") })
            .await
            .unwrap();
    }
}
