use super::{ancestor_dirs, FileInfo, FileMeta, Storage, StorageError, StorageResult};
use crate::core::snapshot::{unify_separators, STATE_DIR};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 写入临时文件所在目录（位于状态目录内，不会被扫描到）
const TEMP_DIR: &str = "tmp";

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    /// 打开本地目录，不存在时自动创建
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| StorageError::io(base_path.display().to_string(), e))?;
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 解析相对路径，拒绝越出根目录的路径
    fn resolve_path(&self, path: &str) -> StorageResult<PathBuf> {
        let path = Self::normalize_path(path);
        let relative = Path::new(path.trim_start_matches('/'));

        let mut resolved = self.base_path.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(path.clone())),
            }
        }
        Ok(resolved)
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        unify_separators(path).into_owned()
    }

    fn to_utc(time: std::time::SystemTime) -> DateTime<Utc> {
        DateTime::<Utc>::from(time)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self) -> StorageResult<Vec<FileInfo>> {
        let base_path = self.base_path.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let walker = WalkDir::new(&base_path)
                .follow_links(false)
                .min_depth(1)
                .into_iter()
                .filter_entry(|e| !(e.depth() == 1 && e.file_name() == STATE_DIR));

            for entry in walker {
                let entry = entry.map_err(|e| {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    StorageError::io(path, e.into())
                })?;
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .map_err(|e| StorageError::io(path.display().to_string(), e.into()))?;

                // 符号链接等特殊文件不参与同步
                if !metadata.is_dir() && !metadata.is_file() {
                    continue;
                }

                let relative_path = path
                    .strip_prefix(&base_path)
                    .map_err(|_| StorageError::InvalidPath(path.display().to_string()))?
                    .to_string_lossy()
                    .to_string();

                files.push(FileInfo {
                    path: Self::normalize_path(&relative_path),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified_time: metadata.modified().ok().map(Self::to_utc),
                    is_dir: metadata.is_dir(),
                });
            }
            Ok(files)
        })
        .await
        .map_err(|e| StorageError::io("list_files", std::io::Error::other(e)))?
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<FileMeta>> {
        let full_path = self.resolve_path(path)?;

        match fs::metadata(&full_path).await {
            Ok(metadata) => Ok(Some(FileMeta {
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified_time: metadata.modified().ok().map(Self::to_utc),
                is_dir: metadata.is_dir(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn read(&self, path: &str) -> StorageResult<Bytes> {
        let full_path = self.resolve_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(path.to_string())),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let full_path = self.resolve_path(path)?;

        // 父目录由调用方负责创建
        match full_path.parent() {
            Some(parent) if parent.is_dir() => {}
            _ => return Err(StorageError::MissingDirectory(path.to_string())),
        }

        // 使用临时文件写入，然后原子重命名
        let temp_dir = self.base_path.join(STATE_DIR).join(TEMP_DIR);
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| StorageError::io(temp_dir.display().to_string(), e))?;
        let temp_path = temp_dir.join(uuid::Uuid::new_v4().to_string());

        // 失败时清理临时文件
        let guard = scopeguard::guard(temp_path, |p| {
            let _ = std::fs::remove_file(p);
        });

        fs::write(&*guard, &data)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        fs::rename(&*guard, &full_path)
            .await
            .map_err(|e| StorageError::io(path, e))?;

        scopeguard::ScopeGuard::into_inner(guard);
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full_path = self.resolve_path(path)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        let path = Self::normalize_path(path);
        let mut chain = ancestor_dirs(&path);
        let trimmed = path.trim_matches('/');
        if !trimmed.is_empty() {
            chain.push(trimmed.to_string());
        }

        for dir in chain {
            let full_path = self.resolve_path(&dir)?;
            if full_path.is_dir() {
                continue;
            }
            match fs::create_dir(&full_path).await {
                Ok(()) => tracing::debug!("创建目录: {}", dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && full_path.is_dir() => {}
                Err(e) => return Err(StorageError::io(dir, e)),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
