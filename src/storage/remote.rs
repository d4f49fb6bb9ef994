use super::{ancestor_dirs, FileInfo, FileMeta, Storage, StorageError, StorageResult};
use crate::core::snapshot::{unify_separators, STATE_DIR};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{ErrorKind, Metakey, Operator};

/// 基于 opendal 的远程对端（FTP / WebDAV）
pub struct RemoteStorage {
    operator: Operator,
    name: String,
}

impl RemoteStorage {
    pub fn ftp(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<&str>,
    ) -> StorageResult<Self> {
        use opendal::services::Ftp;

        let mut builder = Ftp::default()
            .endpoint(endpoint)
            .user(username)
            .password(password);

        if let Some(r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)?.finish();
        Ok(Self {
            operator,
            name: Self::display_name(endpoint, root),
        })
    }

    pub fn webdav(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<&str>,
    ) -> StorageResult<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)?.finish();
        Ok(Self {
            operator,
            name: Self::display_name(endpoint, root),
        })
    }

    fn display_name(endpoint: &str, root: Option<&str>) -> String {
        format!(
            "{}{}",
            endpoint.trim_end_matches('/'),
            root.map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        )
    }

    /// 规范化路径
    fn normalize_path(path: &str) -> String {
        unify_separators(path).trim_start_matches('/').to_string()
    }

    fn is_state_path(path: &str) -> bool {
        path == STATE_DIR || path.starts_with(&format!("{}/", STATE_DIR))
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn list_files(&self) -> StorageResult<Vec<FileInfo>> {
        let mut files = Vec::new();

        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path_str = Self::normalize_path(entry.path());

            // 跳过根目录和状态目录
            if path_str.is_empty() || Self::is_state_path(&path_str) {
                continue;
            }

            let meta = entry.metadata();

            files.push(FileInfo {
                path: path_str.trim_end_matches('/').to_string(),
                size: meta.content_length(),
                modified_time: meta.last_modified(),
                is_dir: meta.is_dir(),
            });
        }

        Ok(files)
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<FileMeta>> {
        let path = Self::normalize_path(path);
        match self.operator.stat(&path).await {
            Ok(meta) => Ok(Some(FileMeta {
                size: meta.content_length(),
                modified_time: meta.last_modified(),
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> StorageResult<Bytes> {
        let path = Self::normalize_path(path);
        match self.operator.read(&path).await {
            Ok(data) => Ok(data.to_bytes()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let path = Self::normalize_path(path);
        match self.operator.write(&path, data).await {
            Ok(_) => Ok(()),
            // 父目录缺失，由调用方创建后重试
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::MissingDirectory(path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let path = Self::normalize_path(path);
        match self.operator.delete(&path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        let path = Self::normalize_path(path);
        let mut chain = ancestor_dirs(&path);
        let trimmed = path.trim_end_matches('/');
        if !trimmed.is_empty() {
            chain.push(trimmed.to_string());
        }

        // 逐级创建，先检查是否已存在
        for dir in chain {
            let dir_path = format!("{}/", dir);
            match self.operator.stat(&dir_path).await {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => return Err(StorageError::InvalidPath(dir)),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            match self.operator.create_dir(&dir_path).await {
                Ok(_) => tracing::debug!("创建远程目录: {}", dir_path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
