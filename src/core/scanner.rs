use crate::core::snapshot::{ContentFingerprint, PathKey, Snapshot, STATE_DIR};
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use walkdir::WalkDir;

/// 默认指纹计算并发数
pub const DEFAULT_HASH_WORKERS: usize = 5;

/// 一次完整扫描的结果
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub snapshot: Snapshot,
    /// 本地文件修改时间（用于冲突判定）
    pub modified: BTreeMap<PathKey, DateTime<Utc>>,
    pub bytes_hashed: u64,
}

/// 单个文件的计算结果
struct HashedFile {
    key: PathKey,
    fingerprint: ContentFingerprint,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// 文件扫描器：遍历目录并计算每个文件的内容指纹
#[derive(Debug, Clone)]
pub struct FileScanner {
    max_concurrent: usize,
}

impl FileScanner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// 扫描整个目录树并生成快照
    ///
    /// 遍历期间文件消失或无法读取都视为致命错误，避免得到一个
    /// 少了文件的快照（那会被误判为删除）。
    pub async fn compute_snapshot(&self, root: &Path) -> Result<ScanResult, SyncError> {
        ensure_state_dir(root)?;

        info!("开始扫描: {:?}", root);

        let walk_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || list_regular_files(&walk_root))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;

        debug!("发现 {} 个文件，开始计算指纹", files.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(files.len());

        for (key, path) in files {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SyncError::Task(e.to_string()))?;

            let handle = tokio::task::spawn_blocking(move || {
                let result = hash_file(key, &path);
                drop(permit);
                result
            });

            handles.push(handle);
        }

        let mut result = ScanResult::default();
        let mut first_error = None;

        for handle in handles {
            match handle.await {
                Ok(Ok(hashed)) => {
                    result.bytes_hashed += hashed.size;
                    if let Some(modified) = hashed.modified {
                        result.modified.insert(hashed.key.clone(), modified);
                    }
                    result.snapshot.insert(hashed.key, hashed.fingerprint);
                }
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(SyncError::Task(e.to_string()));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "扫描完成: {} 个文件, {} 字节",
            result.snapshot.len(),
            result.bytes_hashed
        );

        Ok(result)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_WORKERS)
    }
}

/// 确保状态目录存在（幂等）
pub fn ensure_state_dir(root: &Path) -> Result<(), SyncError> {
    let state_dir = root.join(STATE_DIR);
    if state_dir.is_dir() {
        return Ok(());
    }
    match std::fs::create_dir(&state_dir) {
        Ok(()) => {
            info!("创建状态目录: {:?}", state_dir);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists && state_dir.is_dir() => Ok(()),
        Err(e) => Err(SyncError::local_io(state_dir, e)),
    }
}

/// 列出根目录下所有普通文件（跳过状态目录与符号链接）
fn list_regular_files(root: &Path) -> Result<Vec<(PathKey, PathBuf)>, SyncError> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == STATE_DIR));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            SyncError::local_io(path, e.into())
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| SyncError::local_io(entry.path(), std::io::Error::other(e)))?;
        let key = PathKey::from_relative(relative).map_err(|e| {
            SyncError::local_io(entry.path(), std::io::Error::new(ErrorKind::InvalidData, e))
        })?;

        files.push((key, entry.into_path()));
    }

    Ok(files)
}

/// 流式计算文件指纹
fn hash_file(key: PathKey, path: &Path) -> Result<HashedFile, SyncError> {
    let mut file = File::open(path).map_err(|e| SyncError::local_io(path, e))?;
    let metadata = file.metadata().map_err(|e| SyncError::local_io(path, e))?;

    let mut hasher = blake3::Hasher::new();
    let size = std::io::copy(&mut file, &mut hasher).map_err(|e| SyncError::local_io(path, e))?;

    Ok(HashedFile {
        key,
        fingerprint: ContentFingerprint::from(hasher.finalize()),
        size,
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> PathKey {
        PathKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_of_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dir1/dir2")).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("dir1/dir2/file.ext"), "deep").unwrap();

        let result = FileScanner::new(2).compute_snapshot(dir.path()).await.unwrap();

        assert_eq!(result.snapshot.len(), 2);
        assert_eq!(
            result.snapshot.get(&key("a.txt")),
            Some(&ContentFingerprint::of(b"alpha"))
        );
        assert_eq!(
            result.snapshot.get(&key("dir1/dir2/file.ext")),
            Some(&ContentFingerprint::of(b"deep"))
        );
        assert_eq!(result.bytes_hashed, 9);
        assert!(result.modified.contains_key(&key("a.txt")));
        // 状态目录被创建
        assert!(dir.path().join(".sync").is_dir());
    }

    #[tokio::test]
    async fn test_state_dir_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".sync")).unwrap();
        std::fs::write(dir.path().join(".sync/snapshot.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();

        let result = FileScanner::default().compute_snapshot(dir.path()).await.unwrap();
        let keys: Vec<_> = result.snapshot.keys().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = FileScanner::default().compute_snapshot(&missing).await.unwrap_err();
        assert!(matches!(err, SyncError::LocalIo { .. }));
    }

    #[tokio::test]
    async fn test_ensure_state_dir_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        ensure_state_dir(dir.path()).unwrap();
        ensure_state_dir(dir.path()).unwrap();
        assert!(dir.path().join(".sync").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_backslash_name_is_its_own_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a\\b.txt"), "flat").unwrap();
        std::fs::write(dir.path().join("a/b.txt"), "nested").unwrap();

        let result = FileScanner::default().compute_snapshot(dir.path()).await.unwrap();

        assert_eq!(result.snapshot.len(), 2);
        assert_eq!(
            result.snapshot.get(&key("a\\b.txt")),
            Some(&ContentFingerprint::of(b"flat"))
        );
        assert_eq!(
            result.snapshot.get(&key("a/b.txt")),
            Some(&ContentFingerprint::of(b"nested"))
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_name_is_fatal() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.txt")), "x").unwrap();

        let err = FileScanner::default().compute_snapshot(dir.path()).await.unwrap_err();
        match err {
            SyncError::LocalIo { source, .. } => {
                assert_eq!(source.kind(), ErrorKind::InvalidData)
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_is_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let locked = dir.path().join("locked.txt");
        std::fs::write(&locked, "secret").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // root 不受文件权限限制
        if File::open(&locked).is_ok() {
            return;
        }

        let err = FileScanner::default().compute_snapshot(dir.path()).await.unwrap_err();
        match err {
            SyncError::LocalIo { path, .. } => assert_eq!(path, locked),
            other => panic!("unexpected error: {}", other),
        }
    }
}
