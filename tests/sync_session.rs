//! 端到端会话：本地目录与 `local` 协议对端之间的完整同步

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use tempfile::TempDir;
use twinsync_lib::config::{PeerConfig, Permissions, Protocol, SyncSettings};
use twinsync_lib::core::{
    ActionKind, ConflictWinner, ContentFingerprint, FileScanner, PathKey, StateKeeper, StateStore,
    SyncStatus,
};
use twinsync_lib::db::HistoryStore;
use twinsync_lib::{SyncEngine, SyncError};

struct Replicas {
    _local: TempDir,
    _remote: TempDir,
    local: PathBuf,
    remote: PathBuf,
}

impl Replicas {
    fn new() -> Self {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        Self {
            local: local.path().to_path_buf(),
            remote: remote.path().to_path_buf(),
            _local: local,
            _remote: remote,
        }
    }

    fn peer(&self) -> PeerConfig {
        peer_for("remote", &self.local, &self.remote)
    }

    /// 对端自己的状态刷新（相当于对端运行 serve）
    async fn refresh_remote(&self) {
        StateKeeper::new(&self.remote, 2).refresh().await.unwrap();
    }
}

fn peer_for(name: &str, local: &Path, remote: &Path) -> PeerConfig {
    PeerConfig {
        name: name.to_string(),
        protocol: Protocol::Local,
        address: remote.to_string_lossy().to_string(),
        port: None,
        username: String::new(),
        password: String::new(),
        local_root: local.to_path_buf(),
        remote_root: None,
        read_only: false,
        permissions: Permissions::default(),
    }
}

fn engine() -> SyncEngine {
    SyncEngine::new(SyncSettings::default())
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

fn set_mtime(root: &Path, path: &str, secs: u64) {
    filetime::set_file_mtime(
        root.join(path),
        filetime::FileTime::from_system_time(UNIX_EPOCH + Duration::from_secs(secs)),
    )
    .unwrap();
}

fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

fn key(s: &str) -> PathKey {
    PathKey::new(s).unwrap()
}

async fn scan(root: &Path) -> twinsync_lib::Snapshot {
    FileScanner::new(2).compute_snapshot(root).await.unwrap().snapshot
}

#[tokio::test]
async fn new_local_file_is_pushed_and_second_run_is_idle() {
    let r = Replicas::new();
    write(&r.local, "a.txt", "H1");
    r.refresh_remote().await;

    let report = engine().run_session(&r.peer()).await.unwrap();
    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.files_pushed, 1);
    assert!(report.committed);
    assert_eq!(read(&r.remote, "a.txt"), "H1");

    r.refresh_remote().await;
    let again = engine().run_session(&r.peer()).await.unwrap();
    assert_eq!(again.summary.pending(), 0);
    assert_eq!(again.summary.identical_count, 1);
}

#[tokio::test]
async fn both_sides_converge() {
    let r = Replicas::new();
    write(&r.local, "a.txt", "alpha");
    write(&r.local, "docs/b.md", "beta");
    write(&r.remote, "c.txt", "gamma");
    write(&r.remote, "dir1/dir2/file.ext", "deep");
    r.refresh_remote().await;

    let report = engine().run_session(&r.peer()).await.unwrap();
    assert_eq!(report.files_pushed, 2);
    assert_eq!(report.files_fetched, 2);

    assert_eq!(scan(&r.local).await, scan(&r.remote).await);

    // 提交的快照与本地目录一致
    let stored = StateStore::open(&r.local).load_snapshot().await.unwrap();
    assert_eq!(stored, scan(&r.local).await);
}

#[tokio::test]
async fn local_deletion_propagates_to_remote() {
    let r = Replicas::new();
    write(&r.local, "a.txt", "H1");
    r.refresh_remote().await;
    engine().run_session(&r.peer()).await.unwrap();
    r.refresh_remote().await;

    fs::remove_file(r.local.join("a.txt")).unwrap();
    let report = engine().run_session(&r.peer()).await.unwrap();

    assert_eq!(report.files_deleted_remote, 1);
    assert!(!r.remote.join("a.txt").exists());

    let tombstones = StateStore::open(&r.local).load_tombstones().await.unwrap();
    assert_eq!(tombstones.get(&key("a.txt")), Some(&ContentFingerprint::of(b"H1")));
}

#[tokio::test]
async fn remote_deletion_propagates_to_local() {
    let r = Replicas::new();
    write(&r.remote, "shared/a.txt", "H1");
    r.refresh_remote().await;
    engine().run_session(&r.peer()).await.unwrap();
    assert_eq!(read(&r.local, "shared/a.txt"), "H1");

    // 对端删除文件，并由对端自己记录删除
    fs::remove_file(r.remote.join("shared/a.txt")).unwrap();
    r.refresh_remote().await;

    let report = engine().run_session(&r.peer()).await.unwrap();
    assert_eq!(report.files_deleted_local, 1);
    assert_eq!(report.files_pushed, 0);
    assert!(!r.local.join("shared/a.txt").exists());
    assert!(!StateStore::open(&r.local)
        .load_snapshot()
        .await
        .unwrap()
        .contains(&key("shared/a.txt")));
}

#[tokio::test]
async fn newer_remote_wins_conflict() {
    let r = Replicas::new();
    write(&r.local, "b.txt", "local edit");
    write(&r.remote, "b.txt", "remote edit");
    set_mtime(&r.local, "b.txt", 1_700_000_000);
    set_mtime(&r.remote, "b.txt", 1_700_000_100);
    r.refresh_remote().await;

    let report = engine().run_session(&r.peer()).await.unwrap();
    assert_eq!(report.files_fetched, 1);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].winner, ConflictWinner::Remote);
    assert_eq!(read(&r.local, "b.txt"), "remote edit");
    assert_eq!(scan(&r.local).await, scan(&r.remote).await);
}

#[tokio::test]
async fn equal_times_resolve_to_local() {
    let r = Replicas::new();
    write(&r.local, "b.txt", "local edit");
    write(&r.remote, "b.txt", "remote edit");
    set_mtime(&r.local, "b.txt", 1_700_000_000);
    set_mtime(&r.remote, "b.txt", 1_700_000_000);
    r.refresh_remote().await;

    let report = engine().run_session(&r.peer()).await.unwrap();
    assert_eq!(report.files_pushed, 1);
    assert_eq!(report.conflicts[0].winner, ConflictWinner::Local);
    assert_eq!(read(&r.remote, "b.txt"), "local edit");
}

#[tokio::test]
async fn read_only_peer_is_mirrored() {
    let r = Replicas::new();
    write(&r.local, "mine.txt", "never uploaded");
    write(&r.local, "b.txt", "local edit");
    write(&r.remote, "b.txt", "remote edit");
    write(&r.remote, "theirs.txt", "mirror me");
    // 本地时间更新，只读时仍以远程为准
    set_mtime(&r.local, "b.txt", 1_700_000_100);
    set_mtime(&r.remote, "b.txt", 1_700_000_000);
    r.refresh_remote().await;

    let mut peer = r.peer();
    peer.read_only = true;
    let report = engine().run_session(&peer).await.unwrap();

    assert_eq!(report.files_pushed, 0);
    assert_eq!(report.files_fetched, 2);
    assert_eq!(report.files_skipped, 1);
    assert!(!r.remote.join("mine.txt").exists());
    assert_eq!(read(&r.local, "b.txt"), "remote edit");
    assert_eq!(read(&r.local, "theirs.txt"), "mirror me");
}

#[tokio::test]
async fn missing_remote_directories_are_created() {
    let r = Replicas::new();
    write(&r.local, "dir1/dir2/file.ext", "deep");
    r.refresh_remote().await;

    let report = engine().run_session(&r.peer()).await.unwrap();
    assert!(report.committed);
    assert_eq!(read(&r.remote, "dir1/dir2/file.ext"), "deep");
}

#[tokio::test]
async fn failed_action_skips_commit() {
    let r = Replicas::new();
    write(&r.local, "dir1/file.ext", "deep");
    write(&r.local, "top.txt", "top");
    r.refresh_remote().await;

    // 没有建目录权限：dir1/file.ext 无法上传
    let mut peer = r.peer();
    peer.permissions = Permissions::parse("elrw").unwrap();
    let report = engine().run_session(&peer).await.unwrap();

    assert_eq!(report.status, SyncStatus::Failed);
    assert!(!report.committed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "dir1/file.ext");
    assert_eq!(report.failures[0].action, ActionKind::Push);

    // 未提交：本地依然没有状态记录
    let store = StateStore::open(&r.local);
    assert!(store.load_snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn one_failing_peer_does_not_stop_others() {
    let r = Replicas::new();
    let unserved = tempfile::tempdir().unwrap();
    write(&r.local, "a.txt", "H1");
    r.refresh_remote().await;

    // 第一个对端从未运行过 serve，没有快照记录
    let peers = vec![
        peer_for("unserved", &r.local, unserved.path()),
        peer_for("good", &r.local, &r.remote),
    ];
    let outcomes = engine().run_all(&peers).await;

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(
        outcomes[0].result,
        Err(SyncError::RemoteStateMissing { ref peer }) if peer == "unserved"
    ));
    let good = outcomes[1].result.as_ref().unwrap();
    assert!(good.is_success());
    assert_eq!(read(&r.remote, "a.txt"), "H1");
}

#[tokio::test]
async fn corrupt_local_record_is_fatal() {
    let r = Replicas::new();
    write(&r.local, "a.txt", "H1");
    write(&r.local, ".sync/snapshot.json", "not json");
    r.refresh_remote().await;

    let err = engine().run_session(&r.peer()).await.unwrap_err();
    assert!(matches!(err, SyncError::StateCorruption { .. }));
    // 什么都没有传输
    assert!(!r.remote.join("a.txt").exists());
}

#[tokio::test]
async fn corrupt_remote_record_is_fatal() {
    let r = Replicas::new();
    write(&r.local, "a.txt", "H1");
    write(&r.remote, ".sync/snapshot.json", r#"{"version":1,"entries":{"../escape":"00"}}"#);

    let err = engine().run_session(&r.peer()).await.unwrap_err();
    assert!(matches!(err, SyncError::StateCorruption { .. }));
}

#[tokio::test]
async fn plan_changes_nothing() {
    let r = Replicas::new();
    write(&r.local, "a.txt", "H1");
    r.refresh_remote().await;

    let plan = engine().plan(&r.peer()).await.unwrap();
    assert_eq!(plan.summary.push_count, 1);
    assert!(!r.remote.join("a.txt").exists());
    assert!(StateStore::open(&r.local).load_snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn sessions_are_recorded_in_history() {
    let r = Replicas::new();
    write(&r.local, "a.txt", "H1");
    r.refresh_remote().await;

    let history = HistoryStore::in_memory().await.unwrap();
    let engine = engine().with_history(history.clone());
    engine.run_session(&r.peer()).await.unwrap();

    let sessions = history.recent_sessions(Some("remote"), 10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].files_pushed, 1);
    assert!(sessions[0].committed);
}

#[tokio::test]
async fn remote_failure_does_not_stop_later_paths() {
    let r = Replicas::new();
    write(&r.remote, "a.txt", "gone soon");
    write(&r.remote, "b.txt", "still here");
    r.refresh_remote().await;
    // 记录里仍有 a.txt，但文件已不在对端
    fs::remove_file(r.remote.join("a.txt")).unwrap();

    let report = engine().run_session(&r.peer()).await.unwrap();

    assert_eq!(report.status, SyncStatus::Failed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "a.txt");
    assert_eq!(report.failures[0].action, ActionKind::Fetch);
    // 排在后面的路径照常执行
    assert_eq!(report.files_fetched, 1);
    assert_eq!(read(&r.local, "b.txt"), "still here");

    assert!(!report.committed);
    let store = StateStore::open(&r.local);
    assert!(store.load_snapshot().await.unwrap().is_empty());
    assert!(store.load_tombstones().await.unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_local_file_fails_the_session() {
    use std::os::unix::fs::PermissionsExt;

    let r = Replicas::new();
    write(&r.local, "a.txt", "H1");
    write(&r.local, "locked.txt", "secret");
    let locked = r.local.join("locked.txt");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::File::open(&locked).is_ok() {
        // root 不受文件权限限制
        return;
    }
    r.refresh_remote().await;

    let err = engine().run_session(&r.peer()).await.unwrap_err();
    assert!(matches!(err, SyncError::LocalIo { .. }));
    assert!(!r.remote.join("a.txt").exists());
    assert!(StateStore::open(&r.local).load_snapshot().await.unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn backslash_in_file_name_syncs() {
    let r = Replicas::new();
    write(&r.local, "a\\b.txt", "flat");
    write(&r.local, "a/b.txt", "nested");
    r.refresh_remote().await;

    let report = engine().run_session(&r.peer()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.files_pushed, 2);
    assert_eq!(read(&r.remote, "a\\b.txt"), "flat");
    assert_eq!(read(&r.remote, "a/b.txt"), "nested");

    let stored = StateStore::open(&r.local).load_snapshot().await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.contains(&key("a\\b.txt")));

    // 下一次会话没有需要处理的路径
    r.refresh_remote().await;
    let again = engine().run_session(&r.peer()).await.unwrap();
    assert_eq!(again.summary.pending(), 0);
}
