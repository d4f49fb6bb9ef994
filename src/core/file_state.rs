//! 状态记录持久化 - 每个副本在 `.sync/` 下保存快照与删除记录
//!
//! 两份记录结构相同：`{"version": 1, "entries": {"<路径>": "<指纹>"}}`。
//! 文件不存在视为首次运行（空映射）；文件存在但无法解析时返回
//! `SyncError::StateCorruption`，绝不静默重置。

use crate::core::snapshot::{Snapshot, StoredSnapshot, TombstoneSet, STATE_DIR};
use crate::error::SyncError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// 快照记录（相对同步根目录）
pub const SNAPSHOT_RECORD: &str = ".sync/snapshot.json";

/// 删除记录（相对同步根目录）
pub const TOMBSTONE_RECORD: &str = ".sync/tombstones.json";

/// 当前记录格式版本
const RECORD_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StateRecord<T> {
    version: u32,
    entries: T,
}

/// 编码为记录文件内容（键有序，重复编码结果逐字节一致）
fn encode<T: Serialize>(entries: &T) -> Result<Vec<u8>, SyncError> {
    let record = StateRecord {
        version: RECORD_VERSION,
        entries,
    };
    let mut data = serde_json::to_vec_pretty(&record)
        .map_err(|e| SyncError::Task(format!("序列化状态记录失败: {}", e)))?;
    data.push(b'\n');
    Ok(data)
}

fn decode<T: DeserializeOwned>(data: &[u8], origin: &str) -> Result<T, SyncError> {
    let record: StateRecord<T> =
        serde_json::from_slice(data).map_err(|e| SyncError::corruption(origin, e))?;
    if record.version != RECORD_VERSION {
        return Err(SyncError::corruption(
            origin,
            format!("不支持的记录版本 {}", record.version),
        ));
    }
    Ok(record.entries)
}

pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>, SyncError> {
    encode(snapshot)
}

pub fn encode_tombstones(tombstones: &TombstoneSet) -> Result<Vec<u8>, SyncError> {
    encode(tombstones)
}

/// 解析快照记录；本地文件和从对端下载的记录共用
pub fn decode_snapshot(data: &[u8], origin: &str) -> Result<Snapshot, SyncError> {
    decode(data, origin)
}

pub fn decode_tombstones(data: &[u8], origin: &str) -> Result<TombstoneSet, SyncError> {
    decode(data, origin)
}

/// 单个副本的状态记录
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, record: &str) -> PathBuf {
        record
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// 读取记录；不存在返回 None
    async fn read_record(&self, record: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.record_path(record);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("状态记录不存在，按首次运行处理: {:?}", path);
                Ok(None)
            }
            Err(e) => Err(SyncError::local_io(path, e)),
        }
    }

    /// 先写临时文件再重命名，保证记录要么是旧版本要么是新版本
    async fn write_record(&self, record: &str, data: Vec<u8>) -> Result<(), SyncError> {
        let target = self.record_path(record);
        let state_dir = self.root.join(STATE_DIR);
        fs::create_dir_all(&state_dir)
            .await
            .map_err(|e| SyncError::local_io(&state_dir, e))?;

        let temp_path = state_dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let guard = scopeguard::guard(temp_path, |p| {
            let _ = std::fs::remove_file(p);
        });

        fs::write(&*guard, &data)
            .await
            .map_err(|e| SyncError::local_io(&*guard, e))?;
        fs::rename(&*guard, &target)
            .await
            .map_err(|e| SyncError::local_io(&target, e))?;

        scopeguard::ScopeGuard::into_inner(guard);
        Ok(())
    }

    pub async fn load_snapshot(&self) -> Result<StoredSnapshot, SyncError> {
        match self.read_record(SNAPSHOT_RECORD).await? {
            Some(data) => decode_snapshot(&data, &self.record_path(SNAPSHOT_RECORD).display().to_string()),
            None => Ok(StoredSnapshot::new()),
        }
    }

    pub async fn load_tombstones(&self) -> Result<TombstoneSet, SyncError> {
        match self.read_record(TOMBSTONE_RECORD).await? {
            Some(data) => {
                decode_tombstones(&data, &self.record_path(TOMBSTONE_RECORD).display().to_string())
            }
            None => Ok(TombstoneSet::new()),
        }
    }

    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        self.write_record(SNAPSHOT_RECORD, encode_snapshot(snapshot)?).await
    }

    pub async fn save_tombstones(&self, tombstones: &TombstoneSet) -> Result<(), SyncError> {
        self.write_record(TOMBSTONE_RECORD, encode_tombstones(tombstones)?)
            .await
    }

    /// 提交一次成功的同步
    ///
    /// 先写删除记录再写快照：中途失败时旧快照仍在，下次运行会重新检测出同样的删除。
    pub async fn commit(
        &self,
        snapshot: &Snapshot,
        tombstones: &TombstoneSet,
    ) -> Result<(), SyncError> {
        self.save_tombstones(tombstones).await?;
        self.save_snapshot(snapshot).await?;
        info!(
            "状态已提交: {} 个文件, {} 条删除记录",
            snapshot.len(),
            tombstones.len()
        );
        Ok(())
    }
}
