//! 同步历史 - 每次会话的结果和冲突记录保存在应用目录的 sqlite 中

use crate::core::conflict::{ConflictInfo, ConflictRecord, ConflictWinner};
use crate::core::engine::SyncReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 历史数据库文件名
pub const HISTORY_DB: &str = "history.db";

/// 一次会话的历史记录
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: i64,
    pub peer: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: String,
    pub files_scanned: i64,
    pub files_pushed: i64,
    pub files_fetched: i64,
    pub files_deleted_remote: i64,
    pub files_deleted_local: i64,
    pub files_skipped: i64,
    pub files_failed: i64,
    pub bytes_transferred: i64,
    pub committed: bool,
    pub error_message: Option<String>,
}

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
struct ConflictRow {
    file_path: String,
    winner: String,
    local_time: Option<i64>,
    remote_time: Option<i64>,
}

impl From<ConflictRow> for ConflictRecord {
    fn from(row: ConflictRow) -> Self {
        ConflictRecord {
            path: row.file_path,
            winner: ConflictWinner::from(row.winner.as_str()),
            times: ConflictInfo {
                local_modified: row.local_time.and_then(DateTime::<Utc>::from_timestamp_millis),
                remote_modified: row.remote_time.and_then(DateTime::<Utc>::from_timestamp_millis),
            },
        }
    }
}

/// 同步历史存储
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// 默认数据库路径
    pub fn default_path() -> PathBuf {
        crate::dirs::app_dir().join(HISTORY_DB)
    }

    /// 打开（必要时创建）数据库文件
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // SQLite 连接字符串格式: sqlite:path，Windows 路径需要转换反斜杠
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
            .replace('\\', "/");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&format!("sqlite:{}?mode=rwc", path_str))
            .await?;

        Self::migrate(pool).await
    }

    /// 内存数据库（单连接，连接关闭即丢弃）
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// 记录一次完成（成功或部分失败）的会话
    pub async fn record_session(&self, report: &SyncReport) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"INSERT INTO sync_sessions
               (peer, start_time, end_time, status, files_scanned, files_pushed, files_fetched,
                files_deleted_remote, files_deleted_local, files_skipped, files_failed,
                bytes_transferred, committed, error_message)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&report.peer)
        .bind(report.start_time)
        .bind(report.end_time)
        .bind(report.status.to_string())
        .bind(report.files_scanned as i64)
        .bind(report.files_pushed as i64)
        .bind(report.files_fetched as i64)
        .bind(report.files_deleted_remote as i64)
        .bind(report.files_deleted_local as i64)
        .bind(report.files_skipped as i64)
        .bind(report.failures.len() as i64)
        .bind(report.bytes_transferred as i64)
        .bind(report.committed)
        .bind(report.error_summary())
        .execute(&mut *tx)
        .await?;

        let session_id = result.last_insert_rowid();

        for conflict in &report.conflicts {
            sqlx::query(
                r#"INSERT INTO conflicts (session_id, file_path, winner, local_time, remote_time)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(session_id)
            .bind(&conflict.path)
            .bind(conflict.winner.to_string())
            .bind(conflict.times.local_modified.map(|t| t.timestamp_millis()))
            .bind(conflict.times.remote_modified.map(|t| t.timestamp_millis()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(session_id)
    }

    /// 记录一次未能开始执行的会话（连接失败、状态损坏等）
    pub async fn record_failure(&self, peer: &str, start_time: i64, error: &str) -> Result<i64> {
        let result = sqlx::query(
            r#"INSERT INTO sync_sessions (peer, start_time, end_time, status, error_message)
               VALUES (?, ?, ?, 'failed', ?)"#,
        )
        .bind(peer)
        .bind(start_time)
        .bind(chrono::Utc::now().timestamp())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// 最近的会话，按开始时间倒序
    pub async fn recent_sessions(&self, peer: Option<&str>, limit: u32) -> Result<Vec<SessionRecord>> {
        let rows = match peer {
            Some(peer) => {
                sqlx::query_as::<_, SessionRecord>(
                    "SELECT * FROM sync_sessions WHERE peer = ? ORDER BY start_time DESC, id DESC LIMIT ?",
                )
                .bind(peer)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SessionRecord>(
                    "SELECT * FROM sync_sessions ORDER BY start_time DESC, id DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    /// 某次会话的冲突记录
    pub async fn conflicts(&self, session_id: i64) -> Result<Vec<ConflictRecord>> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            "SELECT file_path, winner, local_time, remote_time FROM conflicts WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ConflictRecord::from).collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
