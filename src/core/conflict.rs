use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 冲突胜出方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    /// 本地版本覆盖远程（上传）
    Local,
    /// 远程版本覆盖本地（下载）
    Remote,
}

impl std::fmt::Display for ConflictWinner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictWinner::Local => write!(f, "local"),
            ConflictWinner::Remote => write!(f, "remote"),
        }
    }
}

impl From<&str> for ConflictWinner {
    fn from(s: &str) -> Self {
        match s {
            "remote" => ConflictWinner::Remote,
            _ => ConflictWinner::Local,
        }
    }
}

/// 两侧都有该路径、内容不同且没有匹配的删除记录时的修改时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_modified: Option<DateTime<Utc>>,
}

impl ConflictInfo {
    /// 远程时间严格晚于本地时间
    ///
    /// 时间相等时本地胜出；远程时间未知时本地胜出；
    /// 仅本地时间未知时远程胜出。
    pub fn remote_is_newer(&self) -> bool {
        match (self.local_modified, self.remote_modified) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(local), Some(remote)) => remote > local,
        }
    }
}

/// 会话中解决过的一次冲突（写入同步历史）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub path: String,
    pub winner: ConflictWinner,
    #[serde(flatten)]
    pub times: ConflictInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(secs, 0).single()
    }

    #[test]
    fn test_remote_is_newer() {
        let newer = ConflictInfo {
            local_modified: at(100),
            remote_modified: at(200),
        };
        assert!(newer.remote_is_newer());

        let tie = ConflictInfo {
            local_modified: at(100),
            remote_modified: at(100),
        };
        assert!(!tie.remote_is_newer());

        let unknown_remote = ConflictInfo {
            local_modified: at(100),
            remote_modified: None,
        };
        assert!(!unknown_remote.remote_is_newer());

        let unknown_local = ConflictInfo {
            local_modified: None,
            remote_modified: at(1),
        };
        assert!(unknown_local.remote_is_newer());
    }

    #[test]
    fn test_winner_text() {
        assert_eq!(ConflictWinner::Remote.to_string(), "remote");
        assert_eq!(ConflictWinner::from("remote"), ConflictWinner::Remote);
        assert_eq!(ConflictWinner::from("local"), ConflictWinner::Local);
    }
}
