//! 应用配置模块

use crate::error::SyncError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 配置文件名
pub const CONFIG_FILE: &str = "config.json";

/// 对端传输协议
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ftp,
    WebDav,
    /// 本地路径（例如挂载的网络盘）
    Local,
}

/// 对端访问权限，沿用 FTP 服务端的权限字母（如 `elradfmw`）
///
/// 同步时只关心 `r`（下载）、`w`（上传）、`d`（删除）、`m`（建目录），
/// 其余字母合法但不影响同步。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions(String);

impl Permissions {
    const VALID: &'static str = "elradfmwMT";

    pub fn parse(letters: &str) -> Result<Self, String> {
        if let Some(bad) = letters.chars().find(|c| !Self::VALID.contains(*c)) {
            return Err(format!("未知的权限字母 '{}' (可用: {})", bad, Self::VALID));
        }
        Ok(Self(letters.to_string()))
    }

    /// 拥有全部权限
    pub fn full() -> Self {
        Self("elradfmwMT".to_string())
    }

    pub fn can_read(&self) -> bool {
        self.0.contains('r')
    }

    pub fn can_write(&self) -> bool {
        self.0.contains('w')
    }

    pub fn can_delete(&self) -> bool {
        self.0.contains('d')
    }

    pub fn can_mkdir(&self) -> bool {
        self.0.contains('m')
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self("elradfmw".to_string())
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Permissions {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Permissions> for String {
    fn from(p: Permissions) -> Self {
        p.0
    }
}

/// 单个对端的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConfig {
    /// 对端名称（取自配置中的键）
    #[serde(skip)]
    pub name: String,
    pub protocol: Protocol,
    /// 主机名 / URL；`local` 协议时为目录路径
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// 与对端保持一致的本地目录
    pub local_root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_root: Option<String>,
    /// 只读：本地只做对端的镜像，不上传也不删除远程文件
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub permissions: Permissions,
}

impl PeerConfig {
    /// 连接地址
    pub fn endpoint(&self) -> String {
        match self.protocol {
            Protocol::Ftp => {
                let host = self.address.trim_start_matches("ftp://");
                match self.port {
                    Some(port) => format!("ftp://{}:{}", host, port),
                    None => format!("ftp://{}", host),
                }
            }
            Protocol::WebDav => {
                // 完整 URL 原样使用，否则按 host[:port] 拼接
                if self.address.starts_with("http://") || self.address.starts_with("https://") {
                    return self.address.clone();
                }
                match self.port {
                    Some(port) => format!("http://{}:{}", self.address, port),
                    None => format!("http://{}", self.address),
                }
            }
            Protocol::Local => self.address.clone(),
        }
    }
}

/// 同步参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 计算指纹的并发数
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_hash_workers() -> usize {
    5
}

fn default_connect_timeout() -> u64 {
    crate::storage::CONNECT_TIMEOUT_SECS
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            hash_workers: default_hash_workers(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl SyncSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// 配置文件内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub peers: BTreeMap<String, PeerConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        crate::dirs::app_dir().join(CONFIG_FILE)
    }

    /// 从配置文件加载；文件不存在时返回默认配置
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            tracing::debug!("配置文件不存在，使用默认配置: {:?}", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("读取 {:?} 失败: {}", path, e)))?;
        Self::from_json(&content)
            .map_err(|e| SyncError::Config(format!("解析 {:?} 失败: {}", path, e)))
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        let mut config: AppConfig = serde_json::from_str(content).map_err(|e| e.to_string())?;
        for (name, peer) in config.peers.iter_mut() {
            peer.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.sync.hash_workers == 0 {
            return Err("hashWorkers 必须大于 0".to_string());
        }
        for peer in self.peers.values() {
            if peer.address.is_empty() {
                return Err(format!("对端 {} 缺少 address", peer.name));
            }
            if peer.local_root.as_os_str().is_empty() {
                return Err(format!("对端 {} 缺少 localRoot", peer.name));
            }
        }
        Ok(())
    }

    /// 按名称选择对端；名称为空时返回全部
    pub fn select_peers(&self, names: &[String]) -> Result<Vec<PeerConfig>, SyncError> {
        if names.is_empty() {
            return Ok(self.peers.values().cloned().collect());
        }
        names
            .iter()
            .map(|name| {
                self.peers
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SyncError::Config(format!("未配置的对端: {}", name)))
            })
            .collect()
    }
}
