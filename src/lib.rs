pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, PeerConfig, Permissions, Protocol};
pub use crate::core::{
    ContentFingerprint, FileScanner, PathKey, Reconciler, Snapshot, StateKeeper, StateStore,
    SyncAction, SyncEngine, SyncReport, TombstoneSet,
};
pub use db::HistoryStore;
pub use error::SyncError;

/// 应用目录
pub mod dirs {
    use std::path::PathBuf;

    /// 应用目录名
    const APP_NAME: &str = "twinsync";

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux：优先 XDG_CONFIG_HOME
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }

    /// 存放配置、日志和同步历史的目录
    pub fn app_dir() -> PathBuf {
        config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_NAME)))
    }
}
