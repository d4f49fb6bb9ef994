use crate::config::AppConfig;
use crate::core::StateKeeper;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// 维护根目录的状态记录，供对端读取
pub async fn run(config: &AppConfig, root: &Path, watch: bool, debounce_ms: u64) -> Result<()> {
    if !root.is_dir() {
        anyhow::bail!("目录不存在: {}", root.display());
    }

    let keeper = StateKeeper::new(root, config.sync.hash_workers);

    if watch {
        keeper
            .watch(Duration::from_millis(debounce_ms))
            .await
            .with_context(|| format!("监听 {} 失败", root.display()))?;
        return Ok(());
    }

    let report = keeper
        .refresh()
        .await
        .with_context(|| format!("刷新 {} 失败", root.display()))?;
    println!(
        "{}: {} 个文件, {} 条删除记录 (新增 {}), 耗时 {}ms",
        root.display(),
        report.files,
        report.total_tombstones,
        report.new_tombstones,
        report.duration_ms
    );
    Ok(())
}
