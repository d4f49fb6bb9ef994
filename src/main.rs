use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use twinsync_lib::commands;
use twinsync_lib::config::AppConfig;
use twinsync_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};

#[derive(Parser)]
#[command(name = "twinsync")]
#[command(version)]
#[command(about = "在本地目录与对端目录之间双向同步，传播新增、修改与删除")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, env = "TWINSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// 在控制台输出 debug 日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 服务端：刷新目录的快照和删除记录，供对端读取
    Serve {
        /// 同步根目录
        root: PathBuf,

        /// 刷新后继续监听目录变化
        #[arg(short, long)]
        watch: bool,

        /// 目录变化后等待静默的时间（毫秒）
        #[arg(long, default_value = "500")]
        debounce_ms: u64,
    },

    /// 客户端：与配置的对端同步（默认全部）
    Sync {
        /// 只同步指定的对端，可重复
        #[arg(short, long = "peer")]
        peers: Vec<String>,
    },

    /// 演练：列出将要执行的动作
    Plan {
        #[arg(short, long)]
        peer: String,

        /// 同时列出内容相同的文件
        #[arg(short, long)]
        all: bool,
    },

    /// 查看同步历史
    History {
        #[arg(short, long)]
        peer: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// 同时列出每次会话的冲突
        #[arg(long)]
        conflicts: bool,
    },
}

/// 初始化日志系统
///
/// 控制台始终输出；配置启用时同时写入日志目录下的轮转文件。
/// 返回的 guard 需要保持到进程退出，否则缓冲的日志会丢失。
fn init_logging(config: &LogConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("sqlx=warn".parse().expect("valid directive"))
        .add_directive("suppaftp=warn".parse().expect("valid directive"));

    let file_writer = config
        .enabled
        .then(|| SizeRotatingWriter::new(&get_log_dir(), config.max_size_mb))
        .and_then(|w| w.map_err(|e| eprintln!("无法创建日志文件: {}", e)).ok());

    // 未启用文件日志时 file_layer 为 None，只输出到控制台
    let (file_layer, guard) = match file_writer {
        Some(writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_logging(&config.log, cli.verbose);

    let result = match cli.command {
        Commands::Serve {
            root,
            watch,
            debounce_ms,
        } => commands::serve::run(&config, &root, watch, debounce_ms)
            .await
            .map(|_| true),
        Commands::Sync { peers } => commands::sync::run(&config, &peers).await,
        Commands::Plan { peer, all } => commands::plan::run(&config, &peer, all).await.map(|_| true),
        Commands::History {
            peer,
            limit,
            conflicts,
        } => commands::history::run(peer.as_deref(), limit, conflicts)
            .await
            .map(|_| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
