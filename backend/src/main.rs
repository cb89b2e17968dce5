use anyhow::{Context, Result};
use autorec_backup::autobackup::{open_store, AutoBackupManager, TaskSelector};
use autorec_backup::{config::AppConfig, logging};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "autorec-backup")]
#[command(about = "录播文件自动备份守护进程", long_about = None)]
struct Cli {
    /// 配置文件
    #[arg(short, long, default_value = "settings.toml")]
    config: PathBuf,

    /// 任务存储文件（覆盖配置中的 autobackup.store）
    #[arg(long)]
    store: Option<PathBuf>,

    /// 按计划时间备份的目录（可重复）
    #[arg(long, value_name = "DIR")]
    add: Vec<PathBuf>,

    /// 立即备份的目录（可重复）
    #[arg(long, value_name = "DIR")]
    upload: Vec<PathBuf>,

    /// 删除任务（序号或 all）
    #[arg(short, long, value_name = "ID")]
    delete: Option<TaskSelector>,

    /// 重试存储中失败的任务（序号或 all）
    #[arg(long, value_name = "ID")]
    retry: Option<TaskSelector>,

    /// 只打印任务列表后退出
    #[arg(long)]
    show: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_or_default(&cli.config).await?;
    let _log_guard = logging::init_logging(&config.log)?;

    info!("autorec-backup v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let store_path = cli
        .store
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.autobackup.store));
    let store = open_store(&store_path)
        .with_context(|| format!("打开任务存储失败: {}", store_path.display()))?;

    let manager = AutoBackupManager::with_alist(config.autobackup.clone(), config.app.max_retries)?;
    manager.load_tasks(store.as_ref())?;

    if let Some(selector) = cli.delete {
        manager.delete_task(selector);
    }
    if let Some(selector) = cli.retry {
        manager.retry_task(selector);
    }
    for dir in &cli.add {
        manager.add_backup_default(dir, false);
    }
    for dir in &cli.upload {
        manager.add_backup_default(dir, true);
    }

    if cli.show {
        print!("{}", manager.list_tasks());
        manager.dump_tasks(store.as_ref())?;
        return Ok(());
    }

    manager.start();
    info!("按 Ctrl-C 退出");
    tokio::signal::ctrl_c().await.context("监听退出信号失败")?;

    info!("正在停止...");
    manager.stop().await;
    let saved = manager.dump_tasks(store.as_ref())?;
    info!("已保存 {} 个任务，退出", saved);

    Ok(())
}
