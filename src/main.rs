use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use executor_config::AppConfig;
use executor_infrastructure::{init_logging, LogFormat};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::Application;
use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("rbd-executor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("应用构建与组备份恢复任务执行器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径, 缺省时依次查找默认位置"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别, 覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式, 覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>")))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        LogFormat::parse(&config.observability.log_format),
    )
    .context("初始化日志失败")?;

    info!("启动任务执行器");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("执行器运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    if let Err(e) = app_handle.await {
        error!("消费循环异常退出: {e}");
    }
    if let Err(e) = app.stop().await {
        warn!("关闭执行器时发生错误: {e}");
    }

    info!("任务执行器已退出");
    Ok(())
}

/// 等待 SIGINT 或 SIGTERM, 信号处理器安装失败时只等待另一路
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
