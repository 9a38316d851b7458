use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jjob_core::AppConfig;
use jjob_server::SchedulerServer;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("jjob-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式任务调度服务端")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/jjob.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let log_level = matches.get_one::<String>("log-level").unwrap();

    init_logging(log_level);

    info!("启动分布式任务调度服务端");

    let config = load_config(config_path);
    let server = SchedulerServer::new(config.server);
    let handle = server.start().await.context("启动调度服务失败")?;

    // 进程退出绑定只放在最外层组合根
    signal::ctrl_c().await.context("等待退出信号失败")?;
    info!("收到退出信号，开始优雅关闭...");
    handle.stop().await;

    Ok(())
}

fn load_config(path: &str) -> AppConfig {
    match AppConfig::load(path) {
        Ok(config) => {
            info!("已加载配置文件: {}", path);
            config
        }
        Err(e) => {
            warn!("加载配置文件失败({e})，使用默认配置");
            AppConfig::default()
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
