use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Arg, Command};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jjob_core::{AppConfig, JobDefinition, SchedulerResult};
use jjob_worker::{ExecutorFactory, FnExecutor, JobExecutor, JobSpec, WorkerClient};

/// 示例单例任务执行器，验证与服务端的通信和CRON调度
struct DemoExecutor;

#[async_trait]
impl JobExecutor for DemoExecutor {
    async fn init(&self) -> SchedulerResult<()> {
        info!("示例任务执行器初始化");
        Ok(())
    }

    async fn execute(&self, job: &JobDefinition) -> SchedulerResult<Option<String>> {
        info!("执行示例任务: {}", job.id);
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(Some(format!("示例任务执行成功: {}", job.name)))
    }

    async fn destroy(&self) {
        info!("示例任务执行器销毁");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("jjob-worker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式任务调度Worker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/jjob.toml"),
        )
        .arg(
            Arg::new("server-host")
                .long("server-host")
                .value_name("HOST")
                .help("调度服务地址"),
        )
        .arg(
            Arg::new("server-port")
                .long("server-port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("调度服务端口"),
        )
        .arg(
            Arg::new("group")
                .short('g')
                .long("group")
                .value_name("GROUP")
                .help("Worker分组"),
        )
        .arg(
            Arg::new("application")
                .short('a')
                .long("application")
                .value_name("NAME")
                .help("应用名称"),
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

    info!("启动分布式任务调度Worker");

    let mut config = load_config(config_path).worker;
    if let Some(host) = matches.get_one::<String>("server-host") {
        config.server_host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("server-port") {
        config.server_port = *port;
    }
    if let Some(group) = matches.get_one::<String>("group") {
        config.group = group.clone();
    }
    if let Some(application) = matches.get_one::<String>("application") {
        config.application_name = application.clone();
    }

    let group = config.group.clone();
    let client = WorkerClient::new(config);

    // 单例任务：每5秒触发一次，同一时间只允许一个实例
    client
        .register_singleton(
            JobSpec::new("demoJob", &group)
                .cron("*/5 * * * * *")
                .description("每5秒执行一次的示例任务")
                .single_running(true),
            Arc::new(DemoExecutor),
        )
        .await
        .context("注册示例任务失败")?;

    // 瞬时任务：每分钟触发，每次触发构建全新执行器
    let report_factory: Arc<dyn ExecutorFactory> = Arc::new(|| -> Box<dyn JobExecutor> {
        Box::new(FnExecutor::new(|job: &JobDefinition| {
            info!("执行报表任务: {}", job.id);
            Ok(None)
        }))
    });
    client
        .register_transient(
            JobSpec::new("reportJob", &group)
                .cron("0 * * * * *")
                .description("每分钟执行一次的报表任务"),
            report_factory,
        )
        .await
        .context("注册报表任务失败")?;

    client.start().await.context("启动Worker失败")?;

    // 进程退出绑定只放在最外层组合根
    signal::ctrl_c().await.context("等待退出信号失败")?;
    info!("收到退出信号，开始优雅关闭...");
    client.stop().await;

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
