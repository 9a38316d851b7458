//! 配置模型
//!
//! 服务端与Worker共用一份TOML配置文件，各自读取对应的配置段。
//! 所有字段都有默认值，缺失的段按默认配置运行。

use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// 从TOML文件加载配置
    pub fn load(path: &str) -> SchedulerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SchedulerError::Configuration(format!("解析配置文件失败: {e}")))
    }
}

/// 服务端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 心跳超时（秒），超时的Worker被标记离线
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
    #[serde(default = "default_sweep_initial_delay")]
    pub sweep_initial_delay_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// 终态实例记录的保留时长（秒）
    #[serde(default = "default_instance_retention")]
    pub instance_retention_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            sweep_initial_delay_seconds: default_sweep_initial_delay(),
            sweep_interval_seconds: default_sweep_interval(),
            instance_retention_seconds: default_instance_retention(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Worker配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// 调度权重，最小为1
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub pool: ExecutionPoolConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_port(),
            group: default_group(),
            application_name: default_application_name(),
            weight: default_weight(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            pool: ExecutionPoolConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// 心跳配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_initial_delay")]
    pub initial_delay_seconds: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            initial_delay_seconds: default_heartbeat_initial_delay(),
            interval_seconds: default_heartbeat_interval(),
        }
    }
}

/// 重连配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_initial_delay")]
    pub initial_delay_seconds: u64,
    #[serde(default = "default_reconnect_interval")]
    pub interval_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_seconds: default_reconnect_initial_delay(),
            interval_seconds: default_reconnect_interval(),
        }
    }
}

/// 任务执行线程池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPoolConfig {
    /// 并发执行任务的Worker数量，默认取可用并行度
    #[serde(default = "default_pool_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 停机时等待任务完成的宽限期（秒）
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ExecutionPoolConfig {
    fn default() -> Self {
        Self {
            workers: default_pool_workers(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_sweep_initial_delay() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_instance_retention() -> u64 {
    3600
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_group() -> String {
    "default".to_string()
}

fn default_application_name() -> String {
    "jjob-worker".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_heartbeat_initial_delay() -> u64 {
    10
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_reconnect_initial_delay() -> u64 {
    5
}

fn default_reconnect_interval() -> u64 {
    10
}

fn default_pool_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_queue_capacity() -> usize {
    100
}

fn default_shutdown_grace() -> u64 {
    5
}
