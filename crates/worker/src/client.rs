use std::sync::Arc;

use jjob_core::{JobDefinition, SchedulerResult, WorkerConfig, WorkerInfo};

use crate::connection::ConnectionManager;
use crate::execution::ExecutionEngine;
use crate::executor::{ExecutorFactory, JobExecutor};
use crate::registry::{JobRegistry, JobSpec};

/// Worker客户端门面
///
/// 组装任务注册表、执行引擎与连接管理器。进程退出绑定（信号处理等）
/// 由外层组合根负责，这里只提供显式的start/stop。
pub struct WorkerClient {
    registry: Arc<JobRegistry>,
    connection: Arc<ConnectionManager>,
}

impl WorkerClient {
    pub fn new(config: WorkerConfig) -> Self {
        let host_name = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let info = WorkerInfo::new(host_name, config.group.clone(), config.application_name.clone())
            .with_weight(config.weight);

        let registry = Arc::new(JobRegistry::new());
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&registry),
            info.id.clone(),
            &config.pool,
        ));
        let connection = ConnectionManager::new(config, info, Arc::clone(&registry), engine);

        Self {
            registry,
            connection,
        }
    }

    /// 注册单例任务并推送到服务端
    pub async fn register_singleton(
        &self,
        spec: JobSpec,
        executor: Arc<dyn JobExecutor>,
    ) -> SchedulerResult<JobDefinition> {
        let job = self.registry.register_singleton(spec, executor).await?;
        self.connection.announce_job(&job).await?;
        Ok(job)
    }

    /// 注册瞬时任务并推送到服务端
    pub async fn register_transient(
        &self,
        spec: JobSpec,
        factory: Arc<dyn ExecutorFactory>,
    ) -> SchedulerResult<JobDefinition> {
        let job = self.registry.register_transient(spec, factory).await?;
        self.connection.announce_job(&job).await?;
        Ok(job)
    }

    /// 注册具名执行器目录项
    pub async fn register_target(&self, target_ref: &str, factory: Arc<dyn ExecutorFactory>) {
        self.registry.register_target(target_ref, factory).await;
    }

    /// 启动客户端：连接服务端并启动心跳与重连
    pub async fn start(&self) -> SchedulerResult<()> {
        self.connection.start().await
    }

    /// 优雅停止客户端
    pub async fn stop(&self) {
        self.connection.stop().await;
    }

    pub async fn worker_info(&self) -> WorkerInfo {
        self.connection.worker_info().await
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }
}
