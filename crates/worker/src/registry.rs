use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use jjob_core::{JobDefinition, SchedulerError, SchedulerResult};

use crate::executor::{ExecutorFactory, JobExecutor};

/// 本地任务声明
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub group: String,
    pub cron_expression: String,
    pub description: String,
    pub single_running: bool,
    pub schedule_strategy: String,
    pub params: HashMap<String, serde_json::Value>,
    /// 执行器目录引用，供未注册该任务的同组Worker解析
    pub target_ref: Option<String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            cron_expression: String::new(),
            description: String::new(),
            single_running: false,
            schedule_strategy: String::new(),
            params: HashMap::new(),
            target_ref: None,
        }
    }

    pub fn cron(mut self, cron_expression: impl Into<String>) -> Self {
        self.cron_expression = cron_expression.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn single_running(mut self, single_running: bool) -> Self {
        self.single_running = single_running;
        self
    }

    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.schedule_strategy = strategy.into();
        self
    }

    pub fn params(mut self, params: HashMap<String, serde_json::Value>) -> Self {
        self.params = params;
        self
    }

    pub fn target_ref(mut self, target_ref: impl Into<String>) -> Self {
        self.target_ref = Some(target_ref.into());
        self
    }

    fn into_definition(self) -> JobDefinition {
        let mut job = JobDefinition::new(self.name, self.group, self.cron_expression)
            .with_single_running(self.single_running)
            .with_strategy(self.schedule_strategy)
            .with_description(self.description)
            .with_params(self.params);
        if let Some(target_ref) = self.target_ref {
            job = job.with_target_ref(target_ref);
        }
        job
    }
}

/// 触发时获取到的执行器租约
pub enum ExecutorLease {
    /// 单例实例，复用且不销毁
    Singleton(Arc<dyn JobExecutor>),
    /// 全新实例，使用方负责init与destroy
    Transient(Box<dyn JobExecutor>),
}

/// 本地任务注册表
///
/// 同时持有单例活实例、按任务的工厂引用以及具名的执行器目录。
/// 任务ID推导方式与服务端一致，独立进程注册同一任务时在服务端
/// 收敛为一条记录。
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobDefinition>>,
    singletons: RwLock<HashMap<String, Arc<dyn JobExecutor>>>,
    factories: RwLock<HashMap<String, Arc<dyn ExecutorFactory>>>,
    /// 具名执行器目录：target_ref → 工厂
    targets: RwLock<HashMap<String, Arc<dyn ExecutorFactory>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            singletons: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
        }
    }

    /// 注册单例任务：执行器立即初始化，此后所有触发复用该实例
    pub async fn register_singleton(
        &self,
        spec: JobSpec,
        executor: Arc<dyn JobExecutor>,
    ) -> SchedulerResult<JobDefinition> {
        let job = self.insert_job(spec).await?;

        if let Err(e) = executor.init().await {
            self.jobs.write().await.remove(&job.id);
            return Err(SchedulerError::Execution(format!(
                "初始化单例执行器失败: {} - {e}",
                job.id
            )));
        }

        self.singletons
            .write()
            .await
            .insert(job.id.clone(), executor);
        info!("单例任务已注册: {} (分组: {})", job.name, job.group);
        Ok(job)
    }

    /// 注册瞬时任务：每次触发由工厂构建全新实例
    pub async fn register_transient(
        &self,
        spec: JobSpec,
        factory: Arc<dyn ExecutorFactory>,
    ) -> SchedulerResult<JobDefinition> {
        let job = self.insert_job(spec).await?;
        self.factories.write().await.insert(job.id.clone(), factory);
        info!("瞬时任务已注册: {} (分组: {})", job.name, job.group);
        Ok(job)
    }

    /// 注册具名执行器目录项
    ///
    /// 同组其他Worker注册的任务派发到本进程时按 `target_ref` 在目录中
    /// 解析，未命中视为配置错误，不做任何动态加载。
    pub async fn register_target(&self, target_ref: &str, factory: Arc<dyn ExecutorFactory>) {
        self.targets
            .write()
            .await
            .insert(target_ref.to_string(), factory);
        info!("执行器目录项已注册: {}", target_ref);
    }

    fn validate_spec(spec: &JobSpec) -> SchedulerResult<()> {
        if spec.name.trim().is_empty() {
            return Err(SchedulerError::Configuration(
                "任务名称不能为空".to_string(),
            ));
        }
        if spec.group.trim().is_empty() {
            return Err(SchedulerError::Configuration(
                "任务分组不能为空".to_string(),
            ));
        }
        Ok(())
    }

    async fn insert_job(&self, spec: JobSpec) -> SchedulerResult<JobDefinition> {
        Self::validate_spec(&spec)?;
        let job = spec.into_definition();

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(SchedulerError::Configuration(format!(
                "分组 {} 中已存在同名任务: {}",
                job.group, job.name
            )));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// 为一次触发解析执行器
    ///
    /// 解析顺序：单例活实例 → 按任务的工厂 → 具名目录引用，
    /// 全部未命中视为配置错误。
    pub async fn acquire(&self, job: &JobDefinition) -> SchedulerResult<ExecutorLease> {
        if let Some(executor) = self.singletons.read().await.get(&job.id) {
            return Ok(ExecutorLease::Singleton(Arc::clone(executor)));
        }

        if let Some(factory) = self.factories.read().await.get(&job.id) {
            return Ok(ExecutorLease::Transient(factory.create()));
        }

        if !job.target_ref.is_empty() {
            if let Some(factory) = self.targets.read().await.get(&job.target_ref) {
                debug!("按目录引用解析执行器: {} -> {}", job.id, job.target_ref);
                return Ok(ExecutorLease::Transient(factory.create()));
            }
            return Err(SchedulerError::Configuration(format!(
                "未知的执行器引用: {}",
                job.target_ref
            )));
        }

        Err(SchedulerError::Configuration(format!(
            "任务 {} 没有已注册的执行器",
            job.id
        )))
    }

    /// 注销任务，单例实例随之销毁
    pub async fn unregister(&self, job_id: &str) {
        self.jobs.write().await.remove(job_id);
        self.factories.write().await.remove(job_id);

        if let Some(executor) = self.singletons.write().await.remove(job_id) {
            executor.destroy().await;
            debug!("单例执行器已销毁: {}", job_id);
        }

        info!("任务已注销: {}", job_id);
    }

    pub async fn job(&self, job_id: &str) -> Option<JobDefinition> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// 本地任务清单，重连时整体重放到服务端
    pub async fn all_jobs(&self) -> Vec<JobDefinition> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// 停机清理：销毁全部单例执行器，任务清单保留到进程结束
    pub async fn shutdown(&self) {
        let singletons: Vec<(String, Arc<dyn JobExecutor>)> =
            self.singletons.write().await.drain().collect();
        for (job_id, executor) in singletons {
            executor.destroy().await;
            debug!("停机销毁单例执行器: {}", job_id);
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
