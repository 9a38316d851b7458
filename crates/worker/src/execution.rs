use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jjob_core::{
    ExecutionPoolConfig, JobDefinition, JobInstance, JobResult, Message, SchedulerError,
    SchedulerResult,
};

use crate::registry::{ExecutorLease, JobRegistry};

type PoolJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// 提交失败的原因
pub enum SubmitError {
    /// 队列已满，任务返还给提交方
    Saturated(PoolJob),
    /// 线程池已停止
    Unavailable,
}

/// 有界任务执行线程池
///
/// 固定数量的常驻任务从有界队列取任务体执行，队列满时提交方
/// 得到显式拒绝而不是无界堆积。
pub struct ExecutionPool {
    sender: Mutex<Option<mpsc::Sender<PoolJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionPool {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let worker_count = workers.max(1);
        let (sender, receiver) = mpsc::channel::<PoolJob>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..worker_count)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    debug!("执行线程 {} 启动", index);
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!("执行线程 {} 退出", index);
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        }
    }

    /// 尝试提交任务体
    pub async fn try_submit(&self, job: PoolJob) -> Result<(), SubmitError> {
        let sender = self.sender.lock().await.clone();
        match sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(job)) => Err(SubmitError::Saturated(job)),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::Unavailable),
            },
            None => Err(SubmitError::Unavailable),
        }
    }

    /// 停机：不再接收新任务，宽限期内等待在执行任务完成，超时强制取消
    pub async fn shutdown(&self, grace: Duration) {
        self.sender.lock().await.take();

        let mut workers = self.workers.lock().await;
        let deadline = tokio::time::Instant::now() + grace;
        for (index, mut handle) in workers.drain(..).enumerate() {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("执行线程 {} 未在宽限期内退出，强制终止", index);
                handle.abort();
            }
        }
        info!("任务执行线程池已停止");
    }
}

/// 任务执行引擎
///
/// 收到触发后立即上报RUNNING，任务体交给有界线程池执行，
/// 网络读循环不被任务体阻塞。终态上报在所有路径上发出。
pub struct ExecutionEngine {
    registry: Arc<JobRegistry>,
    pool: ExecutionPool,
    worker_id: String,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<JobRegistry>, worker_id: String, config: &ExecutionPoolConfig) -> Self {
        Self {
            registry,
            pool: ExecutionPool::new(config.workers, config.queue_capacity),
            worker_id,
        }
    }

    /// 处理一次任务触发
    pub async fn handle_trigger(
        &self,
        job: JobDefinition,
        instance_id: String,
        outbound: mpsc::UnboundedSender<Message>,
    ) {
        let instance = JobInstance::running(&job, instance_id, self.worker_id.clone());
        debug!(
            "收到任务触发: job={}, instance={}",
            job.id, instance.instance_id
        );

        // 先上报RUNNING，启动延迟对服务端可见
        Self::send_report(&self.worker_id, &outbound, &instance);

        let mut rejected_instance = instance.clone();
        let registry = Arc::clone(&self.registry);
        let worker_id = self.worker_id.clone();
        let job_body: PoolJob = Box::pin(Self::execute_instance(
            registry, worker_id, job, instance, outbound.clone(),
        ));

        match self.pool.try_submit(job_body).await {
            Ok(()) => {}
            Err(SubmitError::Saturated(job_body)) => {
                // 队列满时回退到提交方同步执行，不静默丢弃触发
                warn!(
                    "执行队列已满，回退到提交方同步执行: instance={}",
                    rejected_instance.instance_id
                );
                job_body.await;
            }
            Err(SubmitError::Unavailable) => {
                error!(
                    "执行线程池不可用，任务直接标记失败: instance={}",
                    rejected_instance.instance_id
                );
                rejected_instance.fail("任务执行线程池不可用");
                Self::send_report(&self.worker_id, &outbound, &rejected_instance);
            }
        }
    }

    /// 执行一个实例并上报终态
    async fn execute_instance(
        registry: Arc<JobRegistry>,
        worker_id: String,
        job: JobDefinition,
        mut instance: JobInstance,
        outbound: mpsc::UnboundedSender<Message>,
    ) {
        match Self::run_executor(&registry, &job).await {
            Ok(output) => {
                instance.succeed();
                debug!(
                    "任务执行成功: job={}, instance={}, 耗时={}ms",
                    job.id, instance.instance_id, instance.elapsed_ms
                );

                if let Some(output) = output {
                    let result = JobResult {
                        job_id: job.id.clone(),
                        job_name: job.name.clone(),
                        instance_id: instance.instance_id.clone(),
                        worker_id: worker_id.clone(),
                        output,
                    };
                    match Message::result_report(&worker_id, &result) {
                        Ok(message) => {
                            let _ = outbound.send(message);
                        }
                        Err(e) => debug!("构建结果上报消息失败: {}", e),
                    }
                }
            }
            Err(e) => {
                error!(
                    "任务执行失败: job={}, instance={}, error={}",
                    job.id, instance.instance_id, e
                );
                instance.fail(e.to_string());
            }
        }

        Self::send_report(&worker_id, &outbound, &instance);
    }

    /// 解析执行器并运行任务体
    ///
    /// 瞬时实例按 构建 → 初始化 → 执行 → 销毁 走完整生命周期，
    /// 初始化失败或执行抛错都不会跳过销毁；单例只执行，不销毁。
    async fn run_executor(
        registry: &Arc<JobRegistry>,
        job: &JobDefinition,
    ) -> SchedulerResult<Option<String>> {
        match registry.acquire(job).await? {
            ExecutorLease::Singleton(executor) => Self::run_guarded(executor.execute(job)).await,
            ExecutorLease::Transient(executor) => {
                let result = match Self::run_guarded(executor.init()).await {
                    Ok(()) => Self::run_guarded(executor.execute(job)).await,
                    Err(e) => Err(SchedulerError::Execution(format!("初始化执行器失败: {e}"))),
                };
                executor.destroy().await;
                result
            }
        }
    }

    /// 捕获任务体panic，转为执行失败
    async fn run_guarded<T>(
        body: impl Future<Output = SchedulerResult<T>>,
    ) -> SchedulerResult<T> {
        match AssertUnwindSafe(body).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Execution("任务执行过程发生panic".to_string())),
        }
    }

    fn send_report(
        worker_id: &str,
        outbound: &mpsc::UnboundedSender<Message>,
        instance: &JobInstance,
    ) {
        match Message::status_report(worker_id, instance) {
            Ok(message) => {
                if outbound.send(message).is_err() {
                    warn!(
                        "状态上报失败，连接不可用: instance={}",
                        instance.instance_id
                    );
                }
            }
            Err(e) => error!("构建状态上报消息失败: {}", e),
        }
    }

    /// 停止执行引擎
    pub async fn shutdown(&self, grace: Duration) {
        self.pool.shutdown(grace).await;
    }
}
