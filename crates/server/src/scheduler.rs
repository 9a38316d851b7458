use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jjob_core::{JobDefinition, SchedulerError, SchedulerResult};

use crate::cron_utils::CronScheduler;
use crate::registry::WorkerRegistry;
use crate::strategies::StrategyFactory;
use crate::trigger::{DispatchOutcome, JobTrigger};

/// 调度引擎
///
/// 持有任务表并为每个任务维护一次性定时器。任务状态机：
/// 未排期 → 已排期 → 触发中 → 续排下一次；注册Worker清零或被禁用后
/// 回到未排期。定时器回调只做"派发或跳过"判断并续排，不做阻塞工作。
pub struct SchedulingEngine {
    jobs: RwLock<HashMap<String, JobDefinition>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    registry: Arc<WorkerRegistry>,
    trigger: Arc<JobTrigger>,
    strategies: StrategyFactory,
}

impl SchedulingEngine {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        trigger: Arc<JobTrigger>,
        strategies: StrategyFactory,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            registry,
            trigger,
            strategies,
        })
    }

    /// 注册任务并记录注册Worker
    ///
    /// 首次注册以提交的定义为准，后续注册只扩充注册Worker集合，
    /// 因此同名同分组的任务不会被重复排期。
    pub async fn add_job(self: &Arc<Self>, mut job: JobDefinition, registrant_worker_id: &str) {
        let job_id = job.id.clone();
        {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(&job_id) {
                Some(existing) => {
                    existing.add_registrant(registrant_worker_id);
                }
                None => {
                    job.add_registrant(registrant_worker_id);
                    jobs.insert(job_id.clone(), job);
                }
            }
        }

        debug!("任务注册: job={}, worker={}", job_id, registrant_worker_id);
        self.arm(&job_id).await;
    }

    /// 移除任务并取消其调度
    pub async fn remove_job(&self, job_id: &str) {
        self.jobs.write().await.remove(job_id);
        self.disarm_job(job_id).await;
        info!("任务已移除: {}", job_id);
    }

    /// 取消任务调度但保留任务定义
    pub async fn disarm_job(&self, job_id: &str) {
        if let Some(handle) = self.timers.lock().await.remove(job_id) {
            handle.abort();
            info!("任务调度已取消: {}", job_id);
        }
    }

    /// 移除某个Worker在所有任务上的注册记录
    ///
    /// 注册集合清零的任务被整体取消，避免没有可派发目标的任务继续排期。
    /// Worker断连和显式注销都走这条路径。
    pub async fn cancel_by_worker(&self, worker_id: &str) {
        info!("取消Worker {} 注册的任务", worker_id);

        let mut emptied = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            for job in jobs.values_mut() {
                if job.remove_registrant(worker_id) && job.registrant_count() == 0 {
                    emptied.push(job.id.clone());
                }
            }
            for job_id in &emptied {
                jobs.remove(job_id);
            }
        }

        for job_id in &emptied {
            self.disarm_job(job_id).await;
            info!("任务 {} 已无注册Worker，调度取消", job_id);
        }
    }

    /// 手动触发一次任务，空CRON表达式的任务只能通过该路径执行
    pub async fn trigger_now(&self, job_id: &str) -> SchedulerResult<DispatchOutcome> {
        let job = self
            .jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if !job.enabled {
            return Err(SchedulerError::Configuration(format!(
                "任务已禁用: {job_id}"
            )));
        }

        self.dispatch_once(&job)
            .await
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: format!("group:{}", job.group),
            })
    }

    /// 为任务排期下一次触发
    ///
    /// CRON表达式缺失或无效时任务保持未排期，只记日志，属于配置错误
    /// 而非引擎故障。
    async fn arm(self: &Arc<Self>, job_id: &str) {
        let (cron_expr, ready) = {
            let jobs = self.jobs.read().await;
            match jobs.get(job_id) {
                Some(job) => (
                    job.cron_expression.clone(),
                    job.enabled && job.registrant_count() > 0,
                ),
                None => return,
            }
        };

        if !ready {
            debug!("任务 {} 未启用或没有注册Worker，保持未排期", job_id);
            return;
        }

        if cron_expr.trim().is_empty() {
            debug!("任务 {} 未配置CRON表达式，仅支持手动触发", job_id);
            return;
        }

        let cron = match CronScheduler::new(&cron_expr) {
            Ok(cron) => cron,
            Err(e) => {
                warn!("任务 {} 的CRON表达式无效: {}", job_id, e);
                return;
            }
        };

        let delay = match cron.delay_from(Utc::now()) {
            Some(delay) => delay,
            None => {
                warn!("任务 {} 的CRON表达式没有后续触发点，保持未排期", job_id);
                return;
            }
        };

        let mut timers = self.timers.lock().await;
        if timers.contains_key(job_id) {
            return;
        }

        let engine = Arc::clone(self);
        let timer_job_id = job_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // 触发体放到独立任务中，取消排期只会打断等待中的定时器
            let fire_engine = Arc::clone(&engine);
            tokio::spawn(async move {
                fire_engine.fire(&timer_job_id).await;
            });
        });
        timers.insert(job_id.to_string(), handle);

        debug!("任务已排期: {}，{}ms后触发", job_id, delay.as_millis());
    }

    /// 定时器触发回调：判断派发或跳过，然后无条件续排下一次
    ///
    /// 显式装箱返回一个 `Send` future：`arm` 会在新任务中 `spawn` 本函数，
    /// 而本函数又回调 `arm`，二者相互依赖导致编译器无法推断 `Send`。
    /// 装箱后 `Send` 由签名给出，打破该推断环，行为不变。
    fn fire<'a>(
        self: &'a Arc<Self>,
        job_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.timers.lock().await.remove(job_id);

            let job = self.jobs.read().await.get(job_id).cloned();
            let Some(job) = job else {
                debug!("任务 {} 已移除，停止调度", job_id);
                return;
            };

            if !job.enabled || job.registrant_count() == 0 {
                debug!("任务 {} 未启用或没有注册Worker，不再续排", job_id);
                return;
            }

            if job.single_running && self.trigger.is_running(job_id).await {
                debug!("任务 {} 已有实例在执行，跳过本次触发", job_id);
            } else {
                self.dispatch_once(&job).await;
            }

            // 跳过或派发失败都不能阻塞调度，无条件续排下一次触发
            self.arm(job_id).await;
        })
    }

    /// 执行一次派发：按分组选取在线Worker并交给触发器
    async fn dispatch_once(&self, job: &JobDefinition) -> Option<DispatchOutcome> {
        let candidates = self.registry.online_by_group(&job.group).await;
        if candidates.is_empty() {
            debug!(
                "任务 {} 所在分组 {} 没有在线Worker，本轮跳过",
                job.name, job.group
            );
            return None;
        }

        let strategy = self.strategies.get(&job.schedule_strategy);
        let worker_id = match strategy.select(&candidates, job) {
            Some(worker_id) => worker_id,
            None => {
                warn!("任务 {} 未能选出目标Worker", job.name);
                return None;
            }
        };

        let outcome = self.trigger.dispatch(job, &worker_id).await;

        // 通过了运行检查的派发都计入执行次数，通道失效的尝试也不例外
        if !matches!(outcome, DispatchOutcome::AlreadyRunning) {
            if let Some(entry) = self.jobs.write().await.get_mut(&job.id) {
                entry.execution_count += 1;
            }
        }

        Some(outcome)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobDefinition> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn jobs_snapshot(&self) -> Vec<JobDefinition> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn enabled_job_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.enabled)
            .count()
    }

    pub async fn disabled_job_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| !job.enabled)
            .count()
    }

    /// 任务当前是否已排期
    pub async fn is_armed(&self, job_id: &str) -> bool {
        self.timers.lock().await.contains_key(job_id)
    }

    /// 停止引擎，取消全部定时器
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        info!("调度引擎已停止，全部定时器释放");
    }
}
