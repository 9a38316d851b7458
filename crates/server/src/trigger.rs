use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use jjob_core::{JobDefinition, Message};

/// 一次派发的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 触发消息已写入Worker通道，携带本次实例ID
    Sent { instance_id: String },
    /// singleRunning任务已有实例在执行，本次为空操作
    AlreadyRunning,
    /// 目标Worker通道缺失或不可写
    ChannelUnavailable,
}

/// 任务触发器
///
/// 持有Worker出站通道映射和执行中任务的运行标记。
/// 通道的绑定与解绑由连接生命周期驱动，与注册表的记录相互独立。
pub struct JobTrigger {
    channels: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
    /// 运行标记集合，存在即表示该任务有实例在执行
    running_jobs: Mutex<HashSet<String>>,
}

impl JobTrigger {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            running_jobs: Mutex::new(HashSet::new()),
        }
    }

    /// 绑定Worker出站通道
    pub async fn bind_channel(&self, worker_id: &str, sender: mpsc::UnboundedSender<Message>) {
        self.channels
            .write()
            .await
            .insert(worker_id.to_string(), sender);
        debug!("Worker通道已绑定: {}", worker_id);
    }

    /// 解绑Worker出站通道
    pub async fn unbind_channel(&self, worker_id: &str) {
        self.channels.write().await.remove(worker_id);
        debug!("Worker通道已解绑: {}", worker_id);
    }

    /// 检查任务是否有实例在执行
    pub async fn is_running(&self, job_id: &str) -> bool {
        self.running_jobs.lock().await.contains(job_id)
    }

    /// 派发任务到指定Worker
    ///
    /// singleRunning任务先以单次插入完成"检查并标记"，已在执行则空操作。
    /// 通道不可用时立即清除运行标记，死亡的Worker不会永久卡住任务。
    pub async fn dispatch(&self, job: &JobDefinition, worker_id: &str) -> DispatchOutcome {
        if job.single_running && !self.running_jobs.lock().await.insert(job.id.clone()) {
            debug!("任务 {} 已有实例在执行，跳过本次触发", job.id);
            return DispatchOutcome::AlreadyRunning;
        }

        let instance_id = uuid::Uuid::new_v4().to_string();

        // 触发消息携带本次派发后的执行次数
        let mut snapshot = job.clone();
        snapshot.execution_count += 1;
        let message = match Message::job_trigger(instance_id.clone(), worker_id, &snapshot) {
            Ok(message) => message,
            Err(e) => {
                warn!("构建任务触发消息失败: job={}, error={}", job.id, e);
                self.clear_running(&job.id).await;
                return DispatchOutcome::ChannelUnavailable;
            }
        };

        let sender = self.channels.read().await.get(worker_id).cloned();
        match sender {
            Some(sender) if sender.send(message).is_ok() => {
                debug!(
                    "任务已触发: job={}, worker={}, instance={}, 执行次数={}",
                    job.name, worker_id, instance_id, snapshot.execution_count
                );
                DispatchOutcome::Sent { instance_id }
            }
            Some(_) => {
                warn!(
                    "无法触发任务 {}: Worker {} 通道已关闭",
                    job.name, worker_id
                );
                self.unbind_channel(worker_id).await;
                self.clear_running(&job.id).await;
                DispatchOutcome::ChannelUnavailable
            }
            None => {
                warn!("无法触发任务 {}: Worker {} 无可用通道", job.name, worker_id);
                self.clear_running(&job.id).await;
                DispatchOutcome::ChannelUnavailable
            }
        }
    }

    /// 任务完成通知
    ///
    /// 仅当实例携带的singleRunning为true时清除运行标记，
    /// 并行任务从未被标记，无需清除。
    pub async fn complete(&self, job_id: &str, single_running: bool) {
        if !single_running {
            debug!("任务 {} 完成，允许多实例并行，无运行标记可清除", job_id);
            return;
        }

        if self.running_jobs.lock().await.remove(job_id) {
            debug!("任务 {} 运行标记已清除，可再次触发", job_id);
        } else {
            debug!("任务 {} 未处于运行标记中", job_id);
        }
    }

    async fn clear_running(&self, job_id: &str) {
        self.running_jobs.lock().await.remove(job_id);
    }
}

impl Default for JobTrigger {
    fn default() -> Self {
        Self::new()
    }
}
