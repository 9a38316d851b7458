use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use jjob_core::WorkerInfo;

/// Worker注册表
///
/// 维护已连接Worker的元数据和心跳时间。心跳超时只标记离线，
/// 历史统计保留可见，显式注销才会删除记录。
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerInfo>>,
    /// 连接通道ID到Worker ID的映射
    channel_workers: RwLock<HashMap<String, String>>,
    heartbeat_timeout_seconds: i64,
}

impl WorkerRegistry {
    pub fn new(heartbeat_timeout_seconds: u64) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            channel_workers: RwLock::new(HashMap::new()),
            heartbeat_timeout_seconds: heartbeat_timeout_seconds as i64,
        }
    }

    /// 注册Worker并记录通道映射
    pub async fn register(&self, channel_id: &str, info: WorkerInfo) {
        debug!(
            "Worker注册: id={}, application={}, group={}",
            info.id, info.application_name, info.group
        );
        self.channel_workers
            .write()
            .await
            .insert(channel_id.to_string(), info.id.clone());
        self.workers.write().await.insert(info.id.clone(), info);
    }

    /// 刷新Worker心跳，返回该Worker是否已知
    pub async fn heartbeat(&self, worker_id: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(worker_id) {
            Some(worker) => {
                worker.last_heartbeat = Utc::now();
                if !worker.online {
                    worker.online = true;
                    info!("Worker恢复在线: {}", worker_id);
                }
                true
            }
            None => false,
        }
    }

    /// 注销Worker并清除其通道映射
    pub async fn unregister(&self, worker_id: &str) {
        self.workers.write().await.remove(worker_id);
        self.channel_workers
            .write()
            .await
            .retain(|_, id| id != worker_id);
        info!("Worker已注销: {}", worker_id);
    }

    /// 根据通道ID查找Worker ID
    pub async fn worker_id_by_channel(&self, channel_id: &str) -> Option<String> {
        self.channel_workers.read().await.get(channel_id).cloned()
    }

    pub async fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.read().await.get(worker_id).cloned()
    }

    pub async fn all_workers(&self) -> Vec<WorkerInfo> {
        self.workers.read().await.values().cloned().collect()
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// 按分组获取在线Worker，调度策略的候选集读取路径
    pub async fn online_by_group(&self, group: &str) -> Vec<WorkerInfo> {
        self.workers
            .read()
            .await
            .values()
            .filter(|worker| worker.online && worker.group == group)
            .cloned()
            .collect()
    }

    /// 累加Worker的成功执行次数
    pub async fn record_success(&self, worker_id: &str) {
        if let Some(worker) = self.workers.write().await.get_mut(worker_id) {
            worker.execution_count += 1;
            debug!(
                "Worker {} 成功执行次数更新为 {}",
                worker_id, worker.execution_count
            );
        }
    }

    /// 清理超时Worker：标记离线并清除通道映射，返回本次新转为离线的Worker ID
    ///
    /// 记录本身保留，便于运维审计；后续对其派发会因通道缺失快速失败。
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut newly_offline = Vec::new();
        {
            let mut workers = self.workers.write().await;
            for worker in workers.values_mut() {
                if worker.online
                    && worker.is_heartbeat_expired(self.heartbeat_timeout_seconds, now)
                {
                    worker.online = false;
                    warn!("Worker心跳超时，标记为离线: {}", worker.id);
                    newly_offline.push(worker.id.clone());
                }
            }
        }

        if !newly_offline.is_empty() {
            self.channel_workers
                .write()
                .await
                .retain(|_, id| !newly_offline.contains(id));
        }

        newly_offline
    }
}
