use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use jjob_core::JobInstance;

/// 任务实例状态监控
///
/// 按实例ID记录最近一次上报的状态，供控制台只读查询。
pub struct InstanceMonitor {
    instances: RwLock<HashMap<String, JobInstance>>,
}

impl InstanceMonitor {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// 记录实例状态上报
    pub async fn record(&self, instance: JobInstance) {
        debug!(
            "实例状态更新: job={}, instance={}, state={:?}",
            instance.job_id, instance.instance_id, instance.state
        );
        self.instances
            .write()
            .await
            .insert(instance.instance_id.clone(), instance);
    }

    pub async fn get(&self, instance_id: &str) -> Option<JobInstance> {
        self.instances.read().await.get(instance_id).cloned()
    }

    /// 获取某个任务的全部实例记录
    pub async fn instances_of_job(&self, job_id: &str) -> Vec<JobInstance> {
        self.instances
            .read()
            .await
            .values()
            .filter(|instance| instance.job_id == job_id)
            .cloned()
            .collect()
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// 清理结束时间早于保留窗口的终态实例
    pub async fn cleanup_finished_before(&self, retention: Duration, now: DateTime<Utc>) {
        self.instances.write().await.retain(|_, instance| {
            match (instance.is_terminal(), instance.end_time) {
                (true, Some(end_time)) => now - end_time <= retention,
                _ => true,
            }
        });
    }
}

impl Default for InstanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
