use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Worker节点信息
///
/// `id` 在Worker进程启动时生成一次，重连后保持不变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub host_name: String,
    pub ip_address: String,
    pub group: String,
    pub application_name: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// 累计成功执行次数
    pub execution_count: u64,
    /// 调度权重，最小为1
    pub weight: u32,
    pub online: bool,
}

impl WorkerInfo {
    /// 创建新的Worker信息
    pub fn new(
        host_name: impl Into<String>,
        group: impl Into<String>,
        application_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            host_name: host_name.into(),
            ip_address: String::new(),
            group: group.into(),
            application_name: application_name.into(),
            registered_at: now,
            last_heartbeat: now,
            execution_count: 0,
            weight: 1,
            online: true,
        }
    }

    /// 设置调度权重（最小为1）
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, timeout_seconds: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() > timeout_seconds
    }

    /// 参与加权调度的有效权重
    pub fn effective_weight(&self) -> u32 {
        if self.weight > 0 {
            self.weight
        } else {
            1
        }
    }
}
