use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// 任务定义
///
/// 任务ID由名称和分组推导，不同Worker进程注册同一任务时收敛为
/// 服务端的同一条记录，重复注册只会扩充注册Worker集合。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    pub group: String,
    /// CRON表达式，空串表示仅支持手动触发
    pub cron_expression: String,
    /// 执行器目录中的显式引用，Worker本地未注册该任务时使用
    #[serde(default)]
    pub target_ref: String,
    /// 任务参数
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub execution_count: u64,
    /// 为true时同一任务同时只允许一个实例在执行
    pub single_running: bool,
    /// 调度策略：roundRobin/random/weighted，空串使用默认策略
    #[serde(default)]
    pub schedule_strategy: String,
    /// 注册该任务的Worker集合，变更统一经过调度引擎
    #[serde(default)]
    registered_workers: HashSet<String>,
}

impl JobDefinition {
    /// 由任务名称和分组推导任务ID
    pub fn job_id(name: &str, group: &str) -> String {
        format!("{name}_{group}")
    }

    /// 创建新任务定义
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let group = group.into();
        Self {
            id: Self::job_id(&name, &group),
            name,
            group,
            cron_expression: cron_expression.into(),
            target_ref: String::new(),
            params: HashMap::new(),
            description: String::new(),
            enabled: true,
            execution_count: 0,
            single_running: false,
            schedule_strategy: String::new(),
            registered_workers: HashSet::new(),
        }
    }

    pub fn with_single_running(mut self, single_running: bool) -> Self {
        self.single_running = single_running;
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.schedule_strategy = strategy.into();
        self
    }

    pub fn with_target_ref(mut self, target_ref: impl Into<String>) -> Self {
        self.target_ref = target_ref.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: HashMap<String, serde_json::Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 注册该任务的Worker集合（只读视图）
    pub fn registrants(&self) -> &HashSet<String> {
        &self.registered_workers
    }

    pub fn registrant_count(&self) -> usize {
        self.registered_workers.len()
    }

    pub fn is_registered(&self, worker_id: &str) -> bool {
        self.registered_workers.contains(worker_id)
    }

    /// 添加注册Worker，返回是否为新增
    pub fn add_registrant(&mut self, worker_id: impl Into<String>) -> bool {
        self.registered_workers.insert(worker_id.into())
    }

    /// 移除注册Worker，返回该Worker此前是否已注册
    pub fn remove_registrant(&mut self, worker_id: &str) -> bool {
        self.registered_workers.remove(worker_id)
    }

    /// 是否配置了CRON表达式
    pub fn has_cron(&self) -> bool {
        !self.cron_expression.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_content_derived() {
        assert_eq!(JobDefinition::job_id("nightly", "groupA"), "nightly_groupA");

        let a = JobDefinition::new("nightly", "groupA", "0 0 2 * * *");
        let b = JobDefinition::new("nightly", "groupA", "0 0 2 * * *");
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_registrant_set_mutation() {
        let mut job = JobDefinition::new("sync", "groupA", "");
        assert_eq!(job.registrant_count(), 0);

        assert!(job.add_registrant("w1"));
        assert!(!job.add_registrant("w1"));
        assert!(job.add_registrant("w2"));
        assert_eq!(job.registrant_count(), 2);
        assert!(job.is_registered("w1"));

        assert!(job.remove_registrant("w1"));
        assert!(!job.remove_registrant("w1"));
        assert_eq!(job.registrant_count(), 1);
    }

    #[test]
    fn test_registrants_survive_serialization() {
        let mut job = JobDefinition::new("sync", "groupA", "0 * * * * *").with_single_running(true);
        job.add_registrant("w1");

        let json = serde_json::to_string(&job).unwrap();
        let decoded: JobDefinition = serde_json::from_str(&json).unwrap();
        assert!(decoded.is_registered("w1"));
        assert!(decoded.single_running);
        assert!(decoded.has_cron());
    }
}
