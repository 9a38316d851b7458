use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobDefinition;

/// 任务实例生命周期状态
///
/// `Running` 进入 `Success` 或 `Failed` 后即为终态，没有取消状态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InstanceState {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

/// 任务执行实例记录
///
/// `single_running` 在触发时从任务定义拷贝，服务端处理完成上报时
/// 不再回读任务配置，避免配置中途变更引起的竞态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub job_id: String,
    pub job_name: String,
    pub instance_id: String,
    pub worker_id: String,
    pub state: InstanceState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// 执行时长（毫秒），终态时写入
    pub elapsed_ms: i64,
    pub single_running: bool,
}

impl JobInstance {
    /// 创建处于执行中状态的实例记录
    pub fn running(
        job: &JobDefinition,
        instance_id: impl Into<String>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            instance_id: instance_id.into(),
            worker_id: worker_id.into(),
            state: InstanceState::Running,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
            elapsed_ms: 0,
            single_running: job.single_running,
        }
    }

    /// 标记执行成功
    pub fn succeed(&mut self) {
        self.finish(InstanceState::Success, None);
    }

    /// 标记执行失败并记录错误信息
    pub fn fail(&mut self, error_message: impl Into<String>) {
        self.finish(InstanceState::Failed, Some(error_message.into()));
    }

    fn finish(&mut self, state: InstanceState, error_message: Option<String>) {
        let now = Utc::now();
        self.state = state;
        self.end_time = Some(now);
        self.error_message = error_message;
        self.elapsed_ms = (now - self.start_time).num_milliseconds();
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, InstanceState::Success | InstanceState::Failed)
    }
}

/// 任务执行结果上报
///
/// 执行器返回文本输出时随JOB_RESULT_REPORT上报，服务端仅记录日志，
/// 执行计数只在状态上报路径更新。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub job_name: String,
    pub instance_id: String,
    pub worker_id: String,
    pub output: String,
}
