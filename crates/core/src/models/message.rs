use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobDefinition, JobInstance, JobResult, WorkerInfo};
use crate::errors::SchedulerResult;

/// 消息类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    #[serde(rename = "WORKER_REGISTER")]
    WorkerRegister,
    #[serde(rename = "WORKER_HEARTBEAT")]
    WorkerHeartbeat,
    #[serde(rename = "WORKER_UNREGISTER")]
    WorkerUnregister,
    #[serde(rename = "JOB_TRIGGER")]
    JobTrigger,
    #[serde(rename = "JOB_STATUS_REPORT")]
    JobStatusReport,
    #[serde(rename = "JOB_RESULT_REPORT")]
    JobResultReport,
    #[serde(rename = "SERVER_RESPONSE")]
    ServerResponse,
}

/// 协议消息信封
///
/// `payload` 为不透明JSON，具体类型由 `kind` 决定。JOB_STATUS_REPORT
/// 既承载 `JobInstance` 状态上报也承载 `JobDefinition` 任务注册，
/// 服务端按类型化解码区分两者。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    /// 发送方Worker ID，服务端响应时为空
    pub worker_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Message {
    fn envelope(kind: MessageKind, worker_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            worker_id,
            payload,
        }
    }

    /// Worker注册消息
    pub fn register(info: &WorkerInfo) -> SchedulerResult<Self> {
        Ok(Self::envelope(
            MessageKind::WorkerRegister,
            Some(info.id.clone()),
            serde_json::to_value(info)?,
        ))
    }

    /// Worker心跳消息
    pub fn heartbeat(worker_id: impl Into<String>) -> Self {
        Self::envelope(
            MessageKind::WorkerHeartbeat,
            Some(worker_id.into()),
            serde_json::Value::Null,
        )
    }

    /// Worker注销消息
    pub fn unregister(worker_id: impl Into<String>) -> Self {
        Self::envelope(
            MessageKind::WorkerUnregister,
            Some(worker_id.into()),
            serde_json::Value::Null,
        )
    }

    /// 任务注册消息，复用JOB_STATUS_REPORT通道
    pub fn job_register(worker_id: impl Into<String>, job: &JobDefinition) -> SchedulerResult<Self> {
        Ok(Self::envelope(
            MessageKind::JobStatusReport,
            Some(worker_id.into()),
            serde_json::to_value(job)?,
        ))
    }

    /// 任务触发消息，消息ID即本次派发的实例ID
    pub fn job_trigger(
        instance_id: impl Into<String>,
        worker_id: impl Into<String>,
        job: &JobDefinition,
    ) -> SchedulerResult<Self> {
        let mut message = Self::envelope(
            MessageKind::JobTrigger,
            Some(worker_id.into()),
            serde_json::to_value(job)?,
        );
        message.id = instance_id.into();
        Ok(message)
    }

    /// 任务状态上报消息
    pub fn status_report(
        worker_id: impl Into<String>,
        instance: &JobInstance,
    ) -> SchedulerResult<Self> {
        Ok(Self::envelope(
            MessageKind::JobStatusReport,
            Some(worker_id.into()),
            serde_json::to_value(instance)?,
        ))
    }

    /// 任务结果上报消息
    pub fn result_report(worker_id: impl Into<String>, result: &JobResult) -> SchedulerResult<Self> {
        Ok(Self::envelope(
            MessageKind::JobResultReport,
            Some(worker_id.into()),
            serde_json::to_value(result)?,
        ))
    }

    /// 服务端响应消息
    pub fn server_response(text: impl Into<String>) -> Self {
        Self::envelope(
            MessageKind::ServerResponse,
            None,
            serde_json::Value::String(text.into()),
        )
    }

    /// 按目标类型解码消息载荷
    pub fn payload_as<T: DeserializeOwned>(&self) -> SchedulerResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InstanceState;

    #[test]
    fn test_register_message_round_trip() {
        let info = WorkerInfo::new("host-1", "groupA", "demo-app").with_weight(3);
        let message = Message::register(&info).unwrap();

        assert_eq!(message.kind, MessageKind::WorkerRegister);
        assert_eq!(message.worker_id.as_deref(), Some(info.id.as_str()));

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("WORKER_REGISTER"));

        let decoded: Message = serde_json::from_str(&json).unwrap();
        let payload: WorkerInfo = decoded.payload_as().unwrap();
        assert_eq!(payload.id, info.id);
        assert_eq!(payload.weight, 3);
    }

    #[test]
    fn test_trigger_message_id_is_instance_id() {
        let job = JobDefinition::new("nightly", "groupA", "0 0 2 * * *");
        let message = Message::job_trigger("inst-42", "w1", &job).unwrap();

        assert_eq!(message.id, "inst-42");
        assert_eq!(message.kind, MessageKind::JobTrigger);

        let payload: JobDefinition = message.payload_as().unwrap();
        assert_eq!(payload.id, job.id);
    }

    #[test]
    fn test_status_report_carries_both_payload_kinds() {
        // JOB_STATUS_REPORT既承载实例状态也承载任务注册，按解码结果区分
        let job = JobDefinition::new("nightly", "groupA", "0 0 2 * * *");
        let register = Message::job_register("w1", &job).unwrap();
        assert_eq!(register.kind, MessageKind::JobStatusReport);
        assert!(register.payload_as::<JobInstance>().is_err());
        assert!(register.payload_as::<JobDefinition>().is_ok());

        let mut instance = JobInstance::running(&job, "inst-1", "w1");
        instance.succeed();
        let report = Message::status_report("w1", &instance).unwrap();
        let decoded: JobInstance = report.payload_as().unwrap();
        assert_eq!(decoded.state, InstanceState::Success);
        assert_eq!(decoded.instance_id, "inst-1");
    }

    #[test]
    fn test_heartbeat_and_response_payloads() {
        let heartbeat = Message::heartbeat("w1");
        assert_eq!(heartbeat.kind, MessageKind::WorkerHeartbeat);
        assert!(heartbeat.payload.is_null());

        let response = Message::server_response("注册成功");
        assert_eq!(response.kind, MessageKind::ServerResponse);
        assert!(response.worker_id.is_none());
        let text: String = response.payload_as().unwrap();
        assert_eq!(text, "注册成功");
    }
}
