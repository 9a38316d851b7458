use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use jjob_core::{
    InstanceState, JobDefinition, JobInstance, JobResult, Message, MessageKind, SchedulerResult,
    WorkerInfo,
};

use crate::monitor::InstanceMonitor;
use crate::registry::WorkerRegistry;
use crate::scheduler::SchedulingEngine;
use crate::trigger::JobTrigger;

/// 单条连接的上下文
pub struct ConnectionContext {
    pub channel_id: String,
    pub peer_addr: SocketAddr,
    pub outbound: mpsc::UnboundedSender<Message>,
}

/// 消息处理结果：继续读取或关闭连接
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Continue,
    Close,
}

/// 服务端消息处理器
pub struct ServerHandler {
    registry: Arc<WorkerRegistry>,
    engine: Arc<SchedulingEngine>,
    trigger: Arc<JobTrigger>,
    monitor: Arc<InstanceMonitor>,
}

impl ServerHandler {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        engine: Arc<SchedulingEngine>,
        trigger: Arc<JobTrigger>,
        monitor: Arc<InstanceMonitor>,
    ) -> Self {
        Self {
            registry,
            engine,
            trigger,
            monitor,
        }
    }

    /// 按消息类型分派处理
    pub async fn handle(
        &self,
        ctx: &ConnectionContext,
        message: Message,
    ) -> SchedulerResult<HandlerAction> {
        match message.kind {
            MessageKind::WorkerRegister => self.handle_register(ctx, &message).await,
            MessageKind::WorkerHeartbeat => self.handle_heartbeat(&message).await,
            MessageKind::WorkerUnregister => self.handle_unregister(&message).await,
            MessageKind::JobStatusReport => self.handle_status_report(&message).await,
            MessageKind::JobResultReport => self.handle_result_report(&message).await,
            kind => {
                warn!("收到意外的消息类型: {:?}", kind);
                Ok(HandlerAction::Continue)
            }
        }
    }

    /// 处理Worker注册
    async fn handle_register(
        &self,
        ctx: &ConnectionContext,
        message: &Message,
    ) -> SchedulerResult<HandlerAction> {
        let mut info: WorkerInfo = message.payload_as()?;

        // 客户端未上报IP时从连接对端地址补齐
        if info.ip_address.is_empty() {
            info.ip_address = ctx.peer_addr.ip().to_string();
        }

        let worker_id = info.id.clone();
        info!(
            "Worker注册: {} 来自 {} ({})",
            worker_id, info.host_name, info.ip_address
        );

        self.registry.register(&ctx.channel_id, info).await;
        self.trigger
            .bind_channel(&worker_id, ctx.outbound.clone())
            .await;

        let _ = ctx.outbound.send(Message::server_response("注册成功"));
        Ok(HandlerAction::Continue)
    }

    /// 处理Worker心跳
    async fn handle_heartbeat(&self, message: &Message) -> SchedulerResult<HandlerAction> {
        if let Some(worker_id) = &message.worker_id {
            debug!("收到Worker心跳: {}", worker_id);
            if !self.registry.heartbeat(worker_id).await {
                warn!("收到未知Worker的心跳: {}", worker_id);
            }
        }
        Ok(HandlerAction::Continue)
    }

    /// 处理Worker注销，随后关闭连接
    async fn handle_unregister(&self, message: &Message) -> SchedulerResult<HandlerAction> {
        if let Some(worker_id) = &message.worker_id {
            self.engine.cancel_by_worker(worker_id).await;
            self.registry.unregister(worker_id).await;
            self.trigger.unbind_channel(worker_id).await;
            info!("Worker已注销，相关任务调度取消: {}", worker_id);
        }
        Ok(HandlerAction::Close)
    }

    /// 处理JOB_STATUS_REPORT
    ///
    /// 该消息既承载实例状态上报也承载任务注册，先按实例解码，
    /// 失败后再按任务定义解码。
    async fn handle_status_report(&self, message: &Message) -> SchedulerResult<HandlerAction> {
        let worker_id = message.worker_id.clone().unwrap_or_default();

        if let Ok(instance) = message.payload_as::<JobInstance>() {
            debug!(
                "实例状态上报: job={}, instance={}, state={:?}",
                instance.job_id, instance.instance_id, instance.state
            );

            if instance.state == InstanceState::Success {
                self.registry.record_success(&worker_id).await;
            }

            if instance.is_terminal() {
                self.trigger
                    .complete(&instance.job_id, instance.single_running)
                    .await;
            }

            self.monitor.record(instance).await;
            return Ok(HandlerAction::Continue);
        }

        if let Ok(job) = message.payload_as::<JobDefinition>() {
            info!("任务注册: {} 来自Worker {}", job.name, worker_id);
            self.engine.add_job(job, &worker_id).await;
            return Ok(HandlerAction::Continue);
        }

        warn!("无法解析的JOB_STATUS_REPORT载荷, worker={}", worker_id);
        Ok(HandlerAction::Continue)
    }

    /// 处理任务结果上报，仅记录日志，执行计数在状态上报路径更新
    async fn handle_result_report(&self, message: &Message) -> SchedulerResult<HandlerAction> {
        match message.payload_as::<JobResult>() {
            Ok(result) => {
                info!(
                    "收到任务结果: job={}, instance={}, worker={}, output={}",
                    result.job_id, result.instance_id, result.worker_id, result.output
                );
            }
            Err(_) => {
                debug!("收到无法解析的任务结果上报");
            }
        }
        Ok(HandlerAction::Continue)
    }

    /// 连接断开清理，与显式注销等价
    pub async fn channel_inactive(&self, channel_id: &str) {
        if let Some(worker_id) = self.registry.worker_id_by_channel(channel_id).await {
            self.engine.cancel_by_worker(&worker_id).await;
            self.registry.unregister(&worker_id).await;
            self.trigger.unbind_channel(&worker_id).await;
            info!("Worker断开连接，相关任务调度取消: {}", worker_id);
        }
    }
}
