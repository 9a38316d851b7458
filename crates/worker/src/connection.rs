use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jjob_core::{codec, JobDefinition, Message, MessageKind, SchedulerError, SchedulerResult,
    WorkerConfig, WorkerInfo};

use crate::execution::ExecutionEngine;
use crate::registry::JobRegistry;

/// 一条活动连接
struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Link {
    fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

/// 连接管理器
///
/// 负责建立连接、注册、心跳与重连。状态机：
/// 未连接 → 连接中 → 已连接 → (出错/关闭回到未连接)。
/// 心跳与重连两条路径共用同一个幂等的connect流程。
pub struct ConnectionManager {
    config: WorkerConfig,
    info: RwLock<WorkerInfo>,
    registry: Arc<JobRegistry>,
    engine: Arc<ExecutionEngine>,
    link: RwLock<Option<Link>>,
    started: AtomicBool,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        config: WorkerConfig,
        info: WorkerInfo,
        registry: Arc<JobRegistry>,
        engine: Arc<ExecutionEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            info: RwLock::new(info),
            registry,
            engine,
            link: RwLock::new(None),
            started: AtomicBool::new(false),
            background_tasks: Mutex::new(Vec::new()),
        })
    }

    pub async fn worker_info(&self) -> WorkerInfo {
        self.info.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.link
            .read()
            .await
            .as_ref()
            .map(Link::is_active)
            .unwrap_or(false)
    }

    /// 建立连接并完成注册，已连接时为空操作
    pub async fn connect(self: &Arc<Self>) -> SchedulerResult<()> {
        if self.is_connected().await {
            return Ok(());
        }

        let addr = self.config.server_addr();
        debug!("连接调度服务: {}", addr);
        let stream = TcpStream::connect(&addr).await?;

        // 连接建立后以本地地址作为Worker的IP上报
        if let Ok(local_addr) = stream.local_addr() {
            self.info.write().await.ip_address = local_addr.ip().to_string();
        }

        let (mut reader, mut writer) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let alive = Arc::new(AtomicBool::new(true));

        let writer_alive = Arc::clone(&alive);
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = codec::write_message(&mut writer, &message).await {
                    warn!("向服务端写出消息失败: {}", e);
                    break;
                }
            }
            writer_alive.store(false, Ordering::SeqCst);
        });

        let manager = Arc::clone(self);
        let reader_alive = Arc::clone(&alive);
        let reader_outbound = outbound_tx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match codec::read_message(&mut reader).await {
                    Ok(Some(message)) => {
                        manager.handle_message(message, &reader_outbound).await;
                    }
                    Ok(None) => {
                        warn!("与服务端的连接已关闭");
                        break;
                    }
                    Err(e) => {
                        warn!("读取服务端消息失败: {}", e);
                        break;
                    }
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
        });

        // 替换旧链接，残留任务一并终止
        if let Some(old) = self.link.write().await.replace(Link {
            outbound: outbound_tx.clone(),
            alive,
            reader_task,
            writer_task,
        }) {
            old.reader_task.abort();
            old.writer_task.abort();
        }

        // 注册自身，然后重放本地任务清单
        let info = self.info.read().await.clone();
        outbound_tx
            .send(Message::register(&info)?)
            .map_err(|_| SchedulerError::Network("发送注册消息失败".to_string()))?;

        for job in self.registry.all_jobs().await {
            outbound_tx
                .send(Message::job_register(&info.id, &job)?)
                .map_err(|_| SchedulerError::Network("发送任务注册消息失败".to_string()))?;
            debug!("任务已注册到服务端: {}", job.name);
        }

        info!("已连接到调度服务: {}", addr);
        Ok(())
    }

    /// 处理服务端消息
    async fn handle_message(
        self: &Arc<Self>,
        message: Message,
        outbound: &mpsc::UnboundedSender<Message>,
    ) {
        match message.kind {
            MessageKind::JobTrigger => match message.payload_as::<JobDefinition>() {
                Ok(job) => {
                    self.engine
                        .handle_trigger(job, message.id.clone(), outbound.clone())
                        .await;
                }
                Err(e) => warn!("无法解析任务触发载荷: {}", e),
            },
            MessageKind::ServerResponse => {
                debug!("收到服务端响应: {}", message.payload);
            }
            kind => {
                warn!("收到意外的消息类型: {:?}", kind);
            }
        }
    }

    /// 启动连接管理：初次连接 + 心跳与重连后台任务
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("连接管理器已在运行");
            return Ok(());
        }

        let info = self.info.read().await.clone();
        info!(
            "启动Worker: id={}, group={}, application={}",
            info.id, info.group, info.application_name
        );

        // 初次连接失败不致命，重连任务会继续尝试
        if let Err(e) = self.connect().await {
            warn!("初次连接失败，等待重连: {}", e);
        }

        let heartbeat_manager = Arc::clone(self);
        let heartbeat_initial = Duration::from_secs(self.config.heartbeat.initial_delay_seconds);
        let heartbeat_period = Duration::from_secs(self.config.heartbeat.interval_seconds);
        let heartbeat_task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + heartbeat_initial;
            let mut ticker = tokio::time::interval_at(start, heartbeat_period);
            loop {
                ticker.tick().await;
                if !heartbeat_manager.started.load(Ordering::SeqCst) {
                    break;
                }
                heartbeat_manager.heartbeat_tick().await;
            }
        });

        let reconnect_manager = Arc::clone(self);
        let reconnect_initial = Duration::from_secs(self.config.reconnect.initial_delay_seconds);
        let reconnect_period = Duration::from_secs(self.config.reconnect.interval_seconds);
        let reconnect_task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + reconnect_initial;
            let mut ticker = tokio::time::interval_at(start, reconnect_period);
            loop {
                ticker.tick().await;
                if !reconnect_manager.started.load(Ordering::SeqCst) {
                    break;
                }
                if !reconnect_manager.is_connected().await {
                    info!("连接不可用，尝试重连调度服务");
                    if let Err(e) = reconnect_manager.connect().await {
                        warn!("重连失败: {}", e);
                    }
                }
            }
        });

        self.background_tasks
            .lock()
            .await
            .extend([heartbeat_task, reconnect_task]);

        Ok(())
    }

    /// 心跳：发送失败或连接不可用时立即重连，不等周期性重连任务
    async fn heartbeat_tick(self: &Arc<Self>) {
        let worker_id = self.info.read().await.id.clone();

        let sent = {
            let link = self.link.read().await;
            match link.as_ref() {
                Some(link) if link.is_active() => {
                    debug!("发送心跳: {}", worker_id);
                    link.outbound.send(Message::heartbeat(&worker_id)).is_ok()
                }
                _ => false,
            }
        };

        if !sent {
            warn!("心跳发送失败，立即尝试重连");
            if let Err(e) = self.connect().await {
                warn!("心跳触发的重连失败: {}", e);
            }
        }
    }

    /// 本地新注册的任务推送到服务端（未连接时静默，连接后随清单重放）
    pub async fn announce_job(&self, job: &JobDefinition) -> SchedulerResult<()> {
        let worker_id = self.info.read().await.id.clone();
        if let Some(link) = self.link.read().await.as_ref() {
            if link.is_active() {
                link.outbound
                    .send(Message::job_register(&worker_id, job)?)
                    .map_err(|_| {
                        SchedulerError::Network("发送任务注册消息失败".to_string())
                    })?;
                debug!("任务已注册到服务端: {}", job.name);
            }
        }
        Ok(())
    }

    /// 优雅停机：注销 → 断开 → 线程池宽限排空 → 销毁单例执行器
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("开始停止Worker...");

        let worker_id = self.info.read().await.id.clone();
        if let Some(link) = self.link.read().await.as_ref() {
            if link.is_active() {
                let _ = link.outbound.send(Message::unregister(&worker_id));
            }
        }
        // 给写任务留出排空注销消息的时间
        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Some(link) = self.link.write().await.take() {
            link.reader_task.abort();
            link.writer_task.abort();
        }

        for task in self.background_tasks.lock().await.drain(..) {
            task.abort();
        }

        let grace = Duration::from_secs(self.config.pool.shutdown_grace_seconds);
        self.engine.shutdown(grace).await;
        self.registry.shutdown().await;

        info!("Worker已停止");
    }
}
