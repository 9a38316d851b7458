use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use jjob_core::{codec, Message, SchedulerResult, ServerConfig};

use crate::handler::{ConnectionContext, HandlerAction, ServerHandler};
use crate::monitor::InstanceMonitor;
use crate::registry::WorkerRegistry;
use crate::scheduler::SchedulingEngine;
use crate::strategies::StrategyFactory;
use crate::trigger::JobTrigger;

/// 调度服务端
///
/// 监听Worker连接，每条连接拆分为一个读循环和一个独立的写任务，
/// 读循环不会被任务体或调度逻辑阻塞。
pub struct SchedulerServer {
    config: ServerConfig,
    registry: Arc<WorkerRegistry>,
    trigger: Arc<JobTrigger>,
    engine: Arc<SchedulingEngine>,
    monitor: Arc<InstanceMonitor>,
    handler: Arc<ServerHandler>,
}

impl SchedulerServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(WorkerRegistry::new(config.heartbeat_timeout_seconds));
        let trigger = Arc::new(JobTrigger::new());
        let engine = SchedulingEngine::new(
            Arc::clone(&registry),
            Arc::clone(&trigger),
            StrategyFactory::new(),
        );
        let monitor = Arc::new(InstanceMonitor::new());
        let handler = Arc::new(ServerHandler::new(
            Arc::clone(&registry),
            Arc::clone(&engine),
            Arc::clone(&trigger),
            Arc::clone(&monitor),
        ));

        Arc::new(Self {
            config,
            registry,
            trigger,
            engine,
            monitor,
            handler,
        })
    }

    /// Worker注册表（控制台只读接口）
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// 调度引擎（控制台只读接口）
    pub fn engine(&self) -> &Arc<SchedulingEngine> {
        &self.engine
    }

    /// 实例监控（控制台只读接口）
    pub fn monitor(&self) -> &Arc<InstanceMonitor> {
        &self.monitor
    }

    pub fn trigger(&self) -> &Arc<JobTrigger> {
        &self.trigger
    }

    /// 启动服务：绑定端口、接入连接、启动心跳清理任务
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<ServerHandle> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        info!("调度服务已启动，监听 {}", local_addr);

        let (shutdown_tx, _) = broadcast::channel(4);

        let accept_server = Arc::clone(self);
        let mut accept_shutdown = shutdown_tx.subscribe();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => {
                                debug!("Worker连接接入: {}", peer_addr);
                                let server = Arc::clone(&accept_server);
                                tokio::spawn(async move {
                                    server.handle_connection(stream, peer_addr).await;
                                });
                            }
                            Err(e) => {
                                error!("接受连接失败: {}", e);
                            }
                        }
                    }
                    _ = accept_shutdown.recv() => {
                        info!("接入循环收到停止信号");
                        break;
                    }
                }
            }
        });

        let sweep_server = Arc::clone(self);
        let mut sweep_shutdown = shutdown_tx.subscribe();
        let initial_delay = Duration::from_secs(self.config.sweep_initial_delay_seconds);
        let sweep_period = Duration::from_secs(self.config.sweep_interval_seconds);
        let retention = chrono::Duration::seconds(self.config.instance_retention_seconds as i64);
        let sweep_task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticker = tokio::time::interval_at(start, sweep_period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let offline = sweep_server.registry.sweep(now).await;
                        for worker_id in &offline {
                            sweep_server.trigger.unbind_channel(worker_id).await;
                        }
                        sweep_server
                            .monitor
                            .cleanup_finished_before(retention, now)
                            .await;
                    }
                    _ = sweep_shutdown.recv() => {
                        info!("心跳清理任务收到停止信号");
                        break;
                    }
                }
            }
        });

        Ok(ServerHandle {
            server: Arc::clone(self),
            local_addr,
            shutdown_tx,
            tasks: vec![accept_task, sweep_task],
        })
    }

    /// 单条连接的处理：写任务 + 读循环，断开后统一清理
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let channel_id = Uuid::new_v4().to_string();
        let (mut reader, mut writer) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer_peer = peer_addr;
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = codec::write_message(&mut writer, &message).await {
                    debug!("向 {} 写出消息失败: {}", writer_peer, e);
                    break;
                }
            }
        });

        let ctx = ConnectionContext {
            channel_id: channel_id.clone(),
            peer_addr,
            outbound: outbound_tx,
        };

        loop {
            match codec::read_message(&mut reader).await {
                Ok(Some(message)) => match self.handler.handle(&ctx, message).await {
                    Ok(HandlerAction::Continue) => {}
                    Ok(HandlerAction::Close) => break,
                    Err(e) => {
                        // 处理失败只记录，不允许错误中断读循环
                        error!("处理来自 {} 的消息失败: {}", peer_addr, e);
                    }
                },
                Ok(None) => {
                    debug!("连接正常关闭: {}", peer_addr);
                    break;
                }
                Err(e) => {
                    warn!("连接 {} 读取失败: {}", peer_addr, e);
                    break;
                }
            }
        }

        // 断连与显式注销等价：清理注册、通道与相关任务
        self.handler.channel_inactive(&channel_id).await;
    }
}

/// 运行中服务的句柄
pub struct ServerHandle {
    server: Arc<SchedulerServer>,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// 实际监听地址，端口配置为0时为系统分配的端口
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止服务：关闭接入循环与清理任务，并释放引擎定时器
    pub async fn stop(self) {
        info!("调度服务开始停止");
        let _ = self.shutdown_tx.send(());
        for mut task in self.tasks {
            if tokio::time::timeout(Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                warn!("后台任务未在宽限期内退出，强制取消");
                task.abort();
            }
        }
        self.server.engine.shutdown().await;
        info!("调度服务已停止");
    }
}
