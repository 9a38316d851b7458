//! 端到端测试：真实TCP链路上的 注册 → 排期 → 触发 → 上报 → 注销 全流程

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jjob_core::{InstanceState, JobDefinition, SchedulerResult, ServerConfig, WorkerConfig};
use jjob_server::SchedulerServer;
use jjob_worker::{JobExecutor, JobSpec, WorkerClient};

struct CountingExecutor {
    executed: Arc<AtomicUsize>,
}

#[async_trait]
impl JobExecutor for CountingExecutor {
    async fn init(&self) -> SchedulerResult<()> {
        Ok(())
    }

    async fn execute(&self, _job: &JobDefinition) -> SchedulerResult<Option<String>> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(Some("执行成功".to_string()))
    }

    async fn destroy(&self) {}
}

fn test_server_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

fn test_worker_config(port: u16, application_name: &str) -> WorkerConfig {
    WorkerConfig {
        server_host: "127.0.0.1".to_string(),
        server_port: port,
        group: "groupA".to_string(),
        application_name: application_name.to_string(),
        ..Default::default()
    }
}

/// 轮询等待条件成立，超时panic
async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "等待超时: {what}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_schedule_execute_and_report_round_trip() {
    let server = SchedulerServer::new(test_server_config());
    let handle = server.start().await.unwrap();
    let port = handle.local_addr().port();

    let client = WorkerClient::new(test_worker_config(port, "e2e-app"));
    let executed = Arc::new(AtomicUsize::new(0));
    let job = client
        .register_singleton(
            JobSpec::new("nightly", "groupA")
                .cron("* * * * * *")
                .description("端到端测试任务")
                .single_running(true),
            Arc::new(CountingExecutor {
                executed: Arc::clone(&executed),
            }),
        )
        .await
        .unwrap();
    client.start().await.unwrap();

    // Worker注册可见，任务收敛为一条记录并完成排期
    wait_until("Worker注册", || async {
        server.registry().worker_count().await == 1
    })
    .await;
    wait_until("任务注册", || async {
        server.engine().job_count().await == 1
    })
    .await;

    // 约1秒后第一次触发，任务体真实执行
    wait_until("任务执行", || async {
        executed.load(Ordering::SeqCst) >= 1
    })
    .await;

    // 服务端的执行计数与注册集合
    let server_job = server.engine().get_job(&job.id).await.unwrap();
    assert!(server_job.execution_count >= 1);
    assert_eq!(server_job.registrant_count(), 1);
    assert!(server_job.single_running);

    // SUCCESS实例上报可见
    wait_until("成功实例上报", || async {
        server
            .monitor()
            .instances_of_job(&job.id)
            .await
            .iter()
            .any(|instance| instance.state == InstanceState::Success)
    })
    .await;

    // Worker成功计数更新
    wait_until("Worker成功计数", || async {
        server
            .registry()
            .all_workers()
            .await
            .first()
            .map(|worker| worker.execution_count >= 1)
            .unwrap_or(false)
    })
    .await;

    // 完成上报后运行标记清除，后续触发不被卡死
    wait_until("运行标记清除", || async {
        !server.trigger().is_running(&job.id).await
    })
    .await;

    // 优雅停止：注销后Worker消失，其任务全部取消
    client.stop().await;
    wait_until("Worker注销", || async {
        server.registry().worker_count().await == 0
    })
    .await;
    wait_until("任务取消", || async {
        server.engine().job_count().await == 0
    })
    .await;
    assert!(!server.engine().is_armed(&job.id).await);

    handle.stop().await;
}

#[tokio::test]
async fn test_identical_jobs_from_two_processes_converge() {
    let server = SchedulerServer::new(test_server_config());
    let handle = server.start().await.unwrap();
    let port = handle.local_addr().port();

    // 两个独立Worker进程注册同名同分组的任务，使用不会触发的排期
    let spec = || JobSpec::new("nightly", "groupA").cron("0 0 2 1 1 *");

    let client_a = WorkerClient::new(test_worker_config(port, "app-a"));
    let job_a = client_a
        .register_singleton(
            spec(),
            Arc::new(CountingExecutor {
                executed: Arc::new(AtomicUsize::new(0)),
            }),
        )
        .await
        .unwrap();
    client_a.start().await.unwrap();

    let client_b = WorkerClient::new(test_worker_config(port, "app-b"));
    let job_b = client_b
        .register_singleton(
            spec(),
            Arc::new(CountingExecutor {
                executed: Arc::new(AtomicUsize::new(0)),
            }),
        )
        .await
        .unwrap();
    client_b.start().await.unwrap();

    // 两个进程推导出同一个任务ID
    assert_eq!(job_a.id, job_b.id);

    // 服务端只有一条任务记录，注册集合为两个Worker
    wait_until("注册集合收敛", || async {
        server
            .engine()
            .get_job(&job_a.id)
            .await
            .map(|job| job.registrant_count() == 2)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(server.engine().job_count().await, 1);

    // 第一个Worker下线只缩减注册集合
    client_a.stop().await;
    wait_until("注册集合缩减", || async {
        server
            .engine()
            .get_job(&job_a.id)
            .await
            .map(|job| job.registrant_count() == 1)
            .unwrap_or(false)
    })
    .await;

    // 最后一个Worker下线后任务被整体取消
    client_b.stop().await;
    wait_until("任务取消", || async {
        server.engine().job_count().await == 0
    })
    .await;

    handle.stop().await;
}

#[tokio::test]
async fn test_abrupt_disconnect_cleans_up_like_unregister() {
    use jjob_core::{codec, Message, MessageKind, WorkerInfo};
    use tokio::net::TcpStream;

    let server = SchedulerServer::new(test_server_config());
    let handle = server.start().await.unwrap();
    let port = handle.local_addr().port();

    // 直接在裸连接上走协议：注册Worker + 注册任务
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let info = WorkerInfo::new("raw-host", "groupA", "raw-app");
    let worker_id = info.id.clone();
    codec::write_message(&mut stream, &Message::register(&info).unwrap())
        .await
        .unwrap();

    // 服务端确认注册
    let response = codec::read_message(&mut stream).await.unwrap().unwrap();
    assert_eq!(response.kind, MessageKind::ServerResponse);

    let job = JobDefinition::new("nightly", "groupA", "0 0 2 1 1 *");
    codec::write_message(
        &mut stream,
        &Message::job_register(&worker_id, &job).unwrap(),
    )
    .await
    .unwrap();

    wait_until("任务注册", || async {
        server.engine().job_count().await == 1
    })
    .await;
    assert_eq!(server.registry().worker_count().await, 1);

    // 不发注销消息直接断开连接
    drop(stream);

    // 断连与显式注销等价：Worker移除，无注册Worker的任务取消
    wait_until("断连清理", || async {
        server.engine().job_count().await == 0 && server.registry().worker_count().await == 0
    })
    .await;

    handle.stop().await;
}
