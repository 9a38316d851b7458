use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jjob_core::{
    ExecutionPoolConfig, InstanceState, JobDefinition, JobInstance, Message, MessageKind,
    SchedulerError, SchedulerResult,
};
use jjob_worker::{ExecutionEngine, ExecutorFactory, JobExecutor, JobRegistry, JobSpec};
use tokio::sync::mpsc;

/// 可注入故障的测试执行器
struct ProbeExecutor {
    init_count: Arc<AtomicUsize>,
    execute_count: Arc<AtomicUsize>,
    destroy_count: Arc<AtomicUsize>,
    behavior: Behavior,
    hold_millis: u64,
}

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Succeed,
    FailExecute,
    FailInit,
    PanicExecute,
}

#[async_trait]
impl JobExecutor for ProbeExecutor {
    async fn init(&self) -> SchedulerResult<()> {
        self.init_count.fetch_add(1, Ordering::SeqCst);
        if self.behavior == Behavior::FailInit {
            return Err(SchedulerError::Execution("初始化故障注入".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, _job: &JobDefinition) -> SchedulerResult<Option<String>> {
        self.execute_count.fetch_add(1, Ordering::SeqCst);
        if self.hold_millis > 0 {
            tokio::time::sleep(Duration::from_millis(self.hold_millis)).await;
        }
        match self.behavior {
            Behavior::FailExecute => Err(SchedulerError::Execution("执行故障注入".to_string())),
            Behavior::PanicExecute => panic!("任务体panic注入"),
            _ => Ok(Some("执行输出".to_string())),
        }
    }

    async fn destroy(&self) {
        self.destroy_count.fetch_add(1, Ordering::SeqCst);
    }
}

struct Probe {
    init: Arc<AtomicUsize>,
    execute: Arc<AtomicUsize>,
    destroy: Arc<AtomicUsize>,
}

impl Probe {
    fn new() -> Self {
        Self {
            init: Arc::new(AtomicUsize::new(0)),
            execute: Arc::new(AtomicUsize::new(0)),
            destroy: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn factory(&self, behavior: Behavior, hold_millis: u64) -> Arc<dyn ExecutorFactory> {
        let init = Arc::clone(&self.init);
        let execute = Arc::clone(&self.execute);
        let destroy = Arc::clone(&self.destroy);
        Arc::new(move || -> Box<dyn JobExecutor> {
            Box::new(ProbeExecutor {
                init_count: Arc::clone(&init),
                execute_count: Arc::clone(&execute),
                destroy_count: Arc::clone(&destroy),
                behavior,
                hold_millis,
            })
        })
    }
}

fn pool_config(workers: usize, queue: usize) -> ExecutionPoolConfig {
    ExecutionPoolConfig {
        workers,
        queue_capacity: queue,
        shutdown_grace_seconds: 1,
    }
}

async fn next_status(rx: &mut mpsc::UnboundedReceiver<Message>) -> JobInstance {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("等待状态上报超时")
            .expect("通道已关闭");
        match message.kind {
            MessageKind::JobStatusReport => return message.payload_as().unwrap(),
            // 结果上报与状态上报共用通道，跳过
            MessageKind::JobResultReport => continue,
            kind => panic!("收到意外的消息类型: {kind:?}"),
        }
    }
}

#[tokio::test]
async fn test_transient_full_lifecycle_on_success() {
    let registry = Arc::new(JobRegistry::new());
    let probe = Probe::new();
    let job = registry
        .register_transient(
            JobSpec::new("batch", "groupA"),
            probe.factory(Behavior::Succeed, 0),
        )
        .await
        .unwrap();

    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(2, 4));
    let (tx, mut rx) = mpsc::unbounded_channel();

    engine.handle_trigger(job.clone(), "inst-1".to_string(), tx).await;

    let running = next_status(&mut rx).await;
    assert_eq!(running.state, InstanceState::Running);
    assert_eq!(running.instance_id, "inst-1");
    assert_eq!(running.worker_id, "w1");

    let terminal = next_status(&mut rx).await;
    assert_eq!(terminal.state, InstanceState::Success);
    assert!(terminal.end_time.is_some());

    // 瞬时实例完整走过 构建→初始化→执行→销毁 各一次
    assert_eq!(probe.init.load(Ordering::SeqCst), 1);
    assert_eq!(probe.execute.load(Ordering::SeqCst), 1);
    assert_eq!(probe.destroy.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_success_emits_result_report() {
    let registry = Arc::new(JobRegistry::new());
    let probe = Probe::new();
    let job = registry
        .register_transient(
            JobSpec::new("batch", "groupA"),
            probe.factory(Behavior::Succeed, 0),
        )
        .await
        .unwrap();

    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(2, 4));
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.handle_trigger(job, "inst-1".to_string(), tx).await;

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let message = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("等待上报超时")
            .expect("通道已关闭");
        kinds.push(message.kind);
    }
    assert_eq!(
        kinds,
        vec![
            MessageKind::JobStatusReport,
            MessageKind::JobResultReport,
            MessageKind::JobStatusReport,
        ]
    );
}

#[tokio::test]
async fn test_execute_failure_destroys_transient_and_reports_error() {
    let registry = Arc::new(JobRegistry::new());
    let probe = Probe::new();
    let job = registry
        .register_transient(
            JobSpec::new("batch", "groupA"),
            probe.factory(Behavior::FailExecute, 0),
        )
        .await
        .unwrap();

    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(2, 4));
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.handle_trigger(job, "inst-1".to_string(), tx).await;

    assert_eq!(next_status(&mut rx).await.state, InstanceState::Running);
    let terminal = next_status(&mut rx).await;
    assert_eq!(terminal.state, InstanceState::Failed);
    assert!(terminal
        .error_message
        .as_deref()
        .unwrap()
        .contains("执行故障注入"));

    // 执行抛错时瞬时实例依然被销毁
    assert_eq!(probe.init.load(Ordering::SeqCst), 1);
    assert_eq!(probe.execute.load(Ordering::SeqCst), 1);
    assert_eq!(probe.destroy.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_init_failure_is_per_instance_failure() {
    let registry = Arc::new(JobRegistry::new());
    let probe = Probe::new();
    let job = registry
        .register_transient(
            JobSpec::new("batch", "groupA"),
            probe.factory(Behavior::FailInit, 0),
        )
        .await
        .unwrap();

    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(2, 4));
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.handle_trigger(job, "inst-1".to_string(), tx).await;

    assert_eq!(next_status(&mut rx).await.state, InstanceState::Running);
    let terminal = next_status(&mut rx).await;
    assert_eq!(terminal.state, InstanceState::Failed);
    assert!(terminal
        .error_message
        .as_deref()
        .unwrap()
        .contains("初始化执行器失败"));

    // 初始化失败不执行任务体，但实例仍被销毁
    assert_eq!(probe.execute.load(Ordering::SeqCst), 0);
    assert_eq!(probe.destroy.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panic_in_job_body_reported_as_failure() {
    let registry = Arc::new(JobRegistry::new());
    let probe = Probe::new();
    let job = registry
        .register_transient(
            JobSpec::new("batch", "groupA"),
            probe.factory(Behavior::PanicExecute, 0),
        )
        .await
        .unwrap();

    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(2, 4));
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.handle_trigger(job.clone(), "inst-1".to_string(), tx.clone()).await;

    assert_eq!(next_status(&mut rx).await.state, InstanceState::Running);
    let terminal = next_status(&mut rx).await;
    assert_eq!(terminal.state, InstanceState::Failed);
    assert!(terminal.error_message.as_deref().unwrap().contains("panic"));
    assert_eq!(probe.destroy.load(Ordering::SeqCst), 1);

    // 执行引擎在panic后仍然可用
    engine.handle_trigger(job, "inst-2".to_string(), tx).await;
    assert_eq!(next_status(&mut rx).await.state, InstanceState::Running);
    assert_eq!(next_status(&mut rx).await.state, InstanceState::Failed);
}

#[tokio::test]
async fn test_unknown_executor_reports_configuration_failure() {
    let registry = Arc::new(JobRegistry::new());
    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(2, 4));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let job = JobDefinition::new("ghost", "groupA", "");
    engine.handle_trigger(job, "inst-1".to_string(), tx).await;

    assert_eq!(next_status(&mut rx).await.state, InstanceState::Running);
    let terminal = next_status(&mut rx).await;
    assert_eq!(terminal.state, InstanceState::Failed);
    assert!(terminal
        .error_message
        .as_deref()
        .unwrap()
        .contains("没有已注册的执行器"));
}

#[tokio::test]
async fn test_saturated_pool_falls_back_to_caller() {
    let registry = Arc::new(JobRegistry::new());
    let probe = Probe::new();
    // 任务体占住执行线程300ms，制造队列饱和
    let job = registry
        .register_transient(
            JobSpec::new("slow", "groupA"),
            probe.factory(Behavior::Succeed, 300),
        )
        .await
        .unwrap();

    // 1个执行线程 + 容量1的队列
    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(1, 1));
    let (tx, mut rx) = mpsc::unbounded_channel();

    // 第3次提交时队列已满，回退到提交方同步执行，不丢弃任何触发
    for index in 0..3 {
        engine
            .handle_trigger(job.clone(), format!("inst-{index}"), tx.clone())
            .await;
    }

    let mut success = 0;
    while success < 3 {
        if next_status(&mut rx).await.state == InstanceState::Success {
            success += 1;
        }
    }
    assert_eq!(probe.execute.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unavailable_pool_fails_trigger_without_executing() {
    let registry = Arc::new(JobRegistry::new());
    let probe = Probe::new();
    let job = registry
        .register_transient(
            JobSpec::new("batch", "groupA"),
            probe.factory(Behavior::Succeed, 0),
        )
        .await
        .unwrap();

    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(1, 1));
    engine.shutdown(Duration::from_millis(200)).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.handle_trigger(job, "inst-1".to_string(), tx).await;

    assert_eq!(next_status(&mut rx).await.state, InstanceState::Running);
    let terminal = next_status(&mut rx).await;
    assert_eq!(terminal.state, InstanceState::Failed);
    assert!(terminal
        .error_message
        .as_deref()
        .unwrap()
        .contains("线程池不可用"));
    // 任务体从未执行
    assert_eq!(probe.execute.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_singleton_reused_and_never_destroyed_between_runs() {
    let registry = Arc::new(JobRegistry::new());
    let probe = Probe::new();

    let executor = ProbeExecutor {
        init_count: Arc::clone(&probe.init),
        execute_count: Arc::clone(&probe.execute),
        destroy_count: Arc::clone(&probe.destroy),
        behavior: Behavior::Succeed,
        hold_millis: 0,
    };
    let job = registry
        .register_singleton(JobSpec::new("nightly", "groupA"), Arc::new(executor))
        .await
        .unwrap();
    assert_eq!(probe.init.load(Ordering::SeqCst), 1);

    let engine = ExecutionEngine::new(Arc::clone(&registry), "w1".to_string(), &pool_config(2, 4));
    let (tx, mut rx) = mpsc::unbounded_channel();

    for index in 0..3 {
        engine
            .handle_trigger(job.clone(), format!("inst-{index}"), tx.clone())
            .await;
    }

    let mut success = 0;
    while success < 3 {
        if next_status(&mut rx).await.state == InstanceState::Success {
            success += 1;
        }
    }

    // 单例只初始化一次，多次执行间不销毁
    assert_eq!(probe.init.load(Ordering::SeqCst), 1);
    assert_eq!(probe.execute.load(Ordering::SeqCst), 3);
    assert_eq!(probe.destroy.load(Ordering::SeqCst), 0);
}
