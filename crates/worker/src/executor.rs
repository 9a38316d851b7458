//! 任务执行器接口
//!
//! `JobExecutor` 是完整的执行器生命周期接口：`init` 在实例投入使用前
//! 调用一次，`execute` 执行任务体，`destroy` 在实例废弃时调用。
//! 接口本身不提供默认实现，只关心执行逻辑的任务通过 [`FnExecutor`]
//! 适配器在注册时组合出空的生命周期钩子；单例与否同样在注册时声明
//! （`register_singleton` / `register_transient`），不由执行器自己决定。

use async_trait::async_trait;

use jjob_core::{JobDefinition, SchedulerResult};

/// 任务执行器生命周期接口
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// 初始化执行器，单例在注册时调用一次，瞬时实例每次触发调用
    async fn init(&self) -> SchedulerResult<()>;

    /// 执行任务体，返回可选的文本输出（随结果上报发送）
    async fn execute(&self, job: &JobDefinition) -> SchedulerResult<Option<String>>;

    /// 销毁执行器，单例在注销或停机时调用，瞬时实例每次触发后调用
    async fn destroy(&self);
}

/// 执行器工厂，为每次触发构建新的执行器实例
pub trait ExecutorFactory: Send + Sync {
    fn create(&self) -> Box<dyn JobExecutor>;
}

impl<F> ExecutorFactory for F
where
    F: Fn() -> Box<dyn JobExecutor> + Send + Sync,
{
    fn create(&self) -> Box<dyn JobExecutor> {
        self()
    }
}

/// 函数适配器：把仅包含执行逻辑的闭包组合成完整的执行器，
/// init/destroy为空实现
pub struct FnExecutor<F> {
    body: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&JobDefinition) -> SchedulerResult<Option<String>> + Send + Sync,
{
    pub fn new(body: F) -> Self {
        Self { body }
    }
}

#[async_trait]
impl<F> JobExecutor for FnExecutor<F>
where
    F: Fn(&JobDefinition) -> SchedulerResult<Option<String>> + Send + Sync,
{
    async fn init(&self) -> SchedulerResult<()> {
        Ok(())
    }

    async fn execute(&self, job: &JobDefinition) -> SchedulerResult<Option<String>> {
        (self.body)(job)
    }

    async fn destroy(&self) {}
}
