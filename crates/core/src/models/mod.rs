//! 数据模型
//!
//! 定义分布式任务调度系统的核心数据结构：Worker信息、任务定义、
//! 任务实例以及协议消息信封。所有模型均支持序列化，用于网络传输。

pub mod instance;
pub mod job;
pub mod message;
pub mod worker;

pub use instance::*;
pub use job::*;
pub use message::*;
pub use worker::*;
