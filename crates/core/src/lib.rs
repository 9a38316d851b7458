pub mod codec;
pub mod config;
pub mod errors;
pub mod models;

pub use codec::{read_message, write_message, MAX_FRAME_BYTES};
pub use config::{
    AppConfig, ExecutionPoolConfig, HeartbeatConfig, ReconnectConfig, ServerConfig, WorkerConfig,
};
pub use errors::{SchedulerError, SchedulerResult};
pub use models::{
    InstanceState, JobDefinition, JobInstance, JobResult, Message, MessageKind, WorkerInfo,
};
