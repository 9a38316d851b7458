pub mod client;
pub mod connection;
pub mod execution;
pub mod executor;
pub mod registry;

pub use client::WorkerClient;
pub use connection::ConnectionManager;
pub use execution::ExecutionEngine;
pub use executor::{ExecutorFactory, FnExecutor, JobExecutor};
pub use registry::{ExecutorLease, JobRegistry, JobSpec};
