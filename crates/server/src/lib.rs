pub mod cron_utils;
pub mod handler;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod strategies;
pub mod trigger;

pub use monitor::InstanceMonitor;
pub use registry::WorkerRegistry;
pub use scheduler::SchedulingEngine;
pub use server::{SchedulerServer, ServerHandle};
pub use strategies::{
    RandomStrategy, RoundRobinStrategy, SelectionStrategy, StrategyFactory, WeightedStrategy,
};
pub use trigger::{DispatchOutcome, JobTrigger};
