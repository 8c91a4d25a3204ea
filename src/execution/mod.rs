//! Execution of batch runs.
//!
//! This module holds the worker pool, the batch scheduler that feeds it, and
//! the progress and metrics plumbing around them.

pub mod metrics;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod worker;

pub use metrics::{PerformanceMetrics, PerformanceMonitor, RunMetrics};
pub use pool::{process_item, ExecutionPool, InlinePool, ItemOutput, WorkerPool, MAX_POOL_SIZE};
pub use progress::{Progress, ProgressCallback, ProgressTracker};
pub use scheduler::{BatchReport, BatchScheduler, ItemError, SchedulerState};
pub use worker::{WorkerJob, WorkerReply};
