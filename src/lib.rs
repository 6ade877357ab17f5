pub mod batch;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod shutdown;
pub mod worker;

pub use batch::job::{Attempt, AttemptStatus, Fault, JobId, JobSpec, JobState, ResourceHints};
pub use batch::queue::JobQueue;
pub use batch::retry::{decide, RetryDecision};
pub use config::BatchConfig;
pub use error::{BatchError, Result};
pub use orchestrator::{BatchController, Orchestrator, RunOptions};
pub use report::{BatchStatus, BatchSummary, JobReport};
pub use worker::Executor;
