//! Subprocess execution engine for running job attempts.
//!
//! One attempt = one subprocess: stdout redirected to the job's output
//! file, stderr captured for diagnostics, exit raced against the per-job
//! timeout and the cancellation token.
//!
//! # Execution flow
//!
//! 1. The orchestrator dispatches a queued job into a worker task
//! 2. [`Executor::run`] resolves the command, claims the output file, and
//!    spawns the subprocess
//! 3. Exit, timeout, and cancellation race; losers are terminated with
//!    SIGTERM, then SIGKILL after the grace period
//! 4. The finished [`Attempt`](crate::batch::job::Attempt) flows back to
//!    the orchestrator for the retry decision

pub mod executor;

pub use executor::Executor;
