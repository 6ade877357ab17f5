use crate::batch::job::{Attempt, AttemptStatus, Fault, JobSpec};

/// What the orchestrator should do with a job after an attempt finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abandon,
}

/// Pure retry decision: no clocks, no I/O, no state. The same spec and
/// attempt always produce the same answer.
///
/// Retry only a tool failure or a timeout, and only while the attempt
/// budget lasts. Success, cancellation, and an unresolvable command all
/// end the job here.
pub fn decide(spec: &JobSpec, attempt: &Attempt) -> RetryDecision {
    if attempt.fault == Some(Fault::CommandNotFound) {
        // The environment will not change between attempts.
        return RetryDecision::Abandon;
    }
    match attempt.status {
        AttemptStatus::Failed | AttemptStatus::TimedOut if attempt.number < spec.max_attempts => {
            RetryDecision::Retry
        }
        _ => RetryDecision::Abandon,
    }
}
