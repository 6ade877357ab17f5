use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use batchrun::batch::job::{Attempt, AttemptStatus, Fault, JobId, JobSpec, JobState};
use batchrun::batch::queue::JobQueue;
use batchrun::batch::retry::{decide, RetryDecision};
use batchrun::error::BatchError;

fn spec(id: &str, max_attempts: u32) -> JobSpec {
    JobSpec::new(
        JobId::new(id),
        vec!["tool".to_string(), "--run".to_string()],
        PathBuf::from("in.vcf"),
        PathBuf::from("out.vcf"),
        max_attempts,
    )
    .unwrap()
}

fn finished_attempt(id: &str, number: u32, status: AttemptStatus) -> Attempt {
    let mut attempt = Attempt::started(JobId::new(id), number);
    attempt.status = status;
    attempt.exit_code = match status {
        AttemptStatus::Succeeded => Some(0),
        AttemptStatus::Failed => Some(1),
        _ => None,
    };
    attempt.ended_at = Some(chrono::Utc::now());
    attempt
}

// =============================================================================
// Job model
// =============================================================================

#[test]
fn test_job_spec_rejects_empty_command() {
    let err = JobSpec::new(
        JobId::new("empty"),
        vec![],
        PathBuf::from("in"),
        PathBuf::from("out"),
        1,
    )
    .unwrap_err();
    assert!(matches!(err, BatchError::Config(_)));

    let err = JobSpec::new(
        JobId::new("blank"),
        vec![String::new()],
        PathBuf::from("in"),
        PathBuf::from("out"),
        1,
    )
    .unwrap_err();
    assert!(matches!(err, BatchError::Config(_)));
}

#[test]
fn test_job_spec_rejects_zero_attempt_budget() {
    let err = JobSpec::new(
        JobId::new("none"),
        vec!["tool".to_string()],
        PathBuf::from("in"),
        PathBuf::from("out"),
        0,
    )
    .unwrap_err();
    assert!(matches!(err, BatchError::Config(_)));
}

#[test]
fn test_job_spec_command_accessors() {
    let job = spec("a", 1);
    assert_eq!(job.program(), "tool");
    assert_eq!(job.args(), ["--run"]);
}

#[test]
fn test_job_timeout_prefers_resource_hint() {
    let mut job = spec("a", 1);
    assert_eq!(job.timeout(None), None);
    assert_eq!(
        job.timeout(Some(Duration::from_secs(60))),
        Some(Duration::from_secs(60))
    );

    job.resources.time_limit_secs = Some(10);
    assert_eq!(
        job.timeout(Some(Duration::from_secs(60))),
        Some(Duration::from_secs(10))
    );
}

#[test]
fn test_job_state_terminality() {
    assert!(JobState::Succeeded.is_terminal());
    assert!(JobState::Abandoned.is_terminal());
    assert!(JobState::Cancelled.is_terminal());
    assert!(!JobState::Queued.is_terminal());
    assert!(!JobState::Running.is_terminal());
    assert!(!JobState::Retrying.is_terminal());
}

#[test]
fn test_attempt_duration() {
    let mut attempt = Attempt::started(JobId::new("t"), 1);
    assert!(attempt.duration_ms().is_none());

    attempt.ended_at = Some(attempt.started_at + chrono::Duration::milliseconds(1500));
    assert_eq!(attempt.duration_ms(), Some(1500));
}

// =============================================================================
// Queue
// =============================================================================

#[test]
fn test_queue_fifo_order() {
    let mut queue = JobQueue::new();
    queue.enqueue(Arc::new(spec("a", 1))).unwrap();
    queue.enqueue(Arc::new(spec("b", 1))).unwrap();
    queue.enqueue(Arc::new(spec("c", 1))).unwrap();

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.dequeue().unwrap().spec.id, JobId::new("a"));
    assert_eq!(queue.dequeue().unwrap().spec.id, JobId::new("b"));
    assert_eq!(queue.dequeue().unwrap().spec.id, JobId::new("c"));
    assert!(queue.dequeue().is_none());
}

#[test]
fn test_queue_rejects_duplicate_id() {
    let mut queue = JobQueue::new();
    queue.enqueue(Arc::new(spec("a", 1))).unwrap();

    let err = queue.enqueue(Arc::new(spec("a", 1))).unwrap_err();
    assert!(matches!(err, BatchError::DuplicateJobId(_)));
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_queue_requeue_goes_to_back() {
    let mut queue = JobQueue::new();
    queue.enqueue(Arc::new(spec("a", 2))).unwrap();
    queue.enqueue(Arc::new(spec("b", 1))).unwrap();

    let first = queue.dequeue().unwrap();
    assert_eq!(first.spec.id, JobId::new("a"));
    assert_eq!(first.attempt, 1);

    // The retry waits behind b's first attempt.
    queue.requeue(first.spec, 2);
    assert_eq!(queue.dequeue().unwrap().spec.id, JobId::new("b"));

    let retried = queue.dequeue().unwrap();
    assert_eq!(retried.spec.id, JobId::new("a"));
    assert_eq!(retried.attempt, 2);
}

#[test]
fn test_queue_cancel_removes_pending() {
    let mut queue = JobQueue::new();
    queue.enqueue(Arc::new(spec("a", 1))).unwrap();
    queue.enqueue(Arc::new(spec("b", 1))).unwrap();

    assert!(queue.cancel(&JobId::new("a")));
    assert!(!queue.cancel(&JobId::new("missing")));

    assert_eq!(queue.dequeue().unwrap().spec.id, JobId::new("b"));
    assert!(queue.is_empty());
}

#[test]
fn test_queue_drain() {
    let mut queue = JobQueue::new();
    queue.enqueue(Arc::new(spec("a", 1))).unwrap();
    queue.enqueue(Arc::new(spec("b", 1))).unwrap();

    let drained = queue.drain();
    assert_eq!(drained.len(), 2);
    assert!(queue.is_empty());
}

// =============================================================================
// Retry policy
// =============================================================================

#[test]
fn test_retry_failure_within_budget() {
    let job = spec("r", 3);
    let attempt = finished_attempt("r", 1, AttemptStatus::Failed);
    assert_eq!(decide(&job, &attempt), RetryDecision::Retry);

    let attempt = finished_attempt("r", 2, AttemptStatus::Failed);
    assert_eq!(decide(&job, &attempt), RetryDecision::Retry);
}

#[test]
fn test_abandon_when_budget_spent() {
    let job = spec("r", 3);
    let attempt = finished_attempt("r", 3, AttemptStatus::Failed);
    assert_eq!(decide(&job, &attempt), RetryDecision::Abandon);
}

#[test]
fn test_single_attempt_budget_never_retries() {
    let job = spec("once", 1);
    let attempt = finished_attempt("once", 1, AttemptStatus::Failed);
    assert_eq!(decide(&job, &attempt), RetryDecision::Abandon);
}

#[test]
fn test_retry_timeout_within_budget() {
    let job = spec("t", 2);
    let attempt = finished_attempt("t", 1, AttemptStatus::TimedOut);
    assert_eq!(decide(&job, &attempt), RetryDecision::Retry);
}

#[test]
fn test_success_is_final() {
    let job = spec("s", 5);
    let attempt = finished_attempt("s", 1, AttemptStatus::Succeeded);
    assert_eq!(decide(&job, &attempt), RetryDecision::Abandon);
}

#[test]
fn test_cancelled_is_never_retried() {
    let job = spec("c", 5);
    let attempt = finished_attempt("c", 1, AttemptStatus::Cancelled);
    assert_eq!(decide(&job, &attempt), RetryDecision::Abandon);
}

#[test]
fn test_unresolvable_command_is_never_retried() {
    let job = spec("ghost", 5);
    let mut attempt = finished_attempt("ghost", 1, AttemptStatus::Failed);
    attempt.fault = Some(Fault::CommandNotFound);
    attempt.exit_code = None;
    assert_eq!(decide(&job, &attempt), RetryDecision::Abandon);
}

#[test]
fn test_decision_is_deterministic() {
    let job = spec("d", 2);
    let attempt = finished_attempt("d", 1, AttemptStatus::Failed);
    let first = decide(&job, &attempt);
    for _ in 0..10 {
        assert_eq!(decide(&job, &attempt), first);
    }
}
