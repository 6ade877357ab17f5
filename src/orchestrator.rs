use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::job::{Attempt, AttemptStatus, JobId, JobSpec, JobState};
use crate::batch::queue::JobQueue;
use crate::batch::retry::{decide, RetryDecision};
use crate::error::Result;
use crate::report::{BatchSummary, JobReport};
use crate::worker::Executor;

/// Control messages accepted while a batch is running.
#[derive(Debug, Clone)]
pub enum Control {
    CancelJob(JobId),
    CancelAll,
}

/// Cheap clonable handle for steering a running batch from outside the
/// run loop.
#[derive(Debug, Clone)]
pub struct BatchController {
    tx: mpsc::UnboundedSender<Control>,
}

impl BatchController {
    /// Cancel one job: a queued job leaves the queue without an attempt,
    /// a running job has its in-flight attempt terminated and is never
    /// retried, even when the attempt finishes before the cancel lands.
    pub fn cancel_job(&self, id: JobId) {
        let _ = self.tx.send(Control::CancelJob(id));
    }

    /// Cancel everything still queued or running.
    pub fn cancel_all(&self) {
        let _ = self.tx.send(Control::CancelAll);
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker pool bound K: at most this many attempts run at once.
    pub concurrency: usize,
    /// Default per-job timeout for jobs without a wall-clock hint.
    /// None means unlimited.
    pub default_timeout: Option<Duration>,
    /// Deadline for the whole batch; exceeding it cancels everything.
    pub batch_timeout: Option<Duration>,
    /// SIGTERM-to-SIGKILL grace when terminating an attempt.
    pub grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            default_timeout: None,
            batch_timeout: None,
            grace: Duration::from_secs(5),
        }
    }
}

/// Everything the orchestrator knows about one job.
#[derive(Debug)]
struct JobRecord {
    spec: Arc<JobSpec>,
    state: JobState,
    attempts: Vec<Attempt>,
    /// A cancel arrived while the job was running. The attempt may still
    /// come back with a natural outcome; it must not be retried.
    cancel_requested: bool,
}

/// Drives one batch to completion: owns the queue and the per-job records,
/// keeps at most K attempts in flight, applies the retry policy to every
/// completed attempt, and freezes the summary when the queue is empty and
/// nothing is running.
///
/// The queue is touched only by this task; workers talk back over a
/// channel, so there is no lock anywhere in the dispatch path.
#[derive(Debug)]
pub struct Orchestrator {
    opts: RunOptions,
    queue: JobQueue,
    records: HashMap<JobId, JobRecord>,
    order: Vec<JobId>,
    executor: Executor,
    ctrl_rx: mpsc::UnboundedReceiver<Control>,
}

impl Orchestrator {
    /// Build an orchestrator over a batch of jobs. A duplicate job id is
    /// rejected here, before anything runs.
    pub fn new(specs: Vec<JobSpec>, opts: RunOptions) -> Result<(Self, BatchController)> {
        let mut queue = JobQueue::new();
        let mut records = HashMap::with_capacity(specs.len());
        let mut order = Vec::with_capacity(specs.len());

        for spec in specs {
            let spec = Arc::new(spec);
            queue.enqueue(spec.clone())?;
            order.push(spec.id.clone());
            records.insert(
                spec.id.clone(),
                JobRecord {
                    spec,
                    state: JobState::Queued,
                    attempts: Vec::new(),
                    cancel_requested: false,
                },
            );
        }

        let executor = Executor::new(opts.grace);
        let (tx, ctrl_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                opts,
                queue,
                records,
                order,
                executor,
                ctrl_rx,
            },
            BatchController { tx },
        ))
    }

    /// Run the batch to completion. Returns once every job has reached a
    /// terminal state; per-job failures never abort the loop.
    pub async fn run(mut self, shutdown: CancellationToken) -> BatchSummary {
        let batch_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let concurrency = self.opts.concurrency.max(1);

        tracing::info!(
            batch_id = %batch_id,
            jobs = self.order.len(),
            concurrency,
            "Batch started"
        );

        let batch_cancel = shutdown.child_token();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Attempt>();
        let mut running: HashMap<JobId, CancellationToken> = HashMap::new();
        let mut interrupted = false;

        let deadline = self
            .opts
            .batch_timeout
            .map(|limit| tokio::time::Instant::now() + limit);
        let batch_deadline = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(batch_deadline);

        loop {
            // Fill free worker slots from the queue front. Each attempt
            // gets a child token so batch-level cancellation fans out.
            while running.len() < concurrency && !batch_cancel.is_cancelled() {
                let Some(next) = self.queue.dequeue() else { break };
                let id = next.spec.id.clone();
                if let Some(record) = self.records.get_mut(&id) {
                    record.state = JobState::Running;
                }

                let token = batch_cancel.child_token();
                let job_token = token.clone();
                let spec = next.spec;
                let number = next.attempt;
                let timeout = spec.timeout(self.opts.default_timeout);
                let executor = self.executor.clone();
                let done = done_tx.clone();

                running.insert(id, token);
                tokio::spawn(async move {
                    let attempt = executor.run(&spec, number, timeout, &job_token).await;
                    let _ = done.send(attempt);
                });
            }

            // A retry can land in the queue after cancellation stopped
            // dispatch, so a cancelled batch ends when its workers do.
            if running.is_empty() && (self.queue.is_empty() || batch_cancel.is_cancelled()) {
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled(), if !interrupted => {
                    tracing::warn!(batch_id = %batch_id, "Shutdown requested, cancelling batch");
                    interrupted = true;
                    batch_cancel.cancel();
                    self.cancel_pending();
                }

                () = &mut batch_deadline, if !interrupted => {
                    tracing::warn!(batch_id = %batch_id, "Batch deadline exceeded, cancelling");
                    interrupted = true;
                    batch_cancel.cancel();
                    self.cancel_pending();
                }

                Some(ctrl) = self.ctrl_rx.recv() => match ctrl {
                    Control::CancelJob(id) => self.cancel_one(&id, &running),
                    Control::CancelAll => {
                        tracing::warn!(batch_id = %batch_id, "Cancel-all requested");
                        interrupted = true;
                        batch_cancel.cancel();
                        self.cancel_pending();
                    }
                },

                Some(attempt) = done_rx.recv() => {
                    running.remove(&attempt.job_id);
                    self.on_attempt_done(attempt);
                }
            }
        }

        // Sweep anything a late retry pushed back after cancellation.
        self.cancel_pending();

        let summary = self.freeze(batch_id, started_at, interrupted);
        tracing::info!(
            batch_id = %batch_id,
            status = %summary.status,
            succeeded = summary.succeeded,
            failed = summary.failed_jobs.len(),
            "Batch finished"
        );
        summary
    }

    /// Settle one finished attempt: record it, ask the retry policy, and
    /// either requeue the job at the back of the line or finalize it.
    fn on_attempt_done(&mut self, attempt: Attempt) {
        let id = attempt.job_id.clone();
        let status = attempt.status;
        let number = attempt.number;

        let Some(record) = self.records.get_mut(&id) else {
            tracing::error!(job_id = %id, "Attempt for unknown job");
            return;
        };
        let decision = decide(&record.spec, &attempt);
        let spec = record.spec.clone();
        record.attempts.push(attempt);

        match decision {
            RetryDecision::Retry if !record.cancel_requested => {
                tracing::warn!(
                    job_id = %id,
                    attempt = number,
                    status = %status,
                    next_attempt = number + 1,
                    "Attempt failed, requeueing"
                );
                record.state = JobState::Retrying;
                self.queue.requeue(spec, number + 1);
            }
            _ => {
                let state = match status {
                    AttemptStatus::Succeeded => JobState::Succeeded,
                    // A cancel that raced the exit still ends the job here.
                    _ if record.cancel_requested => JobState::Cancelled,
                    AttemptStatus::Cancelled => JobState::Cancelled,
                    _ => JobState::Abandoned,
                };
                record.state = state;
                match state {
                    JobState::Succeeded => {
                        tracing::info!(job_id = %id, attempts = number, "Job succeeded");
                    }
                    JobState::Cancelled => {
                        tracing::info!(job_id = %id, attempts = number, "Job cancelled");
                    }
                    _ => {
                        tracing::error!(job_id = %id, attempts = number, "Job abandoned");
                    }
                }
            }
        }
    }

    /// Cancel one job, wherever it currently is.
    fn cancel_one(&mut self, id: &JobId, running: &HashMap<JobId, CancellationToken>) {
        if let Some(token) = running.get(id) {
            tracing::info!(job_id = %id, "Cancelling running job");
            token.cancel();
            // The attempt may already have exited; flag the record so a
            // completion racing this cancel cannot requeue the job.
            if let Some(record) = self.records.get_mut(id) {
                record.cancel_requested = true;
            }
            return;
        }
        if self.queue.cancel(id) {
            tracing::info!(job_id = %id, "Cancelled queued job");
            if let Some(record) = self.records.get_mut(id) {
                record.state = JobState::Cancelled;
            }
        } else {
            tracing::warn!(job_id = %id, "Cancel requested for unknown or finished job");
        }
    }

    /// Drain the queue on batch-wide cancellation. Drained jobs end
    /// Cancelled with whatever attempts they already have.
    fn cancel_pending(&mut self) {
        for item in self.queue.drain() {
            if let Some(record) = self.records.get_mut(&item.spec.id) {
                record.state = JobState::Cancelled;
            }
        }
    }

    fn freeze(
        self,
        batch_id: Uuid,
        started_at: chrono::DateTime<chrono::Utc>,
        interrupted: bool,
    ) -> BatchSummary {
        let mut jobs = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let record = &self.records[id];
            jobs.push(JobReport::new(
                record.spec.id.clone(),
                record.state,
                &record.attempts,
            ));
        }
        BatchSummary::new(batch_id, started_at, interrupted, jobs)
    }
}
