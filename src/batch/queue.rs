use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::batch::job::{JobId, JobSpec};
use crate::error::{BatchError, Result};

/// One pending unit of dispatch: the shared spec plus the attempt number
/// the next run will carry.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub spec: Arc<JobSpec>,
    pub attempt: u32,
}

/// FIFO queue of pending jobs. Retries go to the back of the line, so
/// already-queued first attempts are never starved by a flapping job.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: VecDeque<QueuedJob>,
    seen: HashSet<JobId>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a first attempt. Rejects an id this queue has already seen;
    /// duplicate detection happens here, before anything runs.
    pub fn enqueue(&mut self, spec: Arc<JobSpec>) -> Result<()> {
        if !self.seen.insert(spec.id.clone()) {
            return Err(BatchError::DuplicateJobId(spec.id.to_string()));
        }
        self.pending.push_back(QueuedJob { spec, attempt: 1 });
        Ok(())
    }

    /// Put a job back for its next attempt, behind everything already queued.
    pub fn requeue(&mut self, spec: Arc<JobSpec>, attempt: u32) {
        self.pending.push_back(QueuedJob { spec, attempt });
    }

    /// Pop the next job to dispatch, or None when nothing is pending.
    pub fn dequeue(&mut self) -> Option<QueuedJob> {
        self.pending.pop_front()
    }

    /// Remove a pending job without running it. Returns true if it was
    /// still queued.
    pub fn cancel(&mut self, id: &JobId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|item| &item.spec.id != id);
        self.pending.len() < before
    }

    /// Remove and return every pending job (batch-wide cancellation).
    pub fn drain(&mut self) -> Vec<QueuedJob> {
        self.pending.drain(..).collect()
    }

    /// Returns the current number of pending jobs
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
