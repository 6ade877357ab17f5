use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::job::{Attempt, JobId, JobState};
use crate::error::Result;

/// Longest diagnostic shown in the table; full text stays in the JSON.
const DIAG_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Succeeded => write!(f, "succeeded"),
            BatchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Final word on one job: its terminal state plus the full attempt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub state: JobState,
    pub attempts_used: u32,
    pub exit_code: Option<i32>,
    /// Total active time across attempts, not wall clock in the queue.
    pub duration_ms: i64,
    pub error: Option<String>,
    pub attempts: Vec<Attempt>,
}

impl JobReport {
    pub fn new(id: JobId, state: JobState, attempts: &[Attempt]) -> Self {
        let last = attempts.last();
        Self {
            id,
            state,
            attempts_used: attempts.len() as u32,
            exit_code: last.and_then(|a| a.exit_code),
            duration_ms: attempts.iter().filter_map(|a| a.duration_ms()).sum(),
            error: last.and_then(|a| a.error.clone()),
            attempts: attempts.to_vec(),
        }
    }
}

/// Machine-parseable record of a finished batch: one entry per submitted
/// job, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    /// True when a signal, cancel-all, or the batch deadline cut the run
    /// short.
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed_jobs: Vec<JobId>,
    pub jobs: Vec<JobReport>,
}

impl BatchSummary {
    pub fn new(
        batch_id: Uuid,
        started_at: DateTime<Utc>,
        interrupted: bool,
        jobs: Vec<JobReport>,
    ) -> Self {
        let succeeded = jobs
            .iter()
            .filter(|j| j.state == JobState::Succeeded)
            .count();
        let failed_jobs: Vec<JobId> = jobs
            .iter()
            .filter(|j| j.state != JobState::Succeeded)
            .map(|j| j.id.clone())
            .collect();
        let status = if failed_jobs.is_empty() {
            BatchStatus::Succeeded
        } else {
            BatchStatus::Failed
        };
        Self {
            batch_id,
            status,
            interrupted,
            started_at,
            finished_at: Utc::now(),
            succeeded,
            failed_jobs,
            jobs,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<24} {:<10} {:<9} {:<6} {:<10} ERROR",
            "JOB ID", "STATE", "ATTEMPTS", "EXIT", "TIME"
        );
        let _ = writeln!(out, "{}", "-".repeat(78));

        for job in &self.jobs {
            let exit = job
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let time = format!("{}ms", job.duration_ms);
            let error = job
                .error
                .as_deref()
                .map(trim_diagnostic)
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{:<24} {:<10} {:<9} {:<6} {:<10} {}",
                truncate(job.id.as_str(), 24),
                job.state.to_string(),
                job.attempts_used,
                exit,
                time,
                error
            );
        }

        let _ = writeln!(out);
        let _ = write!(
            out,
            "Batch {}: {} ({} of {} jobs succeeded)",
            self.batch_id,
            self.status,
            self.succeeded,
            self.jobs.len()
        );
        if self.interrupted {
            let _ = write!(out, " [interrupted]");
        }
        out.push('\n');
        out
    }
}

/// First line only, capped to the table's diagnostic column.
fn trim_diagnostic(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    truncate(line, DIAG_WIDTH)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let short: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", short)
    }
}
