use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};

/// Stable job identifier, unique within a batch. Assigned when the job is
/// built from the manifest and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Advisory resource hints. Memory and CPU counts are informational
/// (surfaced by `plan`); the wall-clock limit feeds the per-job timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHints {
    pub mem_mb: Option<u64>,
    pub cpus: Option<u32>,
    pub time_limit_secs: Option<u64>,
}

impl ResourceHints {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }
}

/// Immutable description of one unit of work: run `command`, reading
/// `input_path`, writing stdout to `output_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub command: Vec<String>,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub resources: ResourceHints,
    pub max_attempts: u32,
    #[serde(default)]
    pub overwrite: bool,
}

impl JobSpec {
    pub fn new(
        id: JobId,
        command: Vec<String>,
        input_path: PathBuf,
        output_path: PathBuf,
        max_attempts: u32,
    ) -> Result<Self> {
        if command.is_empty() || command[0].is_empty() {
            return Err(BatchError::Config(format!("job {id}: empty command")));
        }
        if max_attempts == 0 {
            return Err(BatchError::Config(format!(
                "job {id}: max_attempts must be at least 1"
            )));
        }
        Ok(Self {
            id,
            command,
            input_path,
            output_path,
            env: Vec::new(),
            resources: ResourceHints::default(),
            max_attempts,
            overwrite: false,
        })
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    /// Effective per-job timeout: the wall-clock hint wins over the
    /// batch-wide default. `None` means unlimited.
    pub fn timeout(&self, batch_default: Option<Duration>) -> Option<Duration> {
        self.resources.time_limit().or(batch_default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptStatus::Pending => write!(f, "pending"),
            AttemptStatus::Running => write!(f, "running"),
            AttemptStatus::Succeeded => write!(f, "succeeded"),
            AttemptStatus::Failed => write!(f, "failed"),
            AttemptStatus::TimedOut => write!(f, "timed_out"),
            AttemptStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure detected before the subprocess produced an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// command[0] could not be resolved on PATH. Not retryable.
    CommandNotFound,
    /// The output file already exists and overwrite is off.
    OutputExists,
    /// The OS refused to spawn the process.
    SpawnFailed,
    /// Other I/O failure while preparing the attempt.
    Io,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::CommandNotFound => write!(f, "command_not_found"),
            Fault::OutputExists => write!(f, "output_exists"),
            Fault::SpawnFailed => write!(f, "spawn_failed"),
            Fault::Io => write!(f, "io"),
        }
    }
}

/// Record of one run of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub job_id: JobId,
    pub number: u32,
    pub status: AttemptStatus,
    pub exit_code: Option<i32>,
    pub fault: Option<Fault>,
    pub stderr: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn started(job_id: JobId, number: u32) -> Self {
        Self {
            job_id,
            number,
            status: AttemptStatus::Running,
            exit_code: None,
            fault: None,
            stderr: String::new(),
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub(crate) fn complete(&mut self, status: AttemptStatus, exit_code: Option<i32>) {
        self.status = status;
        self.exit_code = exit_code;
        self.ended_at = Some(Utc::now());
    }

    /// Fail before any subprocess ran.
    pub(crate) fn fail_fast(&mut self, fault: Fault, error: String) {
        self.status = AttemptStatus::Failed;
        self.fault = Some(fault);
        self.error = Some(error);
        self.ended_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|ended| (ended - self.started_at).num_milliseconds())
    }
}

/// Job lifecycle as the orchestrator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Abandoned,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Abandoned | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Retrying => write!(f, "retrying"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Abandoned => write!(f, "abandoned"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}
