use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::batch::job::{Attempt, AttemptStatus, Fault, JobSpec};

/// Upper bound on draining captured stderr after the child is gone. A
/// grandchild holding the pipe open must not stall the attempt.
const STDERR_DRAIN: Duration = Duration::from_secs(5);

/// How one waited-on attempt left the race between exit, timeout, and
/// cancellation.
enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs single attempts of jobs as subprocesses.
///
/// Each attempt writes the tool's stdout straight to the job's output file
/// and captures stderr for diagnostics. On unix every child leads its own
/// process group; a timed-out or cancelled attempt has the whole group
/// SIGTERMed, given the grace period to exit, then SIGKILLed, so anything
/// the tool forked dies with it and nothing outlives the attempt.
#[derive(Debug, Clone)]
pub struct Executor {
    grace: Duration,
}

impl Executor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Run one attempt to completion and report what happened. Per-job
    /// failures are encoded in the returned `Attempt`, never bubbled: one
    /// bad job must not disturb the rest of the batch.
    pub async fn run(
        &self,
        spec: &JobSpec,
        number: u32,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Attempt {
        let mut attempt = Attempt::started(spec.id.clone(), number);

        tracing::info!(
            job_id = %spec.id,
            attempt = number,
            program = %spec.program(),
            "Starting attempt"
        );

        // Resolve the program before touching the filesystem. An
        // unresolvable command fails the attempt without a spawn.
        let program = match resolve_program(spec.program()) {
            Some(path) => path,
            None => {
                attempt.fail_fast(
                    Fault::CommandNotFound,
                    format!("{}: command not found on PATH", spec.program()),
                );
                tracing::error!(
                    job_id = %spec.id,
                    program = %spec.program(),
                    "Command not resolvable"
                );
                return attempt;
            }
        };

        // The exclusive create is the idempotence guard: an output left by
        // an earlier run fails the attempt before any work is redone.
        let mut open_opts = std::fs::OpenOptions::new();
        open_opts.write(true);
        if spec.overwrite {
            open_opts.create(true).truncate(true);
        } else {
            open_opts.create_new(true);
        }
        let output_file = match open_opts.open(&spec.output_path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt.fail_fast(
                    Fault::OutputExists,
                    format!("output already exists: {}", spec.output_path.display()),
                );
                tracing::warn!(
                    job_id = %spec.id,
                    output = %spec.output_path.display(),
                    "Output already exists"
                );
                return attempt;
            }
            Err(err) => {
                attempt.fail_fast(
                    Fault::Io,
                    format!("failed to open {}: {}", spec.output_path.display(), err),
                );
                return attempt;
            }
        };

        let mut cmd = Command::new(&program);
        cmd.args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Lead a fresh process group so termination can reach anything the
        // tool forks, not just the direct child.
        #[cfg(unix)]
        cmd.process_group(0);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                attempt.fail_fast(Fault::SpawnFailed, format!("{}: {}", program, err));
                tracing::error!(job_id = %spec.id, error = %err, "Failed to spawn");
                return attempt;
            }
        };

        // Drain stderr concurrently so a chatty tool cannot fill the pipe
        // and deadlock against our wait.
        let stderr_task = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = sleep_or_forever(timeout) => WaitOutcome::TimedOut,
            status = child.wait() => WaitOutcome::Exited(status),
        };

        match &outcome {
            WaitOutcome::Exited(_) => {}
            WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
                self.terminate(&mut child).await;
            }
        }

        attempt.stderr = if let Some(mut handle) = stderr_task {
            match tokio::time::timeout(STDERR_DRAIN, &mut handle).await {
                Ok(Ok(buf)) => String::from_utf8_lossy(&buf).into_owned(),
                Ok(Err(_)) => String::new(),
                Err(_) => {
                    handle.abort();
                    String::new()
                }
            }
        } else {
            String::new()
        };

        match outcome {
            WaitOutcome::Exited(Ok(status)) => {
                let exit_code = status.code();
                if status.success() {
                    attempt.complete(AttemptStatus::Succeeded, exit_code);
                } else {
                    attempt.error = Some(if attempt.stderr.is_empty() {
                        format!("Exit code: {:?}", exit_code)
                    } else {
                        attempt.stderr.clone()
                    });
                    attempt.complete(AttemptStatus::Failed, exit_code);
                }
            }
            WaitOutcome::Exited(Err(err)) => {
                attempt.error = Some(format!("failed to wait on child: {}", err));
                attempt.complete(AttemptStatus::Failed, None);
            }
            WaitOutcome::TimedOut => {
                attempt.error = Some(match timeout {
                    Some(limit) => format!("timed out after {:.1}s", limit.as_secs_f64()),
                    None => "timed out".to_string(),
                });
                tracing::warn!(job_id = %spec.id, attempt = number, "Attempt timed out");
                attempt.complete(AttemptStatus::TimedOut, None);
            }
            WaitOutcome::Cancelled => {
                attempt.error = Some("cancelled".to_string());
                attempt.complete(AttemptStatus::Cancelled, None);
            }
        }

        tracing::info!(
            job_id = %spec.id,
            attempt = number,
            status = %attempt.status,
            exit_code = ?attempt.exit_code,
            "Attempt finished"
        );

        attempt
    }

    /// Termination ladder: SIGTERM, wait out the grace period, SIGKILL.
    /// Signals address the child's process group (its pgid equals its pid,
    /// see `process_group(0)` in `run`), so forked grandchildren die with
    /// it and release the inherited stderr pipe. Always reaps, so `run`
    /// returns even against a child that ignores SIGTERM.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        let pgid = child.id().map(|pid| pid as libc::pid_t);
        #[cfg(unix)]
        if let Some(pgid) = pgid {
            unsafe {
                libc::kill(-pgid, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        if tokio::time::timeout(self.grace, child.wait()).await.is_err() {
            #[cfg(unix)]
            if let Some(pgid) = pgid {
                unsafe {
                    libc::kill(-pgid, libc::SIGKILL);
                }
            }
            let _ = child.kill().await;
        }
    }
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

/// Resolve a command to a runnable path. Names containing a path separator
/// are checked directly; bare names are searched through each PATH entry,
/// requiring a regular file with an executable bit.
pub fn resolve_program(name: &str) -> Option<String> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        return is_executable(Path::new(name)).then(|| name.to_string());
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':') {
        if dir.is_empty() {
            continue;
        }
        let candidate = Path::new(dir).join(name);
        if is_executable(&candidate) {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }

    None
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match path.metadata() {
            Ok(metadata) => metadata.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        true
    }
}
