use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::job::{JobId, JobSpec, ResourceHints};
use crate::error::{BatchError, Result};

fn default_concurrency() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    1
}

fn default_grace_secs() -> u64 {
    5
}

fn default_output_suffix() -> String {
    ".out".to_string()
}

/// Batch manifest, loaded from TOML.
///
/// Jobs come from explicit `[[jobs]]` entries, from a `[template]` fanned
/// out over a list of input files, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Worker pool bound K. 1 reproduces a strictly sequential run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Default attempt budget for jobs that do not set their own.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Default per-job timeout in seconds; 0 means unlimited.
    #[serde(default)]
    pub timeout_secs: u64,

    /// Deadline for the whole batch, in seconds.
    #[serde(default)]
    pub batch_timeout_secs: Option<u64>,

    /// SIGTERM-to-SIGKILL grace when terminating an attempt, in seconds.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Let jobs truncate an existing output file instead of failing.
    /// Without it, a failed attempt leaves its claimed output in place,
    /// so retries keep failing until the path is cleared by hand.
    #[serde(default)]
    pub overwrite: bool,

    #[serde(default)]
    pub jobs: Vec<JobEntry>,

    #[serde(default)]
    pub template: Option<TemplateEntry>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            timeout_secs: 0,
            batch_timeout_secs: None,
            grace_secs: default_grace_secs(),
            overwrite: false,
            jobs: Vec::new(),
            template: None,
        }
    }
}

/// One explicit job entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    /// Stable id; defaults to `job-<position>` when omitted.
    #[serde(default)]
    pub id: Option<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub resources: Option<ResourceHints>,
}

/// One tool invocation per input file. `{input}` and `{output}` in the
/// args are substituted per file; the output lands in `output_dir` named
/// after the input's stem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub resources: Option<ResourceHints>,
}

impl BatchConfig {
    /// Load and validate a manifest.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BatchError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: BatchConfig = toml::from_str(&content)
            .map_err(|e| BatchError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BatchError::Config("concurrency must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(BatchError::Config("max_attempts must be at least 1".into()));
        }
        if self.jobs.is_empty() && self.template.is_none() {
            return Err(BatchError::Config(
                "no jobs: provide [[jobs]] entries or a [template]".into(),
            ));
        }
        if let Some(template) = &self.template {
            if template.inputs.is_empty() {
                return Err(BatchError::Config("[template] has no inputs".into()));
            }
            if !template.args.iter().any(|arg| arg.contains("{input}")) {
                return Err(BatchError::Config(
                    "[template] args never mention {input}".into(),
                ));
            }
        }
        Ok(())
    }

    /// Batch-wide default timeout; `timeout_secs = 0` means unlimited.
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Expand the manifest into concrete job specs: explicit entries in
    /// order, then the template fanned out over its inputs. Ids are not
    /// de-duplicated here; the queue rejects duplicates at enqueue.
    pub fn resolve_jobs(&self) -> Result<Vec<JobSpec>> {
        let mut specs = Vec::new();

        for (index, entry) in self.jobs.iter().enumerate() {
            let id = entry
                .id
                .clone()
                .unwrap_or_else(|| format!("job-{}", index + 1));
            let mut command = Vec::with_capacity(entry.args.len() + 1);
            command.push(entry.program.clone());
            command.extend(entry.args.iter().cloned());

            let mut spec = JobSpec::new(
                JobId::new(id),
                command,
                entry.input.clone(),
                entry.output.clone(),
                entry.max_attempts.unwrap_or(self.max_attempts),
            )?;
            spec.env = entry
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            spec.overwrite = entry.overwrite.unwrap_or(self.overwrite);
            spec.resources = entry.resources.clone().unwrap_or_default();
            specs.push(spec);
        }

        if let Some(template) = &self.template {
            self.expand_template(template, &mut specs)?;
        }

        Ok(specs)
    }

    fn expand_template(&self, template: &TemplateEntry, specs: &mut Vec<JobSpec>) -> Result<()> {
        for input in &template.inputs {
            let stem = input
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| {
                    BatchError::Config(format!(
                        "cannot derive a job id from {}",
                        input.display()
                    ))
                })?;
            let output = template
                .output_dir
                .join(format!("{}{}", stem, template.output_suffix));
            let input_str = input.to_string_lossy();
            let output_str = output.to_string_lossy();

            let mut command = Vec::with_capacity(template.args.len() + 1);
            command.push(template.program.clone());
            for arg in &template.args {
                command.push(
                    arg.replace("{input}", &input_str)
                        .replace("{output}", &output_str),
                );
            }

            let mut spec = JobSpec::new(
                JobId::new(stem),
                command,
                input.clone(),
                output,
                template.max_attempts.unwrap_or(self.max_attempts),
            )?;
            spec.env = template
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            spec.overwrite = template.overwrite.unwrap_or(self.overwrite);
            spec.resources = template.resources.clone().unwrap_or_default();
            specs.push(spec);
        }
        Ok(())
    }
}
