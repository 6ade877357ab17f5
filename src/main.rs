use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use batchrun::config::BatchConfig;
use batchrun::orchestrator::{Orchestrator, RunOptions};
use batchrun::report::{BatchStatus, BatchSummary};
use batchrun::shutdown::install_shutdown_handler;
use batchrun::worker::executor::resolve_program;

#[derive(Parser, Debug)]
#[command(name = "batchrun")]
#[command(version)]
#[command(about = "Run a batch of independent command-line jobs with bounded concurrency and per-job retry")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a batch to completion and print the summary
    Run(RunArgs),

    /// Expand the manifest and show what would run, without running anything
    Plan(PlanArgs),
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the batch manifest (TOML)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Override the manifest's worker pool bound
    #[arg(long)]
    concurrency: Option<usize>,

    /// Override the manifest's default attempt budget
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Override the manifest's default per-job timeout (seconds, 0 = unlimited)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    /// Also write the JSON summary to this file
    #[arg(long)]
    summary: Option<PathBuf>,
}

// =============================================================================
// Plan Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Path to the batch manifest (TOML)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Exit Codes
// =============================================================================

/// One or more jobs did not succeed.
const EXIT_JOBS_FAILED: i32 = 1;
/// The manifest or the flags were unusable.
const EXIT_CONFIG: i32 = 2;
/// A signal or the batch deadline cut the run short.
const EXIT_INTERRUPTED: i32 = 3;

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct PlanItem {
    job_id: String,
    program: String,
    resolvable: bool,
    input: String,
    output: String,
    max_attempts: u32,
    timeout_secs: Option<u64>,
    mem_mb: Option<u64>,
    cpus: Option<u32>,
}

#[derive(Serialize)]
struct PlanOutput {
    concurrency: usize,
    total_count: usize,
    jobs: Vec<PlanItem>,
}

// =============================================================================
// Batch Run
// =============================================================================

async fn run_batch(args: RunArgs) -> i32 {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match BatchConfig::load_from(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            return EXIT_CONFIG;
        }
    };

    // Flags override the manifest.
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.timeout_secs = timeout_secs;
    }
    if let Err(err) = config.validate() {
        eprintln!("Error: {}", err);
        return EXIT_CONFIG;
    }

    let specs = match config.resolve_jobs() {
        Ok(specs) => specs,
        Err(err) => {
            eprintln!("Error: {}", err);
            return EXIT_CONFIG;
        }
    };

    let opts = RunOptions {
        concurrency: config.concurrency,
        default_timeout: config.default_timeout(),
        batch_timeout: config.batch_timeout(),
        grace: config.grace(),
    };

    let (orchestrator, _controller) = match Orchestrator::new(specs, opts) {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("Error: {}", err);
            return EXIT_CONFIG;
        }
    };

    let shutdown = install_shutdown_handler();
    let summary = orchestrator.run(shutdown).await;

    match args.output {
        OutputFormat::Json => match summary.to_json() {
            Ok(json) => println!("{}", json),
            Err(err) => {
                eprintln!("Error: failed to encode summary: {}", err);
                return EXIT_JOBS_FAILED;
            }
        },
        OutputFormat::Table => print!("{}", summary.render_table()),
    }

    if let Some(path) = &args.summary {
        if let Err(err) = write_summary_file(&summary, path) {
            eprintln!(
                "Error: failed to write summary to {}: {}",
                path.display(),
                err
            );
        }
    }

    if summary.interrupted {
        return EXIT_INTERRUPTED;
    }
    match summary.status {
        BatchStatus::Succeeded => 0,
        BatchStatus::Failed => EXIT_JOBS_FAILED,
    }
}

fn write_summary_file(summary: &BatchSummary, path: &PathBuf) -> batchrun::Result<()> {
    let json = summary.to_json()?;
    std::fs::write(path, json)?;
    Ok(())
}

// =============================================================================
// Batch Plan
// =============================================================================

fn plan_batch(args: PlanArgs) -> i32 {
    let config = match BatchConfig::load_from(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            return EXIT_CONFIG;
        }
    };

    let specs = match config.resolve_jobs() {
        Ok(specs) => specs,
        Err(err) => {
            eprintln!("Error: {}", err);
            return EXIT_CONFIG;
        }
    };

    let items: Vec<PlanItem> = specs
        .iter()
        .map(|spec| PlanItem {
            job_id: spec.id.to_string(),
            program: spec.program().to_string(),
            resolvable: resolve_program(spec.program()).is_some(),
            input: spec.input_path.display().to_string(),
            output: spec.output_path.display().to_string(),
            max_attempts: spec.max_attempts,
            timeout_secs: spec.timeout(config.default_timeout()).map(|t| t.as_secs()),
            mem_mb: spec.resources.mem_mb,
            cpus: spec.resources.cpus,
        })
        .collect();

    match args.output {
        OutputFormat::Json => {
            let output = PlanOutput {
                concurrency: config.concurrency,
                total_count: items.len(),
                jobs: items,
            };
            match serde_json::to_string_pretty(&output) {
                Ok(json) => println!("{}", json),
                Err(err) => {
                    eprintln!("Error: failed to encode plan: {}", err);
                    return EXIT_CONFIG;
                }
            }
        }
        OutputFormat::Table => {
            println!(
                "{:<24} {:<20} {:<9} {:<9} {:<9} {:<28} OUTPUT",
                "JOB ID", "PROGRAM", "RESOLVED", "ATTEMPTS", "TIMEOUT", "INPUT"
            );
            println!("{}", "-".repeat(120));

            for item in &items {
                let resolved = if item.resolvable { "yes" } else { "NO" };
                let timeout = item
                    .timeout_secs
                    .map(|t| format!("{}s", t))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:<20} {:<9} {:<9} {:<9} {:<28} {}",
                    item.job_id,
                    item.program,
                    resolved,
                    item.max_attempts,
                    timeout,
                    item.input,
                    item.output
                );
            }
            println!();
            println!("{} jobs, concurrency {}", items.len(), config.concurrency);

            if items.iter().any(|item| !item.resolvable) {
                eprintln!("Warning: some programs are not resolvable on PATH");
            }
        }
    }

    0
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match args.command {
        Commands::Run(run_args) => run_batch(run_args).await,
        Commands::Plan(plan_args) => plan_batch(plan_args),
    };

    std::process::exit(code);
}
