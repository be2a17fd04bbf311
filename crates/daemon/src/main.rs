//! jobflow - job engine daemon and operator CLI

mod logging;
mod settings;
mod wiring;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobflow_core::application::{CancelOutcome, EnqueueOptions, ImportPayload};
use jobflow_core::domain::{JobState, JobType};
use jobflow_core::port::SourceFormat;
use settings::Settings;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Parser)]
#[command(name = "jobflow")]
#[command(about = "Job engine with resumable batch imports", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (TOML); defaults to ./jobflow.toml when present
    #[arg(short, long, global = true, env = "JOBFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run recovery, all worker pools and the maintenance loop until Ctrl+C
    Run,

    /// Enqueue an import of a CSV or JSON Lines file
    Import {
        path: PathBuf,

        /// csv or jsonl; inferred from the extension when omitted
        #[arg(short, long)]
        format: Option<SourceFormat>,

        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        priority: i32,

        #[arg(long)]
        dedupe_key: Option<String>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Run the engine in this process until the import finishes
        #[arg(long)]
        wait: bool,
    },

    /// Show a job and its import progress
    Status { job_id: String },

    /// Cancel a waiting job, or ask an active one to stop
    Cancel { job_id: String },

    /// Job counts per state
    Depth {
        /// Only this job type
        job_type: Option<String>,
    },

    /// Delete finished jobs and their checkpoints
    Purge {
        #[arg(short = 't', long = "type")]
        job_type: String,

        #[arg(long, default_value = "7")]
        older_than_days: u32,

        /// Terminal states to purge (repeatable); all terminal states when omitted
        #[arg(long = "state")]
        states: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let _log_guard = logging::init(&settings.log)?;

    info!("jobflow v{} starting...", VERSION);
    let engine = wiring::build(&settings).await?;

    match cli.command {
        Commands::Run => run(engine).await,
        Commands::Import {
            path,
            format,
            priority,
            dedupe_key,
            batch_size,
            wait,
        } => {
            let source = std::fs::canonicalize(&path)
                .with_context(|| format!("cannot read import source {}", path.display()))?;
            let payload = ImportPayload {
                source: source.display().to_string(),
                format,
                batch_size,
                total_rows: None,
            };

            let mut options = EnqueueOptions::default().with_priority(priority);
            if let Some(key) = dedupe_key {
                options = options.with_dedupe_key(key);
            }

            let manager = &engine.manager;
            let job_id = manager
                .enqueue(&JobType::import(), payload.to_value(), options)
                .await
                .context("enqueue failed")?;
            println!("{}", job_id);

            if wait {
                // A daemon may own ACTIVE jobs in the same store; leave recovery to it
                let handle = manager.start_pools();
                let outcome = manager.wait_for_terminal(&job_id).await;
                handle.shutdown().await;
                outcome?;
                print_json(&manager.get_status(&job_id).await?)?;
            }
            Ok(())
        }
        Commands::Status { job_id } => {
            let status = engine.manager.get_status(&job_id).await?;
            print_json(&status)
        }
        Commands::Cancel { job_id } => {
            match engine.manager.cancel(&job_id).await? {
                CancelOutcome::Cancelled => println!("{} cancelled", job_id),
                CancelOutcome::Requested => {
                    println!("{} is running; cancellation requested", job_id)
                }
            }
            Ok(())
        }
        Commands::Depth { job_type } => {
            let manager = &engine.manager;
            let types = match job_type {
                Some(name) => vec![wiring::job_type(manager, &name)?],
                None => manager.job_types(),
            };

            println!(
                "{:<12} {:>8} {:>8} {:>10} {:>12} {:>10}",
                "TYPE", "WAITING", "ACTIVE", "COMPLETED", "DEAD_LETTER", "CANCELLED"
            );
            for job_type in types {
                let depth = manager.queue_depth(&job_type).await?;
                println!(
                    "{:<12} {:>8} {:>8} {:>10} {:>12} {:>10}",
                    job_type.as_str(),
                    depth.waiting,
                    depth.active,
                    depth.completed,
                    depth.dead_letter,
                    depth.cancelled
                );
            }
            Ok(())
        }
        Commands::Purge {
            job_type,
            older_than_days,
            states,
        } => {
            let manager = &engine.manager;
            let job_type = wiring::job_type(manager, &job_type)?;
            let states = if states.is_empty() {
                JobState::TERMINAL.to_vec()
            } else {
                states
                    .iter()
                    .map(|s| s.parse::<JobState>())
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let purged = manager
                .purge(&job_type, DAY * older_than_days, states)
                .await?;
            println!("purged {} {} job(s)", purged, job_type);
            Ok(())
        }
    }
}

async fn run(engine: wiring::Engine) -> Result<()> {
    let handle = engine
        .manager
        .start()
        .await
        .context("engine start failed")?;

    info!("Starting maintenance scheduler...");
    let maintenance = tokio::spawn(engine.maintenance.run());

    info!("System ready. Press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Draining in-flight jobs...");
    maintenance.abort();
    handle.shutdown().await;

    if let Err(e) = maintenance.await {
        if !e.is_cancelled() {
            error!(error = %e, "Maintenance scheduler panicked");
        }
    }
    info!("Shutdown complete.");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
