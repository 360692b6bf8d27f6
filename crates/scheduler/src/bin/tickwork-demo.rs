//! tickwork-demo: wires up a scheduler the way a host process would.
//!
//! Schedules:
//! - a one-time message one second from now
//! - a recurring message every two seconds
//! - a one-time file backup three seconds from now
//!
//! then runs for `--run-for` seconds, shuts down and prints metrics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use tickwork_scheduler::{
    Action, ActionError, MetricsObserver, SchedulerConfig, SchedulerService, SchedulingStrategy,
    TracingObserver,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Demo host for the tickwork scheduler.
#[derive(Parser, Debug)]
#[command(name = "tickwork-demo", version, about)]
struct Cli {
    /// Path to tickwork.toml config file.
    #[arg(long, env = "TICKWORK_CONFIG", default_value = "config/tickwork.toml")]
    config: PathBuf,

    /// Worker thread count (overrides the config file).
    #[arg(long, env = "TICKWORK_WORKERS")]
    workers: Option<usize>,

    /// Seconds to run before shutting down.
    #[arg(long, env = "TICKWORK_RUN_FOR", default_value_t = 6)]
    run_for: u64,

    /// File copied by the backup task.
    #[arg(long, default_value = "/data/source")]
    backup_source: PathBuf,

    /// Directory the backup task copies into.
    #[arg(long, default_value = "/data/backup")]
    backup_dest: PathBuf,
}

// ── Actions ─────────────────────────────────────────────────────────

/// Logs a fixed message.
struct PrintMessage {
    message: String,
}

impl PrintMessage {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Action for PrintMessage {
    fn name(&self) -> &str {
        "print-message"
    }

    fn execute(&self) -> Result<(), ActionError> {
        info!(message = %self.message, "executing print-message");
        Ok(())
    }
}

/// Copies `source` into the `destination` directory.
struct DataBackup {
    source: PathBuf,
    destination: PathBuf,
}

impl Action for DataBackup {
    fn name(&self) -> &str {
        "data-backup"
    }

    fn execute(&self) -> Result<(), ActionError> {
        info!(
            source = %self.source.display(),
            destination = %self.destination.display(),
            "backing up"
        );
        let file_name = self.source.file_name().ok_or_else(|| {
            ActionError::failed(format!("{} has no file name", self.source.display()))
        })?;
        std::fs::create_dir_all(&self.destination)?;
        let target = self.destination.join(file_name);
        let bytes = std::fs::copy(&self.source, &target)?;
        info!(bytes, target = %target.display(), "backup complete");
        Ok(())
    }
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();

    // Load scheduler config (fall back to defaults plus env if the file can't be read)
    let config = match SchedulerConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config.display(), "loaded scheduler config");
            cfg
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %cli.config.display(),
                "failed to load config, using defaults"
            );
            SchedulerConfig::from_env().context("invalid scheduler config")?
        }
    };

    let scheduler = SchedulerService::new(config);
    let metrics = Arc::new(MetricsObserver::new());
    scheduler.add_observer(Arc::new(TracingObserver));
    scheduler.add_observer(metrics.clone());

    let workers = cli
        .workers
        .unwrap_or_else(|| scheduler.config().resolved_worker_threads());
    scheduler.start(workers).context("failed to start scheduler")?;

    info!("scheduling tasks");
    scheduler.submit(
        PrintMessage::new("This is a one-time task."),
        SchedulingStrategy::after(Duration::from_secs(1)),
    )?;
    scheduler.submit(
        PrintMessage::new("This is a recurring task."),
        SchedulingStrategy::recurring(Duration::from_secs(2)),
    )?;
    scheduler.submit(
        DataBackup {
            source: cli.backup_source.clone(),
            destination: cli.backup_dest.clone(),
        },
        SchedulingStrategy::after(Duration::from_secs(3)),
    )?;

    info!(seconds = cli.run_for, "scheduler running");
    std::thread::sleep(Duration::from_secs(cli.run_for));

    let report = scheduler.shutdown_with_config_timeout();
    if !report.is_clean() {
        warn!(abandoned = ?report.abandoned, "some workers did not stop in time");
    }

    let summary = serde_json::to_string_pretty(&metrics.snapshot())?;
    info!("metrics:\n{summary}");
    Ok(())
}
