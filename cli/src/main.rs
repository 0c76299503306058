//! faxrelay: watches a fax drop directory, converts scans to PDF, runs
//! OCR and mails the recognized text.
//!
//! Usage:
//!     faxrelay [--config ./config/config.yaml] [--env .env] [--once | --health-check]

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use faxrelay::{load_config, load_env_file, App, WorkerError};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "faxrelay", version, about = "Fax to OCR to email relay")]
struct Args {
    /// YAML configuration file
    #[arg(long, default_value = "./config/config.yaml")]
    config: PathBuf,

    /// Environment file loaded before the config (defaults to ./.env if present)
    #[arg(long)]
    env: Option<PathBuf>,

    /// Process the files currently in the watch directory, then exit
    #[arg(long, conflicts_with = "health_check")]
    once: bool,

    /// Check the watch directory and mail server, then exit
    #[arg(long)]
    health_check: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let env_loaded = load_env_file(args.env.as_deref()).context("loading environment file")?;
    let config = load_config(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    logging::init(&config.logging)?;

    info!("Starting faxrelay v{}", env!("CARGO_PKG_VERSION"));
    if env_loaded {
        info!("Loaded environment file");
    }
    info!(
        watch = %config.watch.directory,
        backend = %config.recognition.backend,
        concurrency = config.processing.concurrency,
        "configuration loaded"
    );

    let app = App::build(config).context("building pipeline components")?;

    if args.health_check {
        let report = app.health_report();
        print!("{}", report);
        return Ok(if report.is_healthy() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    app.notifier()
        .self_test()
        .context("mail server connectivity test failed")?;
    info!("Mail server connectivity confirmed");

    let scheduler = app.into_scheduler();

    if args.once {
        let summary = scheduler.run_once()?;
        if let Err(e) = scheduler.close() {
            warn!("{}", e);
        }
        info!(
            completed = summary.completed,
            failed = summary.failed,
            deferred = summary.deferred,
            unrecorded = summary.unrecorded,
            "Single run finished"
        );
        return Ok(if summary.failed > 0 || summary.unrecorded > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let shutdown = scheduler.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Signal received, finishing in-flight jobs");
        shutdown.store(true, Ordering::Relaxed);
    })
    .context("installing signal handler")?;

    match scheduler.run_continuous() {
        Ok(totals) => {
            info!(
                completed = totals.completed,
                failed = totals.failed,
                "Stopped"
            );
        }
        Err(e @ WorkerError::ShutdownTimeout(_)) => warn!("{}", e),
        Err(e) => return Err(e.into()),
    }

    Ok(ExitCode::SUCCESS)
}
