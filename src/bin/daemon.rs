//! Photodate daemon for background processing.
//!
//! Periodically runs the full processing pass: scan the unprocessed tree,
//! extract features for new base photos, regroup by similarity. State is
//! shared with the CLI through the catalog database.
//!
//! ## Usage
//!
//! ```bash
//! photodate-daemon           # Run in foreground on the configured interval
//! photodate-daemon --once    # Run one processing pass and exit
//! ```

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use photodate::config::Config;
use photodate::logging;
use photodate::scheduler::Scheduler;
use photodate::service::PhotoService;

struct DaemonArgs {
    /// Run one pass and exit.
    once: bool,
    /// Interval override in seconds.
    interval: Option<u64>,
    config_path: Option<PathBuf>,
}

fn parse_args() -> DaemonArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = DaemonArgs {
        once: false,
        interval: None,
        config_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        parsed.interval = Some(interval);
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"photodate-daemon - background processor for photodate

USAGE:
    photodate-daemon [OPTIONS]

OPTIONS:
    --once, -1          Run one processing pass and exit
    --interval, -i N    Seconds between passes (overrides config; 0 disables)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    PHOTODATE_LOG       Log level (trace, debug, info, warn, error)

Each pass scans the unprocessed tree, extracts features for new photos
and rebuilds the similarity groups. The CLI reads the same catalog, so
results appear there as soon as a pass finishes."#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(None);
    info!("Photodate daemon starting");

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path.clone())?,
        None => Config::load()?,
    };
    if let Some(interval) = args.interval {
        config.scheduler.interval_secs = interval;
    }

    let scheduler_config = config.scheduler.clone();

    if args.once {
        info!("Running in single-shot mode");
        let service = PhotoService::new(config)?;
        let summary = service.run_processing()?;
        info!(
            "Pass complete: {} new photos, {} embeddings, {} groups",
            summary.scan.inserted, summary.embeddings, summary.groups
        );
        return Ok(());
    }

    // The scheduler thread owns the service; the catalog is the only
    // shared surface between daemon and CLI.
    let service = PhotoService::new(config)?;
    let mut scheduler = Scheduler::new(scheduler_config);
    scheduler.start(move || match service.run_processing() {
        Ok(summary) => {
            info!(
                "Pass complete: {} new photos, {} embeddings, {} groups",
                summary.scan.inserted, summary.embeddings, summary.groups
            );
        }
        Err(e) => {
            error!("Processing pass failed: {:#}", e);
        }
    });

    let status = scheduler.status();
    if !status.enabled {
        info!("Scheduling disabled by configuration, exiting");
        return Ok(());
    }
    match status.next_run {
        Some(next) => info!(
            "Scheduler running every {}s, first run at {}",
            status.interval_secs,
            chrono::DateTime::<chrono::Utc>::from(next).format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => info!("Scheduler running every {}s", status.interval_secs),
    }

    // Foreground service: the process is stopped by its service manager.
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}
