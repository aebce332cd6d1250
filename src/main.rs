//! proctrack - Process Connection Tracker
//!
//! Replays connection lifecycle events into a bounded connection table and
//! reports which process owns each live connection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proctrack::{
    capture::{MonotonicClock, ProcCapture},
    config::ConfigManager,
    connection::{EventDispatcher, EventReader, TrackedConnection},
    metrics::TableMetrics,
    Config, ConnectionTable, ConnectionTracker, ShutdownCoordinator,
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// CLI arguments for proctrack
#[derive(Parser, Debug)]
#[command(name = "proctrack")]
#[command(about = "Process connection tracker")]
#[command(version)]
#[command(long_about = "
proctrack - Process Connection Tracker

Records the process that opened each TCP connection in a bounded table keyed
by connection context, and removes the record when the connection closes.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  PROCTRACK_CAPACITY         - Maximum number of tracked connections
  PROCTRACK_STRIPES          - Writer lock stripes
  PROCTRACK_WORKERS          - Event worker tasks (0 = one per core)
  PROCTRACK_REPORT_INTERVAL  - Status report interval (e.g., 30s, 1m)
  PROCTRACK_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "proctrack.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Maximum number of tracked connections (overrides config file)
    #[arg(long, help = "Maximum number of tracked connections")]
    pub capacity: Option<usize>,

    /// Event worker tasks (overrides config file)
    #[arg(long, help = "Event worker tasks (0 = one per core)")]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply JSON-lines connection events and print the resulting table
    Replay {
        /// Event file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,

        /// Output format for the final table
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Only report connections owned by this pid
        #[arg(long)]
        pid: Option<u32>,

        /// Print Prometheus metrics after the table
        #[arg(long)]
        metrics: bool,
    },
    /// Print an `opened` event for a live process
    Capture {
        #[arg(long)]
        pid: u32,

        /// Thread id, defaults to the pid
        #[arg(long)]
        tid: Option<u32>,

        /// Alternate procfs mount
        #[arg(long, default_value = "/proc")]
        proc_root: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = ConfigManager::load(&args.config)?;

    config.merge_with_cli_args(args.capacity, args.workers, args.log_level.as_deref());

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&args, &config)?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Capacity: {}", config.table.capacity);
        info!("  Stripes: {}", config.table.stripes);
        info!("  Workers: {}", config.tracker.effective_workers());
        info!("  Report interval: {:?}", config.monitoring.report_interval);
        info!(
            "  Prometheus: {}",
            if config.monitoring.prometheus_enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    match args.command {
        Some(Command::Capture {
            pid,
            tid,
            proc_root,
        }) => {
            let capture = ProcCapture::with_root(proc_root);
            let event = capture.opened_event(pid, tid.unwrap_or(pid), &MonotonicClock::new())?;
            println!("{}", serde_json::to_string(&event)?);
            Ok(())
        }
        Some(Command::Replay {
            input,
            format,
            pid,
            metrics,
        }) => run_replay(config, &input, format, pid, metrics).await,
        None => run_replay(config, "-", OutputFormat::Table, None, false).await,
    }
}

async fn run_replay(
    config: Config,
    input: &str,
    format: OutputFormat,
    pid_filter: Option<u32>,
    show_metrics: bool,
) -> Result<()> {
    info!(
        "Starting proctrack v{} (capacity {})",
        env!("CARGO_PKG_VERSION"),
        config.table.capacity
    );

    let table = Arc::new(ConnectionTable::from_config(&config.table));
    let mut tracker = ConnectionTracker::new(table, config.tracker.clone());
    if config.monitoring.prometheus_enabled {
        tracker = tracker.with_metrics(Arc::new(TableMetrics::new()?));
    }
    let tracker = Arc::new(tracker);

    let coordinator = Arc::new(ShutdownCoordinator::new(DRAIN_TIMEOUT));
    let report_handle = Arc::clone(&tracker)
        .start_report_task(config.monitoring.report_interval, coordinator.subscribe());

    let signal_coordinator = Arc::clone(&coordinator);
    let signal_handle = tokio::spawn(async move {
        if let Err(e) = signal_coordinator.listen_for_signals().await {
            error!("Error setting up signal handlers: {}", e);
        }
    });

    let dispatcher = EventDispatcher::start(
        Arc::clone(&tracker),
        config.tracker.effective_workers(),
        config.tracker.channel_capacity,
    );

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
        info!("Reading events from stdin");
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        info!("Reading events from {}", input);
        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("Failed to open event file: {}", input))?;
        Box::new(BufReader::new(file))
    };
    let mut events = EventReader::new(reader);
    let mut shutdown_rx = coordinator.subscribe();

    loop {
        tokio::select! {
            next = events.next_event() => match next {
                Ok(Some(event)) => dispatcher.dispatch(event).await?,
                Ok(None) => {
                    info!("End of event input after {} lines", events.line_number());
                    break;
                }
                Err(e) if e.downcast_ref::<serde_json::Error>().is_some() => {
                    warn!("Skipping event: {:#}", e);
                    tracker.record_malformed();
                }
                Err(e) => return Err(e),
            },
            _ = shutdown_rx.recv() => {
                info!("Stopping event replay");
                break;
            }
        }
    }

    coordinator.drain_dispatcher(dispatcher).await?;
    coordinator.trigger();
    if let Err(e) = report_handle.await {
        if !e.is_cancelled() {
            error!("Report task failed: {}", e);
        }
    }
    signal_handle.abort();

    let connections = match pid_filter {
        Some(pid) => tracker.connections_for_pid(pid),
        None => tracker.snapshot(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&connections)?),
        OutputFormat::Table => print_table(&connections),
    }

    let stats = tracker.stats();
    info!(
        "Replay complete: {} live / {} capacity, {} opened, {} closed, {} dropped, {} untracked, {} malformed",
        stats.live_entries,
        stats.capacity,
        stats.opened,
        stats.closed,
        stats.dropped,
        stats.untracked_closes,
        stats.malformed
    );

    if show_metrics {
        match tracker.export_metrics() {
            Some(text) => print!("{}", text),
            None => warn!("Prometheus metrics are disabled in configuration"),
        }
    }

    Ok(())
}

fn print_table(connections: &[TrackedConnection]) {
    println!(
        "{:<20} {:>8} {:>8} {:<16} {:>20}",
        "CONTEXT", "PID", "UID", "COMM", "START_TIME"
    );
    for conn in connections {
        println!(
            "{:<20} {:>8} {:>8} {:<16} {:>20}",
            conn.context.to_string(),
            conn.record.pid,
            conn.record.uid,
            conn.record.comm.to_string(),
            conn.record.start_time
        );
    }
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    // stdout carries the table, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
