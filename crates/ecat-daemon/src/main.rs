//! EtherCAT master daemon.
//!
//! Starts a master against the simulated bus, logs bus health periodically
//! and stops the master on SIGINT/SIGTERM or once the run duration elapsed.

mod report;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use ecat_common::RuntimeConfig;
use ecat_master::{EthercatMaster, SimulatedDriver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::report::Reporter;
use crate::signals::{SignalHandler, Wakeup};

/// EtherCAT daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ecat-daemon",
    about = "EtherCAT master daemon - cyclic process data with background slave recovery",
    version,
    long_about = None
)]
struct Args {
    /// Path to a runtime configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Network adapter (overrides config file).
    #[arg(long, short = 'a', value_name = "NAME")]
    adapter: Option<String>,

    /// Stop after this long (e.g. "10s", "5min"); runs until signalled if absent.
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Interval between health reports.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    report_interval: Duration,

    /// Log level (trace, debug, info, warn, error); overrides the config file.
    #[arg(long, short = 'l')]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args)?;

    init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level));
    info!(version = env!("CARGO_PKG_VERSION"), "Starting EtherCAT daemon");

    if let Some(adapter) = &args.adapter {
        config.master.adapter = Some(adapter.clone());
    }
    if config.master.adapter.is_none() {
        config.master.adapter = Some(config.simulation.adapter.clone());
    }
    info!(
        adapter = config.master.adapter.as_deref().unwrap_or_default(),
        cycle_time = %humantime::format_duration(config.master.cycle_time),
        slaves = config.simulation.slaves.len(),
        "Configuration loaded"
    );

    let signals = SignalHandler::install().context("Failed to set up signal handlers")?;
    run(&config, &signals, args.duration, args.report_interval)
}

/// Initialize logging; `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str) {
    let filter = format!("ecat_daemon={level},ecat_master={level},ecat_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `ECAT_CONFIG_PATH` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
///
/// Logging is not initialized yet, so the chosen source is returned in the
/// error context only.
fn load_config(args: &Args) -> Result<RuntimeConfig> {
    if let Some(path) = &args.config {
        return RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    if let Ok(env_path) = std::env::var("ECAT_CONFIG_PATH") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return RuntimeConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from ECAT_CONFIG_PATH={env_path}"));
        }
    }

    let local = PathBuf::from("config/default.toml");
    if local.exists() {
        return RuntimeConfig::from_file(&local)
            .with_context(|| format!("Failed to load config from {}", local.display()));
    }

    Ok(RuntimeConfig::default())
}

/// Run the master until shutdown, reporting every `report_interval`.
fn run(
    config: &RuntimeConfig,
    signals: &SignalHandler,
    duration: Option<Duration>,
    report_interval: Duration,
) -> Result<()> {
    let driver = Arc::new(
        SimulatedDriver::from_config(&config.simulation).with_cycle_time(config.master.cycle_time),
    );
    let mut master = EthercatMaster::new(config.master.clone(), driver);
    master.start().context("Failed to start EtherCAT master")?;

    if !master.is_running() {
        warn!("No slaves on the bus, nothing to do");
        master.stop();
        return Ok(());
    }

    let started = Instant::now();
    let mut reporter = Reporter::new();

    loop {
        let mut wait = report_interval;
        if let Some(limit) = duration {
            let remaining = limit.saturating_sub(started.elapsed());
            if remaining.is_zero() && !signals.shutdown_requested() {
                info!(elapsed = %humantime::format_duration(limit), "Run duration elapsed");
                signals.request_shutdown();
            }
            wait = wait.min(remaining);
        }

        match signals.wait(wait) {
            Wakeup::Shutdown => {
                info!(signals = signals.signal_count(), "Shutting down");
                break;
            }
            Wakeup::Report | Wakeup::Timeout => {
                reporter.log(&master);
            }
        }
    }

    let last = reporter.collect(&master);
    master.stop();
    info!(
        runtime = %humantime::format_duration(Duration::from_secs(started.elapsed().as_secs())),
        healthy = last.is_healthy(),
        "EtherCAT daemon stopped"
    );
    Ok(())
}
