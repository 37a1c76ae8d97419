//! Terminal output: tracing setup and the handful of human-facing lines
//! the CLI prints outside of the log stream.

use colored::Colorize;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use credsweep_core::queue::QueueStatus;
use credsweep_core::CredsweepError;

pub type ReloadHandle = reload::Handle<EnvFilter, Registry>;

/// `-v`/`-q` move one level at a time off of `info`; `RUST_LOG` always wins.
pub fn resolve_log_level(verbose: u8, quiet: u8) -> Level {
    const LEVELS: [Level; 5] = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];
    let base = 2i32; // index of Level::INFO
    let idx = (base + i32::from(verbose) - i32::from(quiet)).clamp(0, 4) as usize;
    LEVELS[idx]
}

/// Installs the global subscriber and returns a handle that lets the
/// interactive keypress loop change the filter level at runtime without
/// restarting the process.
pub fn init_tracing(level: Level) -> ReloadHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let (filter_layer, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false))
        .try_init()
        .ok();
    handle
}

pub fn banner(base_url: &str) -> String {
    format!("{} scanning {}", "credsweep".bold().green(), base_url.cyan())
}

pub fn error_line(err: &anyhow::Error) -> String {
    format!("{} {err:#}", "error:".bold().red())
}

pub fn fatal_line(err: &CredsweepError) -> String {
    format!("{} {err}", "error:".bold().red())
}

pub fn scan_finished_line(status: &QueueStatus) -> String {
    format!(
        "{} received={} pending={}",
        "scan finished".bold().green(),
        status.received,
        status.pending,
    )
}
