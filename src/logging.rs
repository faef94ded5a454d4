//! Logging setup: stderr always, plus a debug log file under the config
//! directory when `--verbose` is given.

use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub const LOG_ENV: &str = "ARTIPILOT_LOG";

/// Keeps the non-blocking file writer flushing until dropped.
pub struct LogGuard {
    pub log_path: Option<PathBuf>,
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn console_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "warn,artipilot=debug" } else { "warn,artipilot=info" })
    })
}

/// Install the global subscriber. Safe to call once per process; a second
/// call is ignored.
pub fn init(verbose: bool, logs_dir: &Path) -> LogGuard {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter(verbose));

    if !verbose {
        let _ = tracing_subscriber::registry().with(console_layer).try_init();
        return LogGuard { log_path: None, _guard: None };
    }

    if let Err(e) = std::fs::create_dir_all(logs_dir) {
        let _ = tracing_subscriber::registry().with(console_layer).try_init();
        tracing::warn!("cannot create log directory {}: {}", logs_dir.display(), e);
        return LogGuard { log_path: None, _guard: None };
    }
    let log_filename = format!("ap-{}.log", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
    let log_path = logs_dir.join(&log_filename);
    let file_appender = tracing_appender::rolling::never(logs_dir, &log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: detailed output with thread ids for worker tracing
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(EnvFilter::new("warn,artipilot=trace"));

    let _ = tracing_subscriber::registry().with(console_layer).with(file_layer).try_init();
    tracing::debug!("[log] writing debug log to {}", log_path.display());
    LogGuard { log_path: Some(log_path), _guard: Some(guard) }
}
