use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;

use crate::error::TransferError;
use crate::transfer::{FailureRecord, SummaryReport};

/// Try to enable ANSI escape sequence support on Windows consoles.
/// Returns true if enabling succeeded (or platform likely already supports ANSI), false otherwise.
#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

// On non-Windows platforms the crate is not required and ANSI support is typically available
// by default in terminals; provide a no-op fallback to avoid referencing the optional crate.
#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    true
}

/// Total progress bar on stderr; hidden when quiet.
///
/// `bytes_mode` switches the template between byte totals and an
/// operation count (used when nothing is transferred, e.g. delete).
pub fn init_total_progress(quiet: bool, total: u64, bytes_mode: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let template = if bytes_mode {
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})"
    } else {
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})"
    };
    let pb = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
    match ProgressStyle::with_template(template) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("[progress] invalid template: {}", e),
    }
    // attempt to enable ANSI on Windows (best-effort)
    let _ = try_enable_ansi_on_windows();
    pb
}

/// Print the JSON summary on stdout and a short colored line on stderr.
pub fn print_summary(report: &SummaryReport, quiet: bool) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("cannot serialize summary")?;
    println!("{}", json);
    if quiet {
        return Ok(());
    }
    let line = format!(
        "{} succeeded, {} failed",
        report.totals.success, report.totals.failure
    );
    if try_enable_ansi_on_windows() {
        if report.status == "success" {
            eprintln!("{}", line.green());
        } else {
            eprintln!("{}", line.red());
        }
    } else {
        eprintln!("{}", line);
    }
    Ok(())
}

/// Append structured failures as JSON Lines to `<logs_dir>/failures-<UTC>.jsonl`.
/// Returns the written path, or `None` when there is nothing to write.
pub fn write_failures_jsonl(logs_dir: &Path, failures: &[FailureRecord]) -> Option<PathBuf> {
    if failures.is_empty() {
        return None;
    }
    if let Err(e) = std::fs::create_dir_all(logs_dir) {
        tracing::warn!("cannot create {}: {}", logs_dir.display(), e);
        return None;
    }
    let path =
        logs_dir.join(format!("failures-{}.jsonl", Utc::now().format("%Y%m%dT%H%M%SZ")));
    // Open in append mode so we don't clobber a run finishing in the same second
    let mut f = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("cannot write failures to {}: {}", path.display(), e);
            return None;
        }
    };
    for rec in failures {
        if let Ok(line) = serde_json::to_string(&rec.to_json()) {
            let _ = writeln!(f, "{}", line);
        }
    }
    Some(path)
}

// Default backoff base in milliseconds. Can be adjusted at runtime via `set_backoff_ms`.
static BACKOFF_BASE_MS: AtomicU64 = AtomicU64::new(100);

/// Set the base backoff in milliseconds used by `retry_operation` between attempts.
pub fn set_backoff_ms(ms: u64) {
    BACKOFF_BASE_MS.store(ms, Ordering::SeqCst);
}

/// Get the current base backoff in milliseconds used by `retry_operation`.
pub fn get_backoff_ms() -> u64 {
    BACKOFF_BASE_MS.load(Ordering::SeqCst)
}

/// Run `op` up to `max_attempts` times (at least once). Only retriable
/// errors trigger another attempt; anything else is returned immediately.
/// Waits `base * attempt` milliseconds between attempts.
pub fn retry_operation<F, T>(max_attempts: usize, mut op: F) -> Result<T, TransferError>
where
    F: FnMut() -> Result<T, TransferError>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retriable() && attempt + 1 < attempts => {
                let wait = get_backoff_ms().saturating_mul(attempt as u64 + 1);
                tracing::debug!(
                    "[retry] attempt {}/{} failed: {}; retrying in {}ms",
                    attempt + 1,
                    attempts,
                    e,
                    wait
                );
                std::thread::sleep(Duration::from_millis(wait));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
