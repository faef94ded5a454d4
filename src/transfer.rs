// transfer module: operation model and the concurrent orchestrator
mod helpers;
pub(crate) mod workers;

pub use helpers::{EMPTY_SHA256, normalize_path, sha256_file, sha256_hex};
pub(crate) use helpers::{
    StreamError, atomic_rename_with_retries, copy_stream_with_cleanup, display_path,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{bounded, unbounded};
use serde::Serialize;

use crate::error::TransferError;
use crate::repo::Repository;
use crate::resolve::{MatchedItem, TargetSide};

use self::workers::{WorkerCtx, run_workers};

// Bound workers to sensible limits
const MAX_WORKERS: usize = 32;

/// The command an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Upload,
    Download,
    Copy,
    Move,
    Delete,
    SetProps,
    DeleteProps,
    Search,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
            OperationKind::Copy => "copy",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::SetProps => "set-props",
            OperationKind::DeleteProps => "delete-props",
            OperationKind::Search => "search",
        }
    }

    /// Uploads drop the source hierarchy unless told otherwise.
    pub fn default_flat(&self) -> bool {
        matches!(self, OperationKind::Upload)
    }

    pub fn requires_target(&self) -> bool {
        matches!(self, OperationKind::Upload | OperationKind::Copy | OperationKind::Move)
    }

    pub fn source_is_local(&self) -> bool {
        matches!(self, OperationKind::Upload)
    }

    /// Where the composed target lives, for kinds that have one.
    pub fn target_side(&self) -> Option<TargetSide> {
        match self {
            OperationKind::Upload | OperationKind::Copy | OperationKind::Move => {
                Some(TargetSide::Remote)
            }
            OperationKind::Download => Some(TargetSide::Local),
            _ => None,
        }
    }

    /// Whether the operation moves payload bytes.
    pub fn moves_bytes(&self) -> bool {
        matches!(self, OperationKind::Upload | OperationKind::Download)
    }
}

/// One unit of work: an item, where it goes, and what to do with it.
#[derive(Debug, Clone)]
pub struct TransferOperation {
    pub item: MatchedItem,
    /// Empty for kinds without a target (delete, props).
    pub target: String,
    pub kind: OperationKind,
}

impl TransferOperation {
    pub fn new(kind: OperationKind, item: MatchedItem, target: String) -> Self {
        TransferOperation { item, target, kind }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// `None` picks a worker count from the workload.
    pub threads: Option<usize>,
    /// Attempts per operation, including the first one.
    pub retries: usize,
    pub dry_run: bool,
    pub quiet: bool,
    /// Recreate symlinks on download after checking their recorded destination.
    pub validate_symlinks: bool,
    /// Properties attached on upload, or set by set-props.
    pub props: Vec<(String, String)>,
    /// Keys removed by delete-props.
    pub prop_keys: Vec<String>,
    /// Apply property changes to folder descendants.
    pub recursive_props: bool,
}

/// Final counters reported on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub success: u64,
    pub failure: u64,
}

/// `{"status": ..., "totals": {...}}`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SummaryReport {
    pub status: &'static str,
    pub totals: SummaryCounts,
}

impl SummaryReport {
    pub fn new(totals: SummaryCounts, fatal: bool) -> Self {
        let status = if totals.failure == 0 && !fatal { "success" } else { "failure" };
        SummaryReport { status, totals }
    }
}

/// Thread-safe counters shared by all workers of a command.
#[derive(Debug, Default)]
pub struct TransferSummary {
    success: AtomicU64,
    failure: AtomicU64,
    not_attempted: AtomicU64,
    fatal: AtomicBool,
}

impl TransferSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_not_attempted(&self) {
        self.not_attempted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_fatal(&self) {
        self.fatal.store(true, Ordering::SeqCst);
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn not_attempted(&self) -> u64 {
        self.not_attempted.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> SummaryCounts {
        SummaryCounts {
            success: self.success.load(Ordering::SeqCst),
            failure: self.failure.load(Ordering::SeqCst),
        }
    }

    pub fn report(&self) -> SummaryReport {
        SummaryReport::new(self.counts(), self.is_fatal())
    }
}

/// One failed operation, kept for the failures log.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub kind: OperationKind,
    pub source: String,
    pub target: String,
    pub error: TransferError,
}

impl FailureRecord {
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = self.error.to_json();
        obj["operation"] = serde_json::Value::from(self.kind.name());
        obj["source"] = serde_json::Value::from(self.source.clone());
        if !self.target.is_empty() {
            obj["target"] = serde_json::Value::from(self.target.clone());
        }
        obj
    }
}

/// A file that landed on the server, as recorded into build-info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    pub target: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct TransferReport {
    pub failures: Vec<FailureRecord>,
    pub uploaded: Vec<UploadedArtifact>,
    pub bytes: u64,
}

/// Dispatches operations to a pool of worker threads.
pub struct TransferOrchestrator {
    repo: Arc<dyn Repository>,
    options: Arc<TransferOptions>,
}

impl TransferOrchestrator {
    pub fn new(repo: Arc<dyn Repository>, options: TransferOptions) -> Self {
        TransferOrchestrator { repo, options: Arc::new(options) }
    }

    fn worker_count(&self, ops: &[TransferOperation], total_bytes: u64) -> usize {
        let wanted = match self.options.threads.filter(|t| *t > 0) {
            Some(t) => t,
            None => {
                let auto = crate::auto_concurrency::choose_auto_concurrency(ops.len(), total_bytes);
                tracing::debug!(
                    "[transfer] auto-concurrency chose {} worker(s) for {} op(s), {} byte(s)",
                    auto,
                    ops.len(),
                    total_bytes
                );
                auto
            }
        };
        wanted.min(MAX_WORKERS).min(ops.len().max(1))
    }

    /// Run every operation; counters in `summary` are updated as each one settles.
    ///
    /// A fatal error (authentication) stops dispatch: operations still queued
    /// or not yet sent are counted as not attempted.
    pub fn run(&self, ops: Vec<TransferOperation>, summary: &Arc<TransferSummary>) -> TransferReport {
        if ops.is_empty() {
            return TransferReport::default();
        }
        let total_bytes: u64 =
            ops.iter().filter(|o| o.kind.moves_bytes()).map(|o| o.item.size).sum();
        let workers = self.worker_count(&ops, total_bytes);
        let total_ops = ops.len() as u64;
        let bytes_mode = total_bytes > 0;
        let total_pb = crate::util::init_total_progress(
            self.options.quiet,
            if bytes_mode { total_bytes } else { total_ops },
            bytes_mode,
        );
        tracing::debug!("[transfer] dispatching {} op(s) to {} worker(s)", total_ops, workers);

        let cap = std::cmp::max(4, workers * 4);
        let (tx, rx) = bounded::<TransferOperation>(cap);
        let (failure_tx, failure_rx) = unbounded::<FailureRecord>();
        let (uploaded_tx, uploaded_rx) = unbounded::<UploadedArtifact>();
        let abort = Arc::new(AtomicBool::new(false));
        let bytes = Arc::new(AtomicU64::new(0));

        // start workers before producing so the bounded queue never blocks the producer forever
        let handles = run_workers(WorkerCtx {
            workers,
            rx,
            repo: self.repo.clone(),
            options: self.options.clone(),
            summary: summary.clone(),
            abort: abort.clone(),
            failure_tx,
            uploaded_tx,
            total_pb: total_pb.clone(),
            bytes_mode,
            bytes: bytes.clone(),
        });

        for op in ops {
            if abort.load(Ordering::SeqCst) {
                summary.record_not_attempted();
                continue;
            }
            if let Err(e) = tx.send(op) {
                tracing::debug!("[transfer] queue closed early: {}", e);
                summary.record_not_attempted();
            }
        }
        drop(tx);
        for h in handles {
            if let Err(panic) = h.join() {
                tracing::error!("[transfer] worker died: {}", workers::panic_message(panic.as_ref()));
                summary.mark_fatal();
            }
        }
        total_pb.finish_and_clear();

        let report = TransferReport {
            failures: failure_rx.try_iter().collect(),
            uploaded: uploaded_rx.try_iter().collect(),
            bytes: bytes.load(Ordering::SeqCst),
        };
        if summary.not_attempted() > 0 {
            tracing::warn!(
                "[transfer] {} operation(s) not attempted after a fatal error",
                summary.not_attempted()
            );
        }
        report
    }
}
