pub(super) mod download;
#[cfg(test)]
pub(crate) mod mock_io;
pub(super) mod remote;
pub(super) mod upload;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use indicatif::ProgressBar;

use super::{
    FailureRecord, OperationKind, TransferOperation, TransferOptions, TransferSummary,
    UploadedArtifact,
};
use crate::error::TransferError;
use crate::repo::Repository;

pub(crate) struct WorkerCtx {
    pub(crate) workers: usize,
    pub(crate) rx: Receiver<TransferOperation>,
    pub(crate) repo: Arc<dyn Repository>,
    pub(crate) options: Arc<TransferOptions>,
    pub(crate) summary: Arc<TransferSummary>,
    pub(crate) abort: Arc<AtomicBool>,
    pub(crate) failure_tx: Sender<FailureRecord>,
    pub(crate) uploaded_tx: Sender<UploadedArtifact>,
    pub(crate) total_pb: ProgressBar,
    /// Progress counts bytes when true, operations otherwise.
    pub(crate) bytes_mode: bool,
    pub(crate) bytes: Arc<AtomicU64>,
}

/// How a single operation settled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Done { bytes: u64 },
    /// Nothing to do, e.g. the local copy already has the right checksum.
    Skipped,
}

/// A per-operation result, classified for the dispatch loop.
#[derive(Debug)]
pub(crate) enum Settled {
    Success(Outcome),
    Failure(TransferError),
    /// Stops dispatch of everything not yet started.
    Fatal(TransferError),
}

impl From<Result<Outcome, TransferError>> for Settled {
    fn from(res: Result<Outcome, TransferError>) -> Self {
        match res {
            Ok(o) => Settled::Success(o),
            Err(e) if e.is_fatal() => Settled::Fatal(e),
            Err(e) => Settled::Failure(e),
        }
    }
}

/// Shared, read-only view handed to the per-kind handlers.
pub(crate) struct OpEnv<'a> {
    pub(crate) repo: &'a dyn Repository,
    pub(crate) options: &'a TransferOptions,
    pub(crate) uploaded_tx: &'a Sender<UploadedArtifact>,
}

pub(crate) fn execute(env: &OpEnv<'_>, op: &TransferOperation) -> Result<Outcome, TransferError> {
    if env.options.dry_run {
        tracing::info!(
            "[dry-run] {} {}{}",
            op.kind.name(),
            op.item.source_path,
            if op.target.is_empty() { String::new() } else { format!(" -> {}", op.target) }
        );
        return Ok(Outcome::Done { bytes: 0 });
    }
    match op.kind {
        OperationKind::Upload => upload::upload(env, op),
        OperationKind::Download => download::download(env, op),
        OperationKind::Copy
        | OperationKind::Move
        | OperationKind::Delete
        | OperationKind::SetProps
        | OperationKind::DeleteProps => remote::apply(env, op),
        OperationKind::Search => Err(TransferError::Unsupported(
            "search does not produce transfer operations".to_string(),
        )),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one operation; a panic settles it as a failure so the worker keeps
/// draining the queue.
fn execute_guarded(env: &OpEnv<'_>, op: &TransferOperation) -> Result<Outcome, TransferError> {
    std::panic::catch_unwind(AssertUnwindSafe(|| execute(env, op))).unwrap_or_else(|panic| {
        Err(TransferError::Internal(format!(
            "{} {} panicked: {}",
            op.kind.name(),
            op.item.source_path,
            panic_message(panic.as_ref())
        )))
    })
}

/// Spawn the worker pool; the caller joins the returned handles.
pub(crate) fn run_workers(ctx: WorkerCtx) -> Vec<JoinHandle<()>> {
    let WorkerCtx {
        workers,
        rx,
        repo,
        options,
        summary,
        abort,
        failure_tx,
        uploaded_tx,
        total_pb,
        bytes_mode,
        bytes,
    } = ctx;
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let rx = rx.clone();
        let repo = repo.clone();
        let options = options.clone();
        let summary = summary.clone();
        let abort = abort.clone();
        let failure_tx = failure_tx.clone();
        let uploaded_tx = uploaded_tx.clone();
        let pb = total_pb.clone();
        let bytes = bytes.clone();
        let handle = std::thread::spawn(move || {
            let env = OpEnv { repo: repo.as_ref(), options: &options, uploaded_tx: &uploaded_tx };
            while let Ok(op) = rx.recv() {
                if abort.load(Ordering::SeqCst) {
                    summary.record_not_attempted();
                    continue;
                }
                let err = match Settled::from(execute_guarded(&env, &op)) {
                    Settled::Success(outcome) => {
                        if outcome == Outcome::Skipped {
                            tracing::debug!(
                                "[transfer] worker_id={} skipped {} (up to date)",
                                worker_id,
                                op.item.source_path
                            );
                        }
                        if let Outcome::Done { bytes: n } = outcome {
                            bytes.fetch_add(n, Ordering::SeqCst);
                        }
                        summary.record_success();
                        None
                    }
                    Settled::Failure(e) => Some(e),
                    Settled::Fatal(e) => {
                        abort.store(true, Ordering::SeqCst);
                        summary.mark_fatal();
                        Some(e)
                    }
                };
                if let Some(e) = err {
                    tracing::warn!(
                        "{} {}{} failed: {}",
                        op.kind.name(),
                        op.item.source_path,
                        if op.target.is_empty() { String::new() } else { format!(" -> {}", op.target) },
                        e
                    );
                    summary.record_failure();
                    let _ = failure_tx.send(FailureRecord {
                        kind: op.kind,
                        source: op.item.source_path.clone(),
                        target: op.target.clone(),
                        error: e,
                    });
                }
                pb.inc(match (bytes_mode, op.kind.moves_bytes()) {
                    (true, true) => op.item.size,
                    (true, false) => 0,
                    (false, _) => 1,
                });
            }
        });
        handles.push(handle);
    }
    handles
}
