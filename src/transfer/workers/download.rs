use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{OpEnv, Outcome};
use crate::error::TransferError;
use crate::resolve::SYMLINK_SHA_PROP;
use crate::transfer::helpers::{
    StreamError, atomic_rename_with_retries, copy_stream_with_cleanup, display_path, sha256_file,
};
use crate::transfer::TransferOperation;
use crate::util::retry_operation;

const BUF_SIZE: usize = 1024 * 1024;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn tmp_path_for(target: &Path) -> PathBuf {
    let name = target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let seq = TMP_SEQ.fetch_add(1, Ordering::SeqCst);
    target.with_file_name(format!(".{}.ap.part.{}.{}", name, std::process::id(), seq))
}

/// Whether the file already at `target` has the expected content.
fn up_to_date(target: &Path, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    match std::fs::symlink_metadata(target) {
        Ok(m) if m.is_file() => {}
        _ => return false,
    }
    sha256_file(target).map(|actual| actual.eq_ignore_ascii_case(expected)).unwrap_or(false)
}

pub(crate) fn download(env: &OpEnv<'_>, op: &TransferOperation) -> Result<Outcome, TransferError> {
    let item = &op.item;
    let target = PathBuf::from(&op.target);

    if item.is_dir {
        std::fs::create_dir_all(&target).map_err(|e| TransferError::filesystem(&target, e))?;
        return Ok(Outcome::Done { bytes: 0 });
    }
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| TransferError::filesystem(parent, e))?;
    }
    if item.is_symlink {
        return restore_symlink(op, &target, env.options.validate_symlinks);
    }
    if up_to_date(&target, item.checksum.as_deref()) {
        return Ok(Outcome::Skipped);
    }

    let bytes = retry_operation(env.options.retries, || fetch_into(env, op, &target))?;
    tracing::debug!(
        "[download] {} -> {} ({})",
        item.source_path,
        display_path(&target),
        indicatif::HumanBytes(bytes)
    );
    Ok(Outcome::Done { bytes })
}

/// One attempt: stream into a tmp file next to `target`, verify, then rename.
fn fetch_into(env: &OpEnv<'_>, op: &TransferOperation, target: &Path) -> Result<u64, TransferError> {
    let reader = env.repo.fetch(&op.item.source_path)?;
    let tmp = tmp_path_for(target);
    let (written, actual) =
        copy_stream_with_cleanup(reader, &tmp, BUF_SIZE, |_| {}).map_err(|e| match e {
            StreamError::Read(e) => {
                TransferError::Transport(format!("reading {}: {}", op.item.source_path, e))
            }
            StreamError::Write(e) => TransferError::filesystem(&tmp, e),
        })?;
    if let Some(expected) = op.item.checksum.as_deref()
        && !expected.eq_ignore_ascii_case(&actual)
    {
        let _ = std::fs::remove_file(&tmp);
        return Err(TransferError::ChecksumMismatch {
            path: op.item.source_path.clone(),
            expected: expected.to_ascii_lowercase(),
            actual,
        });
    }
    if let Err(e) = atomic_rename_with_retries(&tmp, target) {
        let _ = std::fs::remove_file(&tmp);
        return Err(TransferError::filesystem(target, e));
    }
    Ok(written)
}

/// Recreate a link recorded at upload time. With `validate`, its destination
/// must exist and match the recorded checksum.
#[cfg(unix)]
fn restore_symlink(
    op: &TransferOperation,
    target: &Path,
    validate: bool,
) -> Result<Outcome, TransferError> {
    let Some(dest) = op.item.symlink_target.as_deref() else {
        return Err(TransferError::BrokenSymlink(op.item.source_path.clone()));
    };
    let dest_path = match target.parent() {
        Some(parent) if Path::new(dest).is_relative() => parent.join(dest),
        _ => PathBuf::from(dest),
    };
    if validate && !dest_path.exists() {
        return Err(TransferError::BrokenSymlink(format!(
            "{} -> {}",
            op.item.source_path, dest
        )));
    }
    if validate
        && let Some(expected) = op.item.prop(SYMLINK_SHA_PROP)
        && dest_path.is_file()
    {
        let actual =
            sha256_file(&dest_path).map_err(|e| TransferError::filesystem(&dest_path, e))?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(TransferError::ChecksumMismatch {
                path: display_path(&dest_path).to_string(),
                expected: expected.to_ascii_lowercase(),
                actual,
            });
        }
    }
    if std::fs::symlink_metadata(target).is_ok() {
        std::fs::remove_file(target).map_err(|e| TransferError::filesystem(target, e))?;
    }
    std::os::unix::fs::symlink(dest, target).map_err(|e| TransferError::filesystem(target, e))?;
    Ok(Outcome::Done { bytes: 0 })
}

#[cfg(not(unix))]
fn restore_symlink(
    op: &TransferOperation,
    _target: &Path,
    _validate: bool,
) -> Result<Outcome, TransferError> {
    Err(TransferError::Unsupported(format!(
        "cannot recreate symlink {} on this platform",
        op.item.source_path
    )))
}
