use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{OpEnv, Outcome};
use crate::error::TransferError;
use crate::resolve::{SYMLINK_DEST_PROP, SYMLINK_SHA_PROP};
use crate::transfer::helpers::{EMPTY_SHA256, sha256_file};
use crate::transfer::{TransferOperation, UploadedArtifact};
use crate::util::retry_operation;

/// Destination a local link points at, resolved against the link's directory.
fn link_destination(link: &Path, dest: &str) -> PathBuf {
    let d = Path::new(dest);
    if d.is_absolute() {
        return d.to_path_buf();
    }
    link.parent().map(|p| p.join(d)).unwrap_or_else(|| d.to_path_buf())
}

pub(crate) fn upload(env: &OpEnv<'_>, op: &TransferOperation) -> Result<Outcome, TransferError> {
    let item = &op.item;
    let source = Path::new(&item.source_path);
    let mut props = env.options.props.clone();
    for (k, values) in &item.properties {
        props.extend(values.iter().map(|v| (k.clone(), v.clone())));
    }

    if item.is_dir {
        retry_operation(env.options.retries, || env.repo.create_dir(&op.target, &props))?;
        return Ok(Outcome::Done { bytes: 0 });
    }

    if item.is_symlink {
        let dest = item
            .symlink_target
            .clone()
            .ok_or_else(|| TransferError::BrokenSymlink(item.source_path.clone()))?;
        let resolved = link_destination(source, &dest);
        props.push((SYMLINK_DEST_PROP.to_string(), dest));
        if resolved.is_file() {
            let sha =
                sha256_file(&resolved).map_err(|e| TransferError::filesystem(&resolved, e))?;
            props.push((SYMLINK_SHA_PROP.to_string(), sha));
        }
        retry_operation(env.options.retries, || {
            env.repo.store(&op.target, Box::new(std::io::empty()), 0, EMPTY_SHA256, &props)
        })?;
        return Ok(Outcome::Done { bytes: 0 });
    }

    let sha = sha256_file(source).map_err(|e| TransferError::filesystem(source, e))?;
    let size = std::fs::metadata(source).map_err(|e| TransferError::filesystem(source, e))?.len();
    retry_operation(env.options.retries, || {
        let f = File::open(source).map_err(|e| TransferError::filesystem(source, e))?;
        env.repo.store(&op.target, Box::new(BufReader::new(f)), size, &sha, &props)
    })?;
    tracing::debug!(
        "[upload] {} -> {} ({})",
        item.source_path,
        op.target,
        indicatif::HumanBytes(size)
    );
    let _ = env.uploaded_tx.send(UploadedArtifact { target: op.target.clone(), sha256: sha, size });
    Ok(Outcome::Done { bytes: size })
}
