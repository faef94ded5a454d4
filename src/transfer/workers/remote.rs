use super::{OpEnv, Outcome};
use crate::error::TransferError;
use crate::transfer::{OperationKind, TransferOperation};
use crate::util::retry_operation;

/// Server-side operations: nothing crosses the wire but the request itself.
pub(crate) fn apply(env: &OpEnv<'_>, op: &TransferOperation) -> Result<Outcome, TransferError> {
    let src = op.item.source_path.as_str();
    let repo = env.repo;
    let opts = env.options;
    let res = retry_operation(opts.retries, || match op.kind {
        OperationKind::Copy => repo.copy(src, &op.target),
        OperationKind::Move => repo.move_item(src, &op.target),
        OperationKind::Delete => repo.delete(src),
        OperationKind::SetProps => repo.set_properties(src, &opts.props, opts.recursive_props),
        OperationKind::DeleteProps => {
            repo.delete_properties(src, &opts.prop_keys, opts.recursive_props)
        }
        other => Err(TransferError::Unsupported(format!("{} is not a server-side operation", other.name()))),
    });
    match res {
        Ok(()) => Ok(Outcome::Done { bytes: 0 }),
        // already gone, e.g. removed together with its parent folder
        Err(TransferError::NotFound(p)) if op.kind == OperationKind::Delete => {
            tracing::debug!("[delete] {} already absent", p);
            Ok(Outcome::Skipped)
        }
        Err(e) => Err(e),
    }
}
