use super::MatchedItem;
use crate::error::TransferError;

/// Where the target lives: the local filesystem or the remote index answers
/// whether a template without a trailing '/' names an existing directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSide {
    Local,
    Remote,
}

/// Replace `{N}` (1-based) with capture groups. `{0}`, non-numeric braces
/// and unclosed braces are kept as literal text.
pub fn substitute(template: &str, captures: &[String]) -> Result<String, TransferError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let inner = &after[..close];
        match inner.parse::<usize>() {
            Ok(i) if i >= 1 && !inner.starts_with('+') => {
                let value = captures.get(i - 1).ok_or_else(|| TransferError::Placeholder {
                    template: template.to_string(),
                    index: i,
                    available: captures.len(),
                })?;
                out.push_str(value);
            }
            _ => {
                out.push('{');
                out.push_str(inner);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn join(dir: &str, tail: &str) -> String {
    let tail = tail.trim_start_matches('/');
    if dir.is_empty() {
        tail.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, tail)
    } else {
        format!("{}/{}", dir, tail)
    }
}

/// Final destination of `item` for `template`.
///
/// A directory target receives the base name (flat) or the relative path
/// (hierarchical). `existing_dir` reports whether a resolved template without
/// a trailing '/' already is a directory on the target side. Any other target
/// is the literal destination, which renames the item on transfer.
pub fn compose(
    item: &MatchedItem,
    template: &str,
    flat: bool,
    mut existing_dir: impl FnMut(&str) -> bool,
) -> Result<String, TransferError> {
    let resolved = substitute(template, &item.captures)?;
    let is_dir = resolved.is_empty() || resolved.ends_with('/') || existing_dir(&resolved);
    if !is_dir {
        return Ok(resolved);
    }
    let tail = if flat { item.base_name() } else { item.relative_path.as_str() };
    Ok(join(&resolved, tail))
}
