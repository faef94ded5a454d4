use std::collections::HashMap;

use super::MatchedItem;
use crate::error::TransferError;
use crate::repo::{BuildInfoService, BuildSnapshot};
use crate::spec::BuildIdentifier;

/// Resolve the build once; `LATEST` picks the most recently started number.
pub fn resolve_snapshot<B: BuildInfoService + ?Sized>(
    service: &B,
    build: &BuildIdentifier,
) -> Result<BuildSnapshot, TransferError> {
    let snap = service.build_snapshot(&build.name, &build.number)?;
    tracing::debug!(
        "[build] {}/{} resolved to number {} ({} checksums)",
        build.name,
        build.number,
        snap.number,
        snap.checksums.len()
    );
    Ok(snap)
}

/// Keep the items that belong to `snapshot`.
///
/// Several items can carry the same checksum (identical content published by
/// different builds). Per checksum, items tagged with both the build's name
/// and number win, then items tagged with its name, then all of them.
/// Discovery order is preserved.
pub fn correlate(items: Vec<MatchedItem>, snapshot: &BuildSnapshot) -> Vec<MatchedItem> {
    let rank = |item: &MatchedItem| -> u8 {
        let name_ok = item.prop("build.name") == Some(snapshot.name.as_str());
        let number_ok = item.prop("build.number") == Some(snapshot.number.as_str());
        match (name_ok, number_ok) {
            (true, true) => 2,
            (true, false) => 1,
            _ => 0,
        }
    };

    let candidates: Vec<(MatchedItem, String, u8)> = items
        .into_iter()
        .filter_map(|item| {
            let sum = item.checksum.as_deref()?.to_ascii_lowercase();
            if !snapshot.checksums.contains(&sum) {
                return None;
            }
            let r = rank(&item);
            Some((item, sum, r))
        })
        .collect();

    let mut best: HashMap<&str, u8> = HashMap::new();
    for (_, sum, r) in &candidates {
        let e = best.entry(sum.as_str()).or_insert(*r);
        if *r > *e {
            *e = *r;
        }
    }
    let best: HashMap<String, u8> = best.into_iter().map(|(k, v)| (k.to_string(), v)).collect();

    candidates
        .into_iter()
        .filter(|(_, sum, r)| best.get(sum) == Some(r))
        .map(|(mut item, _, _)| {
            item.build_owner = Some((snapshot.name.clone(), snapshot.number.clone()));
            item
        })
        .collect()
}
