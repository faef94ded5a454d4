use std::cmp::Ordering;

use super::MatchedItem;
use crate::spec::{SortKey, SortOrder};

fn directed(ord: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    }
}

fn compare(a: &MatchedItem, b: &MatchedItem, keys: &[SortKey], order: SortOrder) -> Ordering {
    for key in keys {
        let ord = match key {
            SortKey::Name => directed(a.base_name().cmp(b.base_name()), order),
            // items without a timestamp sort first in either direction
            SortKey::Created => match (&a.created, &b.created) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => directed(x.cmp(y), order),
            },
            SortKey::Depth => directed(a.depth().cmp(&b.depth()), order),
            SortKey::Size => directed(a.size.cmp(&b.size), order),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sort (stable, so equal keys keep discovery order in either direction),
/// then skip `offset`, then keep at most `limit`.
pub fn page(
    mut items: Vec<MatchedItem>,
    sort_by: &[SortKey],
    order: SortOrder,
    offset: usize,
    limit: Option<usize>,
) -> Vec<MatchedItem> {
    if !sort_by.is_empty() {
        items.sort_by(|a, b| compare(a, b, sort_by, order));
    }
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(n) => iter.take(n).collect(),
        None => iter.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn named(paths: &[&str]) -> Vec<MatchedItem> {
        paths.iter().map(|p| MatchedItem::file(&format!("repo/{}", p), p)).collect()
    }

    fn rel(items: &[MatchedItem]) -> Vec<&str> {
        items.iter().map(|i| i.relative_path.as_str()).collect()
    }

    #[test]
    fn offset_windows_partition_sorted_results() {
        let all = named(&["a3", "a1", "a2"]);
        let keys = [SortKey::Name];
        let first = page(all.clone(), &keys, SortOrder::Asc, 0, Some(1));
        let second = page(all.clone(), &keys, SortOrder::Asc, 1, Some(1));
        let third = page(all.clone(), &keys, SortOrder::Asc, 2, Some(1));
        assert_eq!(rel(&first), vec!["a1"]);
        assert_eq!(rel(&second), vec!["a2"]);
        assert_eq!(rel(&third), vec!["a3"]);
        assert!(page(all, &keys, SortOrder::Asc, 3, Some(1)).is_empty());
    }

    #[test]
    fn desc_keeps_ties_in_discovery_order() {
        let mut items = named(&["x/b", "y/b", "a"]);
        items[0].size = 5;
        items[1].size = 5;
        items[2].size = 1;
        let got = page(items, &[SortKey::Size], SortOrder::Desc, 0, None);
        assert_eq!(rel(&got), vec!["x/b", "y/b", "a"]);
    }

    #[test]
    fn multi_key_and_depth() {
        let got = page(
            named(&["d/e/f", "z", "c/a", "b"]),
            &[SortKey::Depth, SortKey::Name],
            SortOrder::Asc,
            0,
            None,
        );
        assert_eq!(rel(&got), vec!["b", "z", "c/a", "d/e/f"]);
    }

    #[test]
    fn created_missing_sorts_first() {
        let mut items = named(&["new", "old", "none"]);
        items[0].created = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        items[1].created = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let got = page(items.clone(), &[SortKey::Created], SortOrder::Asc, 0, None);
        assert_eq!(rel(&got), vec!["none", "old", "new"]);
        let got = page(items, &[SortKey::Created], SortOrder::Desc, 0, None);
        assert_eq!(rel(&got), vec!["none", "new", "old"]);
    }

    #[test]
    fn no_sort_just_slices() {
        let got = page(named(&["q", "p", "r"]), &[], SortOrder::Asc, 1, None);
        assert_eq!(rel(&got), vec!["p", "r"]);
    }
}
