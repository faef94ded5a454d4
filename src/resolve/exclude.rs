use super::MatchedItem;
use super::matcher::PathMatcher;
use crate::error::TransferError;

/// Drops items whose relative path matches any exclude pattern.
///
/// Exclude patterns use the include pattern's mode and always span path
/// segments, so `*a1.in` and `*/a1.in` differ only for root-level items.
pub struct ExcludeFilter {
    matchers: Vec<PathMatcher>,
}

impl ExcludeFilter {
    pub fn new(patterns: &[String], regexp: bool) -> Result<Self, TransferError> {
        let matchers = patterns
            .iter()
            .map(|p| PathMatcher::new(p, regexp, true))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    pub fn is_excluded(&self, relative_path: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(relative_path))
    }

    pub fn apply(&self, items: Vec<MatchedItem>) -> Vec<MatchedItem> {
        if self.matchers.is_empty() {
            return items;
        }
        items
            .into_iter()
            .filter(|item| {
                let excluded = self.is_excluded(&item.relative_path);
                if excluded {
                    tracing::debug!("[exclude] {}", item.source_path);
                }
                !excluded
            })
            .collect()
    }
}
