//! Spec resolution: turns one [`FileSpecEntry`] into the ordered list of
//! items it selects.
//!
//! Stages run on the calling thread, each taking ownership of the previous
//! stage's vector: match (filesystem walk or remote index) → exclude →
//! build correlation → sort/offset/limit. Target paths are composed
//! afterwards by the command that owns the entry.

pub mod build;
pub mod exclude;
pub mod matcher;
pub mod pager;
pub mod target;
pub mod walker;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::TransferError;
use crate::repo::{ItemKind, RepoItem, Repository, SearchQuery};
use crate::spec::FileSpecEntry;
use crate::transfer::normalize_path;

use self::exclude::ExcludeFilter;
use self::matcher::{PathMatcher, bottom_chain};
use self::walker::SymlinkWalker;

pub use self::target::TargetSide;

pub const SYMLINK_DEST_PROP: &str = "symlink.dest";
pub const SYMLINK_SHA_PROP: &str = "symlink.destsha256";

/// A concrete item selected by an entry's pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedItem {
    /// Local path as spelled, or `repo/path/name`.
    pub source_path: String,
    /// Path used for hierarchical placement and exclusion.
    pub relative_path: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub symlink_target: Option<String>,
    /// Capture group values, `{1}` is `captures[0]`.
    pub captures: Vec<String>,
    pub checksum: Option<String>,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub properties: BTreeMap<String, Vec<String>>,
    /// Set by build correlation.
    pub build_owner: Option<(String, String)>,
}

impl MatchedItem {
    pub fn file(source_path: &str, relative_path: &str) -> Self {
        MatchedItem {
            source_path: source_path.to_string(),
            relative_path: relative_path.to_string(),
            is_dir: false,
            is_symlink: false,
            symlink_target: None,
            captures: Vec::new(),
            checksum: None,
            size: 0,
            created: None,
            properties: BTreeMap::new(),
            build_owner: None,
        }
    }

    fn from_repo(item: RepoItem, captures: Vec<String>) -> Self {
        let symlink_target = item.prop(SYMLINK_DEST_PROP).map(str::to_string);
        MatchedItem {
            source_path: item.full_path(),
            relative_path: item.rel_path(),
            is_dir: item.kind == ItemKind::Folder,
            is_symlink: symlink_target.is_some(),
            symlink_target,
            captures,
            checksum: item.sha256.map(|s| s.to_ascii_lowercase()),
            size: item.size,
            created: item.created,
            properties: item.properties,
            build_owner: None,
        }
    }

    pub fn base_name(&self) -> &str {
        let p = self.relative_path.trim_end_matches('/');
        p.rsplit('/').next().unwrap_or(p)
    }

    pub fn depth(&self) -> usize {
        self.relative_path.split('/').filter(|s| !s.is_empty()).count()
    }

    pub fn prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.first()).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSide {
    Local,
    Remote,
}

/// Run every resolution stage for one entry.
pub fn resolve_entry<R: Repository + ?Sized>(
    entry: &FileSpecEntry,
    side: SourceSide,
    repo: &R,
    preserve_symlinks: bool,
) -> Result<Vec<MatchedItem>, TransferError> {
    let matched = match side {
        SourceSide::Local => match_local(entry, preserve_symlinks)?,
        SourceSide::Remote => match_remote(entry, repo)?,
    };
    tracing::debug!("[resolve] '{}' matched {} item(s)", entry.pattern, matched.len());

    let filtered = ExcludeFilter::new(&entry.exclude_patterns, entry.regexp)?.apply(matched);
    // a followed walk only yields a link for an explicitly named broken one
    if side == SourceSide::Local
        && !preserve_symlinks
        && let Some(broken) = filtered.iter().find(|i| i.is_symlink)
    {
        return Err(TransferError::BrokenSymlink(broken.source_path.clone()));
    }

    let correlated = match &entry.build {
        Some(build) => {
            let snapshot = build::resolve_snapshot(repo, build)?;
            build::correlate(filtered, &snapshot)
        }
        None => filtered,
    };

    Ok(pager::page(correlated, &entry.sort_by, entry.sort_order, entry.offset, entry.limit))
}

/// Expand a leading `~` and drop `./` prefixes from a local pattern.
pub fn normalize_local_pattern(pattern: &str, regexp: bool) -> String {
    let mut p = pattern.to_string();
    if (p == "~" || p.starts_with("~/"))
        && let Some(home) = dirs::home_dir()
    {
        p = format!("{}{}", normalize_path(&home.to_string_lossy(), false), &p[1..]);
    }
    if !regexp {
        p = normalize_path(&p, true);
    }
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    p
}

/// Keep directories only when asked, and only bottom-chain ones when flat.
fn select_dirs(items: Vec<MatchedItem>, include_dirs: bool, flat: bool) -> Vec<MatchedItem> {
    if !include_dirs {
        return items.into_iter().filter(|i| !i.is_dir).collect();
    }
    if !flat {
        return items;
    }
    let bottom = bottom_chain(items.iter().filter(|i| i.is_dir).map(|i| i.relative_path.as_str()));
    items.into_iter().filter(|i| !i.is_dir || bottom.contains(&i.relative_path)).collect()
}

fn match_local(
    entry: &FileSpecEntry,
    preserve_symlinks: bool,
) -> Result<Vec<MatchedItem>, TransferError> {
    let pattern = normalize_local_pattern(&entry.pattern, entry.regexp);
    let matcher = PathMatcher::new(&pattern, entry.regexp, entry.recursive)?;
    let root = matcher.root().to_string();

    let mut walker = SymlinkWalker::new(preserve_symlinks);
    if !entry.recursive {
        if matcher.is_literal() {
            walker = walker.max_depth(1);
        } else if !entry.regexp {
            let rest = pattern[root.len()..].trim_start_matches('/');
            walker = walker.max_depth(rest.matches('/').count() + 1);
        }
    }

    let mut items = Vec::new();
    for e in walker.walk(&root)? {
        let Some(captures) = matcher.captures(&e.path) else {
            continue;
        };
        items.push(MatchedItem {
            source_path: e.path.clone(),
            relative_path: e.path,
            is_dir: e.is_dir,
            is_symlink: e.is_symlink,
            symlink_target: e.symlink_target,
            captures,
            checksum: None,
            size: e.size,
            created: e.modified,
            properties: BTreeMap::new(),
            build_owner: None,
        });
    }
    Ok(select_dirs(items, entry.include_dirs, entry.flat))
}

/// Index query covering everything `matcher` can match.
fn search_query(entry: &FileSpecEntry, matcher: &PathMatcher, pattern: &str) -> SearchQuery {
    let root = matcher.root().trim_matches('/');
    let (repo, prefix) = if root.is_empty() {
        (None, String::new())
    } else {
        let (r, p) = crate::parse::split_repo_path(root);
        (Some(r.to_string()), p.to_string())
    };
    let remainder = pattern.trim_start_matches('/')[root.len()..].trim_start_matches('/');
    SearchQuery {
        repo,
        path_prefix: prefix,
        recursive: entry.recursive || matcher.is_literal() || remainder.contains('/'),
        include_dirs: entry.include_dirs,
        props: entry.props.clone(),
        archive_entries: entry.archive_entries.clone(),
    }
}

fn match_remote<R: Repository + ?Sized>(
    entry: &FileSpecEntry,
    repo: &R,
) -> Result<Vec<MatchedItem>, TransferError> {
    let pattern = entry.pattern.trim_start_matches('/');
    let matcher = PathMatcher::new(pattern, entry.regexp, entry.recursive)?;
    let query = search_query(entry, &matcher, pattern);
    tracing::debug!(
        "[resolve] index query repo={:?} prefix='{}' recursive={}",
        query.repo,
        query.path_prefix,
        query.recursive
    );
    let mut items = Vec::new();
    for item in repo.resolve(&query)? {
        let full = item.full_path();
        if let Some(captures) = matcher.captures(&full) {
            items.push(MatchedItem::from_repo(item, captures));
        }
    }
    Ok(select_dirs(items, entry.include_dirs, entry.flat))
}
