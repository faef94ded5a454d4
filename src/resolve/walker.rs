use std::path::Path;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::error::TransferError;
use crate::transfer::normalize_path;

/// One filesystem entry, with its path spelled the way the user spelled the root.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkEntry {
    pub path: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub symlink_target: Option<String>,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Depth-first walk in file-name order.
///
/// Following mode descends through directory links and reports file links
/// with their target's content. Entering a directory already on the current
/// root-to-node chain is a cycle and that subtree is pruned. Broken links
/// found below the root are skipped; a root that is itself a broken link is
/// reported as a link leaf so the caller can decide after exclusion.
/// Preserving mode reports every link as a leaf instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymlinkWalker {
    preserve_symlinks: bool,
    max_depth: Option<usize>,
}

impl SymlinkWalker {
    pub fn new(preserve_symlinks: bool) -> Self {
        Self { preserve_symlinks, max_depth: None }
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn walk(&self, root: &str) -> Result<Vec<WalkEntry>, TransferError> {
        let from_cwd = root.is_empty() || root == ".";
        let start = if from_cwd { "." } else { root };
        let start_path = Path::new(start);

        if !from_cwd && (is_broken_link(start_path) || (self.preserve_symlinks && is_symlink(start_path))) {
            return Ok(vec![link_leaf(start_path, start.to_string())]);
        }

        let mut walker = WalkDir::new(start_path)
            .follow_links(!self.preserve_symlinks)
            .sort_by_file_name()
            .min_depth(if from_cwd { 1 } else { 0 });
        if let Some(d) = self.max_depth {
            walker = walker.max_depth(d);
        }

        let mut out = Vec::new();
        for res in walker {
            let entry = match res {
                Ok(e) => e,
                Err(err) => {
                    if let Some(ancestor) = err.loop_ancestor() {
                        tracing::debug!(
                            "[walk] pruned symlink cycle at {} (back to {})",
                            err.path().map(|p| p.display().to_string()).unwrap_or_default(),
                            ancestor.display()
                        );
                        continue;
                    }
                    if let Some(p) = err.path()
                        && is_broken_link(p)
                    {
                        tracing::debug!("[walk] skipped broken symlink {}", p.display());
                        continue;
                    }
                    if err.depth() == 0
                        && err.io_error().map(|e| e.kind()) == Some(std::io::ErrorKind::NotFound)
                    {
                        return Ok(Vec::new());
                    }
                    let path = err.path().unwrap_or(start_path).to_path_buf();
                    return Err(TransferError::filesystem(&path, err));
                }
            };

            let spelled = spell(entry.path(), from_cwd);
            if self.preserve_symlinks && entry.path_is_symlink() {
                out.push(link_leaf(entry.path(), spelled));
                continue;
            }
            let md = entry.metadata().map_err(|e| TransferError::filesystem(entry.path(), e))?;
            let is_dir = md.is_dir();
            out.push(WalkEntry {
                path: spelled,
                is_dir,
                is_symlink: false,
                symlink_target: None,
                size: if is_dir { 0 } else { md.len() },
                modified: md.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        Ok(out)
    }
}

fn spell(path: &Path, from_cwd: bool) -> String {
    let s = normalize_path(&path.to_string_lossy(), false);
    if from_cwd {
        s.strip_prefix("./").map(str::to_string).unwrap_or(s)
    } else {
        s
    }
}

fn link_leaf(path: &Path, spelled: String) -> WalkEntry {
    let target = std::fs::read_link(path).ok().map(|t| normalize_path(&t.to_string_lossy(), false));
    let modified = std::fs::symlink_metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    WalkEntry { path: spelled, is_dir: false, is_symlink: true, symlink_target: target, size: 0, modified }
}

fn is_symlink(p: &Path) -> bool {
    std::fs::symlink_metadata(p).map(|m| m.file_type().is_symlink()).unwrap_or(false)
}

pub(crate) fn is_broken_link(p: &Path) -> bool {
    is_symlink(p) && std::fs::metadata(p).is_err()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn paths(entries: &[WalkEntry]) -> Vec<String> {
        entries.iter().map(|e| e.path.clone()).collect()
    }

    #[test]
    fn walks_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("r");
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::write(root.join("c.txt"), b"c").unwrap();
        std::fs::write(root.join("a.txt"), b"aa").unwrap();
        std::fs::write(root.join("b/x.txt"), b"x").unwrap();
        let root_s = normalize_path(&root.to_string_lossy(), false);
        let got = SymlinkWalker::new(false).walk(&root_s).unwrap();
        let rel: Vec<String> =
            paths(&got).iter().map(|p| p.trim_start_matches(&root_s).to_string()).collect();
        assert_eq!(rel, vec!["", "/a.txt", "/b", "/b/x.txt", "/c.txt"]);
        assert_eq!(got[1].size, 2);
    }

    #[test]
    fn cycle_is_pruned_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("r");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/f.txt"), b"f").unwrap();
        symlink(&root, root.join("sub/link1")).unwrap();
        let root_s = root.to_string_lossy().to_string();
        let got = SymlinkWalker::new(false).walk(&root_s).unwrap();
        let files: Vec<_> = got.iter().filter(|e| !e.is_dir).collect();
        assert_eq!(files.len(), 1, "{:?}", paths(&got));
    }

    #[test]
    fn broken_links_skipped_or_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("r");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("real.txt"), b"r").unwrap();
        symlink(root.join("missing"), root.join("dangling")).unwrap();
        symlink(root.join("real.txt"), root.join("alias.txt")).unwrap();
        let root_s = root.to_string_lossy().to_string();

        let followed = SymlinkWalker::new(false).walk(&root_s).unwrap();
        let names = paths(&followed);
        assert!(names.iter().any(|p| p.ends_with("/alias.txt")));
        assert!(!names.iter().any(|p| p.ends_with("/dangling")));
        let alias = followed.iter().find(|e| e.path.ends_with("/alias.txt")).unwrap();
        assert!(!alias.is_symlink);
        assert_eq!(alias.size, 1);

        let kept = SymlinkWalker::new(true).walk(&root_s).unwrap();
        let dangling = kept.iter().find(|e| e.path.ends_with("/dangling")).unwrap();
        assert!(dangling.is_symlink);
        assert_eq!(dangling.size, 0);
        assert!(dangling.symlink_target.as_deref().unwrap().ends_with("/missing"));
    }

    #[test]
    fn explicitly_named_broken_link_is_a_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        symlink(dir.path().join("nowhere"), &link).unwrap();
        for preserve in [false, true] {
            let got = SymlinkWalker::new(preserve).walk(&link.to_string_lossy()).unwrap();
            assert_eq!(got.len(), 1);
            assert!(got[0].is_symlink);
            assert!(got[0].symlink_target.as_deref().unwrap().ends_with("/nowhere"));
        }
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(SymlinkWalker::new(false).walk(&missing.to_string_lossy()).unwrap().is_empty());
    }

    #[test]
    fn max_depth_limits_listing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("r");
        std::fs::create_dir_all(root.join("d/e")).unwrap();
        std::fs::write(root.join("d/e/deep.txt"), b"x").unwrap();
        std::fs::write(root.join("top.txt"), b"x").unwrap();
        let got = SymlinkWalker::new(false).max_depth(1).walk(&root.to_string_lossy()).unwrap();
        assert!(!paths(&got).iter().any(|p| p.ends_with("deep.txt")));
        assert!(paths(&got).iter().any(|p| p.ends_with("top.txt")));
    }
}
