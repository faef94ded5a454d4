use std::collections::HashSet;

use regex::Regex;

use crate::error::TransferError;

/// Compiled include (or exclude) pattern.
///
/// Wildcard patterns are converted to an anchored regex: `*` spans any text
/// (one path segment when not recursive), `?` one character, parentheses are
/// capture groups and every other character is literal.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Regex,
    root: String,
    literal: bool,
}

const WILDCARD_META: &[char] = &['*', '?', '('];
const REGEX_META: &[char] = &['.', '^', '$', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '\\'];

impl PathMatcher {
    pub fn new(pattern: &str, regexp: bool, recursive: bool) -> Result<Self, TransferError> {
        let meta = if regexp { REGEX_META } else { WILDCARD_META };
        let literal = !pattern.contains(meta);
        let (expr, root) = if literal {
            let trimmed = pattern.trim_end_matches('/');
            let tail = if recursive { "(?:/.*)?" } else { "(?:/[^/]*)?" };
            (format!("^{}{}$", regex::escape(trimmed), tail), trimmed.to_string())
        } else {
            let root = literal_root(pattern, meta);
            let body = if regexp {
                if pattern.ends_with('/') { format!("{}.*", pattern) } else { pattern.to_string() }
            } else {
                let p = if pattern.ends_with('/') { format!("{}*", pattern) } else { pattern.to_string() };
                wildcard_to_regex(&p, recursive)
            };
            (format!("^(?:{})$", body), root)
        };
        let regex = Regex::new(&expr).map_err(|e| TransferError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(PathMatcher { regex, root, literal })
    }

    /// Capture groups of a match; unmatched optional groups become empty strings.
    pub fn captures(&self, candidate: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(candidate)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    /// Literal directory prefix before the first wildcard (the whole pattern
    /// when it has none). Used to scope filesystem walks and index queries.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_literal(&self) -> bool {
        self.literal
    }
}

fn literal_root(pattern: &str, meta: &[char]) -> String {
    let first_meta = pattern.find(meta).unwrap_or(pattern.len());
    match pattern[..first_meta].rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => pattern[..i].to_string(),
        None => String::new(),
    }
}

pub fn wildcard_to_regex(pattern: &str, recursive: bool) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' if recursive => out.push_str(".*"),
            '*' => out.push_str("[^/]*"),
            '?' if recursive => out.push('.'),
            '?' => out.push_str("[^/]"),
            '(' | ')' => out.push(c),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out
}

/// Directories among `dirs` that contain no other directory of the set.
pub fn bottom_chain<'a>(dirs: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
    let dirs: Vec<&str> = dirs.into_iter().collect();
    let mut has_descendant: HashSet<&str> = HashSet::new();
    for d in &dirs {
        let mut cur = *d;
        while let Some((parent, _)) = cur.rsplit_once('/') {
            if !has_descendant.insert(parent) {
                break;
            }
            cur = parent;
        }
    }
    dirs.into_iter().filter(|d| !has_descendant.contains(d)).map(str::to_string).collect()
}
