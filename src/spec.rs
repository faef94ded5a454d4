//! File spec model: the declarative description of what a command works on.
//!
//! Entries come either from a JSON document (`{"files":[...]}`) or from the
//! inline `<pattern> [target]` arguments. Both are funnelled through
//! [`RawEntry`] so defaults and validation happen in one place.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TransferError;
use crate::transfer::OperationKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BuildNumber {
    Number(String),
    Latest,
}

impl std::fmt::Display for BuildNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildNumber::Number(n) => f.write_str(n),
            BuildNumber::Latest => f.write_str("LATEST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildIdentifier {
    pub name: String,
    pub number: BuildNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortKey {
    Name,
    Created,
    Depth,
    Size,
}

impl std::str::FromStr for SortKey {
    type Err = TransferError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(SortKey::Name),
            "created" => Ok(SortKey::Created),
            "depth" => Ok(SortKey::Depth),
            "size" => Ok(SortKey::Size),
            other => Err(TransferError::InvalidSpec(format!(
                "unknown sort key '{}' (expected name, created, depth or size)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = TransferError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(TransferError::InvalidSpec(format!(
                "unknown sort order '{}' (expected asc or desc)",
                other
            ))),
        }
    }
}

/// One fully validated unit of work. Immutable once resolution starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSpecEntry {
    pub pattern: String,
    pub target: Option<String>,
    pub exclude_patterns: Vec<String>,
    pub recursive: bool,
    pub flat: bool,
    pub regexp: bool,
    pub include_dirs: bool,
    pub props: Vec<(String, String)>,
    pub build: Option<BuildIdentifier>,
    pub sort_by: Vec<SortKey>,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
    pub archive_entries: Option<String>,
}

impl FileSpecEntry {
    /// Plain entry with the per-command defaults applied.
    pub fn new(kind: OperationKind, pattern: &str, target: Option<&str>) -> Self {
        FileSpecEntry {
            pattern: pattern.to_string(),
            target: target.map(str::to_string),
            exclude_patterns: Vec::new(),
            recursive: true,
            flat: kind.default_flat(),
            regexp: false,
            include_dirs: false,
            props: Vec::new(),
            build: None,
            sort_by: Vec::new(),
            sort_order: SortOrder::Asc,
            limit: None,
            offset: 0,
            archive_entries: None,
        }
    }
}

/// Entry exactly as written in a spec document or on the command line.
/// `None` means "not given"; defaults are applied by [`RawEntry::into_entry`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEntry {
    pub pattern: String,
    pub target: Option<String>,
    #[serde(alias = "exclusions")]
    pub exclude_patterns: Option<Vec<String>>,
    #[serde(deserialize_with = "flex_bool")]
    pub recursive: Option<bool>,
    #[serde(deserialize_with = "flex_bool")]
    pub flat: Option<bool>,
    #[serde(deserialize_with = "flex_bool")]
    pub regexp: Option<bool>,
    #[serde(deserialize_with = "flex_bool")]
    pub include_dirs: Option<bool>,
    pub props: Option<String>,
    pub build: Option<String>,
    pub sort_by: Option<Vec<String>>,
    pub sort_order: Option<String>,
    #[serde(deserialize_with = "flex_usize")]
    pub limit: Option<usize>,
    #[serde(deserialize_with = "flex_usize")]
    pub offset: Option<usize>,
    pub archive_entries: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SpecDocument {
    #[serde(default)]
    files: Vec<RawEntry>,
}

// Spec documents written by other tools carry booleans and numbers as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    Str(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Num(u64),
    Str(String),
}

fn flex_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    match Option::<BoolOrString>::deserialize(d)? {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!("expected true or false, got '{}'", other))),
        },
    }
}

fn flex_usize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
    match Option::<NumberOrString>::deserialize(d)? {
        None => Ok(None),
        Some(NumberOrString::Num(n)) => Ok(Some(n as usize)),
        Some(NumberOrString::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::Str(s)) => s
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{}'", s))),
    }
}

impl RawEntry {
    /// Values explicitly given in `overrides` replace ours.
    pub fn overlay(mut self, overrides: &RawEntry) -> Self {
        macro_rules! take {
            ($($f:ident),*) => { $( if overrides.$f.is_some() { self.$f = overrides.$f.clone(); } )* };
        }
        take!(
            target,
            exclude_patterns,
            recursive,
            flat,
            regexp,
            include_dirs,
            props,
            build,
            sort_by,
            sort_order,
            limit,
            offset,
            archive_entries
        );
        self
    }

    pub fn into_entry(self, kind: OperationKind) -> Result<FileSpecEntry, TransferError> {
        let pattern = self.pattern.trim().to_string();
        if pattern.is_empty() {
            return Err(TransferError::InvalidSpec("entry has an empty pattern".into()));
        }
        let mut entry = FileSpecEntry::new(kind, &pattern, None);
        entry.target = self.target.filter(|t| !t.trim().is_empty());
        if kind.requires_target() && entry.target.is_none() {
            return Err(TransferError::InvalidSpec(format!(
                "'{}' needs a target for {}",
                pattern,
                kind.name()
            )));
        }
        if let Some(v) = self.recursive {
            entry.recursive = v;
        }
        if let Some(v) = self.flat {
            entry.flat = v;
        }
        entry.regexp = self.regexp.unwrap_or(false);
        entry.include_dirs = self.include_dirs.unwrap_or(false);
        entry.exclude_patterns = self
            .exclude_patterns
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if let Some(p) = self.props.as_deref() {
            entry.props = crate::parse::parse_props(p)
                .map_err(|e| TransferError::InvalidSpec(e.to_string()))?;
        }
        if let Some(b) = self.build.as_deref().filter(|b| !b.trim().is_empty()) {
            entry.build = Some(
                crate::parse::parse_build(b).map_err(|e| TransferError::InvalidSpec(e.to_string()))?,
            );
        }
        for key in self.sort_by.unwrap_or_default() {
            entry.sort_by.push(key.parse()?);
        }
        if let Some(order) = self.sort_order.as_deref() {
            if entry.sort_by.is_empty() {
                return Err(TransferError::InvalidSpec(
                    "sortOrder requires sortBy to be set".into(),
                ));
            }
            entry.sort_order = order.parse()?;
        }
        entry.limit = self.limit;
        entry.offset = self.offset.unwrap_or(0);
        entry.archive_entries = self.archive_entries.filter(|a| !a.trim().is_empty());
        if entry.archive_entries.is_some() && kind.source_is_local() {
            return Err(TransferError::InvalidSpec(
                "archiveEntries only applies to repository sources".into(),
            ));
        }
        if entry.build.is_some() && kind.source_is_local() {
            return Err(TransferError::InvalidSpec("build only applies to repository sources".into()));
        }
        Ok(entry)
    }
}

/// Parse a spec document and apply inline overrides to every entry.
pub fn parse_spec_document(
    text: &str,
    kind: OperationKind,
    overrides: &RawEntry,
) -> Result<Vec<FileSpecEntry>, TransferError> {
    let doc: SpecDocument =
        serde_json::from_str(text).map_err(|e| TransferError::InvalidSpec(e.to_string()))?;
    if doc.files.is_empty() {
        return Err(TransferError::InvalidSpec("spec has no entries under \"files\"".into()));
    }
    doc.files.into_iter().map(|raw| raw.overlay(overrides).into_entry(kind)).collect()
}

pub fn read_spec_file(
    path: &Path,
    kind: OperationKind,
    overrides: &RawEntry,
) -> Result<Vec<FileSpecEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read spec file {}", path.display()))?;
    let entries = parse_spec_document(&text, kind, overrides)
        .with_context(|| format!("in spec file {}", path.display()))?;
    Ok(entries)
}
