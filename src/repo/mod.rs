//! Collaborator seams towards the artifact repository server.
//!
//! The resolution engine only talks to these traits. Two backends ship with
//! the crate: [`http::HttpRepository`] for `http(s)://` servers and
//! [`local::LocalRepository`], a directory-backed store used for `file://`
//! URLs, plain paths and the integration tests.

pub mod http;
pub mod local;

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::buildinfo::BuildInfo;
use crate::error::TransferError;
use crate::spec::BuildNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// One entry of the remote index. `path` is `"."` for items at the repository root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoItem {
    pub repo: String,
    pub path: String,
    pub name: String,
    pub kind: ItemKind,
    pub size: u64,
    pub sha256: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub properties: BTreeMap<String, Vec<String>>,
}

impl RepoItem {
    /// Path inside the repository, without the repository name.
    pub fn rel_path(&self) -> String {
        if self.path.is_empty() || self.path == "." {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// `repo/path/name`
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.repo, self.rel_path())
    }

    pub fn prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.first()).map(String::as_str)
    }
}

/// What the engine asks the index for. The index may return more than asked;
/// the matcher filters precisely afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// `None` when the repository part of the pattern contains wildcards.
    pub repo: Option<String>,
    /// Literal directory prefix inside the repository (no trailing '/').
    pub path_prefix: String,
    pub recursive: bool,
    pub include_dirs: bool,
    /// Every `key=value` pair must be present on the item.
    pub props: Vec<(String, String)>,
    pub archive_entries: Option<String>,
}

impl SearchQuery {
    /// Whether an item's repository path lies within the requested prefix.
    pub fn covers(&self, repo: &str, rel_path: &str) -> bool {
        if let Some(r) = &self.repo
            && r != repo
        {
            return false;
        }
        if self.path_prefix.is_empty() {
            return true;
        }
        rel_path == self.path_prefix || rel_path.starts_with(&format!("{}/", self.path_prefix))
    }
}

/// Checksums belonging to one resolved build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSnapshot {
    pub name: String,
    pub number: String,
    pub started: Option<DateTime<Utc>>,
    pub checksums: BTreeSet<String>,
}

pub trait RemoteIndex {
    fn resolve(&self, query: &SearchQuery) -> Result<Vec<RepoItem>, TransferError>;

    /// Whether `repo/path` names an existing folder. A bare repository name
    /// always does.
    fn is_folder(&self, full_path: &str) -> Result<bool, TransferError> {
        let (repo, path) = crate::parse::split_repo_path(full_path.trim_end_matches('/'));
        if path.is_empty() {
            return Ok(true);
        }
        let query = SearchQuery {
            repo: Some(repo.to_string()),
            path_prefix: path.to_string(),
            include_dirs: true,
            ..Default::default()
        };
        Ok(self.resolve(&query)?.iter().any(|i| i.kind == ItemKind::Folder && i.rel_path() == path))
    }
}

pub trait TransferService {
    fn fetch(&self, remote_path: &str) -> Result<Box<dyn Read + Send>, TransferError>;
    /// Store `len` bytes from `body`; the server verifies `sha256`.
    fn store(
        &self,
        remote_path: &str,
        body: Box<dyn Read + Send>,
        len: u64,
        sha256: &str,
        props: &[(String, String)],
    ) -> Result<(), TransferError>;
    fn create_dir(&self, remote_path: &str, props: &[(String, String)]) -> Result<(), TransferError>;
    fn copy(&self, from: &str, to: &str) -> Result<(), TransferError>;
    fn move_item(&self, from: &str, to: &str) -> Result<(), TransferError>;
    fn delete(&self, remote_path: &str) -> Result<(), TransferError>;
    fn set_properties(
        &self,
        remote_path: &str,
        props: &[(String, String)],
        recursive: bool,
    ) -> Result<(), TransferError>;
    fn delete_properties(
        &self,
        remote_path: &str,
        keys: &[String],
        recursive: bool,
    ) -> Result<(), TransferError>;
}

pub trait BuildInfoService {
    fn build_snapshot(&self, name: &str, number: &BuildNumber)
    -> Result<BuildSnapshot, TransferError>;
    fn publish_build(&self, info: &BuildInfo) -> Result<(), TransferError>;
}

pub trait Repository: RemoteIndex + TransferService + BuildInfoService + Send + Sync {}

impl<T: RemoteIndex + TransferService + BuildInfoService + Send + Sync> Repository for T {}

/// Connection details for one server, from the config or from CLI flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerDetails {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
}

/// Pick the backend from the URL scheme.
pub fn connect(details: &ServerDetails) -> anyhow::Result<Arc<dyn Repository>> {
    let url = details.url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        tracing::debug!("[repo] connecting to {}", url);
        return Ok(Arc::new(http::HttpRepository::new(details)?));
    }
    let root = url.strip_prefix("file://").unwrap_or(url);
    if root.is_empty() {
        return Err(anyhow::anyhow!("server url is empty"));
    }
    tracing::debug!("[repo] opening directory repository at {}", root);
    Ok(Arc::new(local::LocalRepository::open(root)?))
}

/// Split `a/b/c` into (`a/b`, `c`) with `"."` for a root-level name.
pub(crate) fn split_parent(rel_path: &str) -> (String, String) {
    match rel_path.rsplit_once('/') {
        Some((p, n)) => (p.to_string(), n.to_string()),
        None => (".".to_string(), rel_path.to_string()),
    }
}
