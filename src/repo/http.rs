//! Artifactory-compatible REST backend.

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    BuildInfoService, BuildSnapshot, ItemKind, RemoteIndex, RepoItem, SearchQuery, ServerDetails,
    TransferService,
};
use crate::buildinfo::BuildInfo;
use crate::error::TransferError;
use crate::spec::BuildNumber;

const HEADER_SHA256: &str = "X-Checksum-Sha256";

pub struct HttpRepository {
    client: Client,
    base: String,
    details: ServerDetails,
}

#[derive(Deserialize)]
struct AqlResponse {
    #[serde(default)]
    results: Vec<AqlItem>,
}

#[derive(Deserialize)]
struct AqlItem {
    repo: String,
    path: String,
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    properties: Vec<AqlProperty>,
}

/// Storage API answer; only folders carry `children`.
#[derive(Deserialize)]
struct StorageInfo {
    #[serde(default)]
    children: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct AqlProperty {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildRuns {
    #[serde(default)]
    builds_numbers: Vec<BuildRun>,
}

#[derive(Deserialize)]
struct BuildRun {
    uri: String,
    #[serde(default)]
    started: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildEnvelope {
    build_info: RemoteBuildInfo,
}

#[derive(Deserialize)]
struct RemoteBuildInfo {
    name: String,
    number: String,
    #[serde(default)]
    started: Option<String>,
    #[serde(default)]
    modules: Vec<RemoteModule>,
}

#[derive(Deserialize)]
struct RemoteModule {
    #[serde(default)]
    artifacts: Vec<RemoteArtifact>,
}

#[derive(Deserialize)]
struct RemoteArtifact {
    #[serde(default)]
    sha256: Option<String>,
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3f%z"))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Map a non-success status to the error the orchestrator acts on.
fn classify(status: StatusCode, what: &str, body: &str) -> TransferError {
    let detail = if body.trim().is_empty() {
        format!("{} (status {})", what, status)
    } else {
        format!("{} (status {}): {}", what, status, body.trim())
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransferError::FatalAuth(detail),
        StatusCode::NOT_FOUND => TransferError::NotFound(what.to_string()),
        StatusCode::CONFLICT if body.contains("checksum") => TransferError::ChecksumMismatch {
            path: what.to_string(),
            expected: String::new(),
            actual: body.trim().to_string(),
        },
        _ => TransferError::Transport(detail),
    }
}

fn check(resp: reqwest::Result<Response>, what: &str) -> Result<Response, TransferError> {
    let resp = resp.map_err(|e| TransferError::Transport(format!("{}: {}", what, e)))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(classify(status, what, &body))
}

fn escape_matrix(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ';' => out.push_str("%3B"),
            '=' => out.push_str("%3D"),
            ',' => out.push_str("%2C"),
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ' ' => out.push_str("%20"),
            _ => out.push(c),
        }
    }
    out
}

/// `;k=v;k2=v2` suffix used when deploying.
fn matrix_params(props: &[(String, String)]) -> String {
    props.iter().map(|(k, v)| format!(";{}={}", escape_matrix(k), escape_matrix(v))).collect()
}

/// `k=v1,v2;k2=v3` form expected by the storage properties endpoint.
fn properties_param(props: &[(String, String)]) -> String {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (k, v) in props {
        grouped.entry(k.as_str()).or_default().push(v.as_str());
    }
    grouped
        .into_iter()
        .map(|(k, vals)| {
            let vals: Vec<String> = vals.into_iter().map(escape_matrix).collect();
            format!("{}={}", escape_matrix(k), vals.join(","))
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// AQL query selecting everything `query` may match.
pub(crate) fn build_aql(query: &SearchQuery) -> String {
    let mut clauses: Vec<Value> = Vec::new();
    if let Some(repo) = &query.repo {
        clauses.push(json!({ "repo": repo }));
    }
    let prefix = query.path_prefix.trim_matches('/');
    match (prefix.is_empty(), query.recursive) {
        (true, true) => {}
        (true, false) => clauses.push(json!({ "path": "." })),
        (false, true) => clauses.push(json!({ "$or": [
            { "path": prefix },
            { "path": { "$match": format!("{}/*", prefix) } },
            { "$and": [ { "path": parent_of(prefix) }, { "name": name_of(prefix) } ] },
        ]})),
        (false, false) => clauses.push(json!({ "$or": [
            { "path": prefix },
            { "$and": [ { "path": parent_of(prefix) }, { "name": name_of(prefix) } ] },
        ]})),
    }
    clauses.push(json!({ "type": if query.include_dirs { "any" } else { "file" } }));
    for (k, v) in &query.props {
        clauses.push(json!({ format!("@{}", k): v }));
    }
    if let Some(entries) = &query.archive_entries {
        clauses.push(json!({ "archive.entry.name": { "$match": entries } }));
    }
    format!(
        "items.find({}).include(\"repo\",\"path\",\"name\",\"type\",\"size\",\"created\",\"sha256\",\"property\")",
        json!({ "$and": clauses })
    )
}

fn parent_of(p: &str) -> String {
    p.rsplit_once('/').map(|(a, _)| a.to_string()).unwrap_or_else(|| ".".to_string())
}

fn name_of(p: &str) -> String {
    p.rsplit_once('/').map(|(_, b)| b.to_string()).unwrap_or_else(|| p.to_string())
}

fn into_repo_item(a: AqlItem) -> RepoItem {
    let mut properties: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for p in a.properties {
        properties.entry(p.key).or_default().push(p.value.unwrap_or_default());
    }
    RepoItem {
        repo: a.repo,
        path: a.path,
        name: a.name,
        kind: if a.kind == "folder" { ItemKind::Folder } else { ItemKind::File },
        size: a.size,
        sha256: a.sha256,
        created: a.created.as_deref().and_then(parse_time),
        properties,
    }
}

impl HttpRepository {
    pub fn new(details: &ServerDetails) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .context("failed to build HTTP client")?;
        Ok(HttpRepository {
            client,
            base: details.url.trim_end_matches('/').to_string(),
            details: details.clone(),
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/{}", self.base, tail.trim_start_matches('/'))
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.details.access_token {
            rb.bearer_auth(token)
        } else if let Some(user) = &self.details.user {
            rb.basic_auth(user, self.details.password.as_ref())
        } else {
            rb
        }
    }

    fn latest_number(&self, name: &str) -> Result<String, TransferError> {
        let what = format!("build {}", name);
        let resp = check(self.authed(self.client.get(self.url(&format!("api/build/{}", name)))).send(), &what)
            .map_err(|e| match e {
                TransferError::NotFound(_) => TransferError::BuildNotFound {
                    name: name.to_string(),
                    number: BuildNumber::Latest.to_string(),
                },
                other => other,
            })?;
        let runs: BuildRuns =
            resp.json().map_err(|e| TransferError::Transport(format!("{}: {}", what, e)))?;
        runs.builds_numbers
            .into_iter()
            .max_by_key(|r| r.started.as_deref().and_then(parse_time))
            .map(|r| r.uri.trim_start_matches('/').to_string())
            .ok_or_else(|| TransferError::BuildNotFound {
                name: name.to_string(),
                number: BuildNumber::Latest.to_string(),
            })
    }
}

impl RemoteIndex for HttpRepository {
    fn resolve(&self, query: &SearchQuery) -> Result<Vec<RepoItem>, TransferError> {
        let aql = build_aql(query);
        tracing::debug!("[repo] aql {}", aql);
        let req = self
            .authed(self.client.post(self.url("api/search/aql")))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(aql);
        let resp = check(req.send(), "aql search")?;
        let parsed: AqlResponse = resp
            .json()
            .map_err(|e| TransferError::Transport(format!("aql search response: {}", e)))?;
        Ok(parsed.results.into_iter().map(into_repo_item).collect())
    }

    fn is_folder(&self, full_path: &str) -> Result<bool, TransferError> {
        let path = full_path.trim_matches('/');
        if !path.contains('/') {
            return Ok(true);
        }
        let url = self.url(&format!("api/storage/{}", path));
        match check(self.authed(self.client.get(url)).send(), path) {
            Ok(resp) => {
                let info: StorageInfo = resp
                    .json()
                    .map_err(|e| TransferError::Transport(format!("storage info {}: {}", path, e)))?;
                Ok(info.children.is_some())
            }
            Err(TransferError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl TransferService for HttpRepository {
    fn fetch(&self, remote_path: &str) -> Result<Box<dyn Read + Send>, TransferError> {
        let resp = check(self.authed(self.client.get(self.url(remote_path))).send(), remote_path)?;
        Ok(Box::new(resp))
    }

    fn store(
        &self,
        remote_path: &str,
        body: Box<dyn Read + Send>,
        len: u64,
        sha256: &str,
        props: &[(String, String)],
    ) -> Result<(), TransferError> {
        let url = format!("{}{}", self.url(remote_path), matrix_params(props));
        let req = self
            .authed(self.client.put(url))
            .header(HEADER_SHA256, sha256)
            .body(Body::sized(body, len));
        check(req.send(), remote_path).map(|_| ())
    }

    fn create_dir(&self, remote_path: &str, props: &[(String, String)]) -> Result<(), TransferError> {
        let url = format!(
            "{}/{}",
            self.url(remote_path.trim_end_matches('/')),
            matrix_params(props)
        );
        check(self.authed(self.client.put(url)).send(), remote_path).map(|_| ())
    }

    fn copy(&self, from: &str, to: &str) -> Result<(), TransferError> {
        let url = self.url(&format!("api/copy/{}", from.trim_start_matches('/')));
        let req = self.authed(self.client.post(url)).query(&[("to", format!("/{}", to.trim_start_matches('/')))]);
        check(req.send(), from).map(|_| ())
    }

    fn move_item(&self, from: &str, to: &str) -> Result<(), TransferError> {
        let url = self.url(&format!("api/move/{}", from.trim_start_matches('/')));
        let req = self.authed(self.client.post(url)).query(&[("to", format!("/{}", to.trim_start_matches('/')))]);
        check(req.send(), from).map(|_| ())
    }

    fn delete(&self, remote_path: &str) -> Result<(), TransferError> {
        check(self.authed(self.client.delete(self.url(remote_path))).send(), remote_path).map(|_| ())
    }

    fn set_properties(
        &self,
        remote_path: &str,
        props: &[(String, String)],
        recursive: bool,
    ) -> Result<(), TransferError> {
        let url = self.url(&format!("api/storage/{}", remote_path.trim_start_matches('/')));
        let req = self.authed(self.client.put(url)).query(&[
            ("properties", properties_param(props)),
            ("recursive", if recursive { "1" } else { "0" }.to_string()),
        ]);
        check(req.send(), remote_path).map(|_| ())
    }

    fn delete_properties(
        &self,
        remote_path: &str,
        keys: &[String],
        recursive: bool,
    ) -> Result<(), TransferError> {
        let url = self.url(&format!("api/storage/{}", remote_path.trim_start_matches('/')));
        let req = self.authed(self.client.delete(url)).query(&[
            ("properties", keys.join(",")),
            ("recursive", if recursive { "1" } else { "0" }.to_string()),
        ]);
        check(req.send(), remote_path).map(|_| ())
    }
}

impl BuildInfoService for HttpRepository {
    fn build_snapshot(
        &self,
        name: &str,
        number: &BuildNumber,
    ) -> Result<BuildSnapshot, TransferError> {
        let number = match number {
            BuildNumber::Latest => self.latest_number(name)?,
            BuildNumber::Number(n) => n.clone(),
        };
        let what = format!("build {}/{}", name, number);
        let resp =
            check(self.authed(self.client.get(self.url(&format!("api/build/{}/{}", name, number)))).send(), &what)
                .map_err(|e| match e {
                    TransferError::NotFound(_) => {
                        TransferError::BuildNotFound { name: name.to_string(), number: number.clone() }
                    }
                    other => other,
                })?;
        let env: BuildEnvelope =
            resp.json().map_err(|e| TransferError::Transport(format!("{}: {}", what, e)))?;
        Ok(snapshot_of(env.build_info))
    }

    fn publish_build(&self, info: &BuildInfo) -> Result<(), TransferError> {
        let what = format!("publish build {}/{}", info.name, info.number);
        check(self.authed(self.client.put(self.url("api/build"))).json(info).send(), &what).map(|_| ())
    }
}

fn snapshot_of(info: RemoteBuildInfo) -> BuildSnapshot {
    BuildSnapshot {
        checksums: info
            .modules
            .iter()
            .flat_map(|m| m.artifacts.iter())
            .filter_map(|a| a.sha256.as_deref())
            .map(str::to_ascii_lowercase)
            .collect(),
        started: info.started.as_deref().and_then(parse_time),
        name: info.name,
        number: info.number,
    }
}
