//! Directory-backed repository.
//!
//! Artifacts live at `<root>/<repo>/<path>`; their metadata (checksums,
//! properties, creation time) and published build-info documents are kept in
//! an SQLite index at `<root>/.artipilot/index.db`.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{
    BuildInfoService, BuildSnapshot, ItemKind, RemoteIndex, RepoItem, SearchQuery, TransferService,
    split_parent,
};
use crate::buildinfo::BuildInfo;
use crate::error::TransferError;
use crate::spec::BuildNumber;
use crate::transfer::{StreamError, atomic_rename_with_retries, copy_stream_with_cleanup};

const META_DIR: &str = ".artipilot";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS items (
    repo TEXT NOT NULL,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    sha256 TEXT,
    created TEXT,
    PRIMARY KEY (repo, path, name)
);
CREATE TABLE IF NOT EXISTS properties (
    repo TEXT NOT NULL,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (repo, path, name, key, value)
);
CREATE TABLE IF NOT EXISTS builds (
    name TEXT NOT NULL,
    number TEXT NOT NULL,
    started TEXT NOT NULL,
    info TEXT NOT NULL,
    PRIMARY KEY (name, number)
);";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

type ItemKey = (String, String, String);

pub struct LocalRepository {
    root: PathBuf,
    conn: Mutex<Connection>,
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn kind_str(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::File => "file",
        ItemKind::Folder => "folder",
    }
}

/// `repo/a/b` → (`repo`, `a/b`); the repository itself has an empty rel path.
fn locate(remote_path: &str) -> Result<(String, String), TransferError> {
    let trimmed = remote_path.trim_matches('/');
    let (repo, rel) = crate::parse::split_repo_path(trimmed);
    if repo.is_empty() {
        return Err(TransferError::InvalidSpec(format!(
            "'{}' does not name a repository",
            remote_path
        )));
    }
    if repo == META_DIR {
        return Err(TransferError::InvalidSpec(format!("'{}' is reserved", META_DIR)));
    }
    Ok((repo.to_string(), rel.trim_end_matches('/').to_string()))
}

fn rel_of(path: &str, name: &str) -> String {
    if path == "." { name.to_string() } else { format!("{}/{}", path, name) }
}

fn is_within(rel: &str, base: &str) -> bool {
    base.is_empty() || rel == base || rel.starts_with(&format!("{}/", base))
}

impl LocalRepository {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let meta = root.join(META_DIR);
        std::fs::create_dir_all(&meta)
            .with_context(|| format!("cannot create repository directory {}", meta.display()))?;
        let db = meta.join("index.db");
        let conn = Connection::open(&db)
            .with_context(|| format!("cannot open repository index {}", db.display()))?;
        conn.execute_batch(SCHEMA).context("cannot create repository index tables")?;
        Ok(LocalRepository { root, conn: Mutex::new(conn) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where an artifact's bytes live on disk.
    pub fn disk_path(&self, repo: &str, rel: &str) -> PathBuf {
        let mut p = self.root.join(repo);
        for seg in rel.split('/').filter(|s| !s.is_empty()) {
            p.push(seg);
        }
        p
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, TransferError> {
        self.conn
            .lock()
            .map_err(|_| TransferError::Transport("repository index lock poisoned".to_string()))
    }

    fn lookup(
        conn: &Connection,
        repo: &str,
        rel: &str,
    ) -> Result<Option<(ItemKind, u64, Option<String>)>, TransferError> {
        if rel.is_empty() {
            return Ok(Some((ItemKind::Folder, 0, None)));
        }
        let (path, name) = split_parent(rel);
        let row = conn
            .query_row(
                "SELECT kind, size, sha256 FROM items WHERE repo = ?1 AND path = ?2 AND name = ?3",
                params![repo, path, name],
                |row| {
                    let kind: String = row.get(0)?;
                    let size: i64 = row.get(1)?;
                    let sha: Option<String> = row.get(2)?;
                    Ok((kind, size, sha))
                },
            )
            .optional()?;
        Ok(row.map(|(kind, size, sha)| {
            let kind = if kind == "folder" { ItemKind::Folder } else { ItemKind::File };
            (kind, size.max(0) as u64, sha)
        }))
    }

    /// Record every ancestor folder of `rel_dir` (and `rel_dir` itself).
    fn ensure_folders(conn: &Connection, repo: &str, rel_dir: &str) -> Result<(), TransferError> {
        let mut acc = String::new();
        for seg in rel_dir.split('/').filter(|s| !s.is_empty()) {
            if !acc.is_empty() {
                acc.push('/');
            }
            acc.push_str(seg);
            let (path, name) = split_parent(&acc);
            conn.execute(
                "INSERT OR IGNORE INTO items (repo, path, name, kind, size, sha256, created)
                 VALUES (?1, ?2, ?3, 'folder', 0, NULL, ?4)",
                params![repo, path, name, now_stamp()],
            )?;
        }
        Ok(())
    }

    fn upsert_file(
        conn: &Connection,
        repo: &str,
        rel: &str,
        size: u64,
        sha256: &str,
    ) -> Result<(), TransferError> {
        let (path, name) = split_parent(rel);
        Self::ensure_folders(conn, repo, if path == "." { "" } else { &path })?;
        conn.execute(
            "INSERT OR REPLACE INTO items (repo, path, name, kind, size, sha256, created)
             VALUES (?1, ?2, ?3, 'file', ?4, ?5, ?6)",
            params![repo, path, name, size as i64, sha256.to_ascii_lowercase(), now_stamp()],
        )?;
        conn.execute(
            "DELETE FROM properties WHERE repo = ?1 AND path = ?2 AND name = ?3",
            params![repo, path, name],
        )?;
        Ok(())
    }

    /// Replace the values of each key present in `props`.
    fn put_props(
        conn: &Connection,
        repo: &str,
        rel: &str,
        props: &[(String, String)],
    ) -> Result<(), TransferError> {
        let (path, name) = split_parent(rel);
        let mut cleared: Vec<&str> = Vec::new();
        for (k, v) in props {
            if !cleared.contains(&k.as_str()) {
                conn.execute(
                    "DELETE FROM properties WHERE repo = ?1 AND path = ?2 AND name = ?3 AND key = ?4",
                    params![repo, path, name, k],
                )?;
                cleared.push(k);
            }
            conn.execute(
                "INSERT OR IGNORE INTO properties (repo, path, name, key, value)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![repo, path, name, k, v],
            )?;
        }
        Ok(())
    }

    fn props_of(
        conn: &Connection,
        repo: &str,
        rel: &str,
    ) -> Result<Vec<(String, String)>, TransferError> {
        let (path, name) = split_parent(rel);
        let mut stmt = conn.prepare(
            "SELECT key, value FROM properties WHERE repo = ?1 AND path = ?2 AND name = ?3
             ORDER BY key, value",
        )?;
        let rows = stmt.query_map(params![repo, path, name], |r| Ok((r.get(0)?, r.get(1)?)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Rel paths and kinds of `rel` and everything below it, parents first.
    fn subtree(
        conn: &Connection,
        repo: &str,
        rel: &str,
    ) -> Result<Vec<(String, ItemKind)>, TransferError> {
        let mut stmt = conn.prepare("SELECT path, name, kind FROM items WHERE repo = ?1")?;
        let rows = stmt.query_map(params![repo], |r| {
            let path: String = r.get(0)?;
            let name: String = r.get(1)?;
            let kind: String = r.get(2)?;
            Ok((path, name, kind))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (path, name, kind) = r?;
            let full = rel_of(&path, &name);
            if is_within(&full, rel) {
                let kind = if kind == "folder" { ItemKind::Folder } else { ItemKind::File };
                out.push((full, kind));
            }
        }
        out.sort_by(|a, b| {
            a.0.matches('/').count().cmp(&b.0.matches('/').count()).then_with(|| a.0.cmp(&b.0))
        });
        Ok(out)
    }

    fn remove_rows(conn: &Connection, repo: &str, rel: &str) -> Result<(), TransferError> {
        let (path, name) = split_parent(rel);
        conn.execute(
            "DELETE FROM items WHERE repo = ?1 AND path = ?2 AND name = ?3",
            params![repo, path, name],
        )?;
        conn.execute(
            "DELETE FROM properties WHERE repo = ?1 AND path = ?2 AND name = ?3",
            params![repo, path, name],
        )?;
        Ok(())
    }

    fn tmp_path_for(target: &Path) -> PathBuf {
        let name = target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let seq = TMP_SEQ.fetch_add(1, Ordering::SeqCst);
        target.with_file_name(format!(".{}.ap.part.{}.{}", name, std::process::id(), seq))
    }
}

impl RemoteIndex for LocalRepository {
    fn resolve(&self, query: &SearchQuery) -> Result<Vec<RepoItem>, TransferError> {
        if query.archive_entries.is_some() {
            return Err(TransferError::Unsupported(
                "archive entry search needs an http(s) server".to_string(),
            ));
        }
        let conn = self.lock()?;

        let mut props: HashMap<ItemKey, BTreeMap<String, Vec<String>>> = HashMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT repo, path, name, key, value FROM properties ORDER BY value")?;
            let rows = stmt.query_map([], |r| {
                Ok((
                    (r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?),
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })?;
            for r in rows {
                let (key, k, v) = r?;
                props.entry(key).or_default().entry(k).or_default().push(v);
            }
        }

        let mut stmt =
            conn.prepare("SELECT repo, path, name, kind, size, sha256, created FROM items")?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for r in rows {
            let (repo, path, name, kind, size, sha256, created) = r?;
            let kind = if kind == "folder" { ItemKind::Folder } else { ItemKind::File };
            if kind == ItemKind::Folder && !query.include_dirs {
                continue;
            }
            if !query.covers(&repo, &rel_of(&path, &name)) {
                continue;
            }
            let properties =
                props.remove(&(repo.clone(), path.clone(), name.clone())).unwrap_or_default();
            let has_all = query
                .props
                .iter()
                .all(|(k, v)| properties.get(k).is_some_and(|vals| vals.iter().any(|x| x == v)));
            if !has_all {
                continue;
            }
            out.push(RepoItem {
                repo,
                path,
                name,
                kind,
                size: size.max(0) as u64,
                sha256,
                created: created
                    .and_then(|c| DateTime::parse_from_rfc3339(&c).ok())
                    .map(|d| d.with_timezone(&Utc)),
                properties,
            });
        }
        out.sort_by_key(|i| i.full_path());
        tracing::debug!("[repo] index returned {} item(s)", out.len());
        Ok(out)
    }
}

impl TransferService for LocalRepository {
    fn fetch(&self, remote_path: &str) -> Result<Box<dyn Read + Send>, TransferError> {
        let (repo, rel) = locate(remote_path)?;
        {
            let conn = self.lock()?;
            match Self::lookup(&conn, &repo, &rel)? {
                None => return Err(TransferError::NotFound(remote_path.to_string())),
                Some((ItemKind::Folder, _, _)) => {
                    return Err(TransferError::InvalidSpec(format!(
                        "'{}' is a folder",
                        remote_path
                    )));
                }
                Some(_) => {}
            }
        }
        let disk = self.disk_path(&repo, &rel);
        let f = std::fs::File::open(&disk).map_err(|e| TransferError::filesystem(&disk, e))?;
        Ok(Box::new(BufReader::new(f)))
    }

    fn store(
        &self,
        remote_path: &str,
        body: Box<dyn Read + Send>,
        len: u64,
        sha256: &str,
        props: &[(String, String)],
    ) -> Result<(), TransferError> {
        let (repo, rel) = locate(remote_path)?;
        if rel.is_empty() {
            return Err(TransferError::InvalidSpec(format!(
                "'{}' names a repository, not a file",
                remote_path
            )));
        }
        let disk = self.disk_path(&repo, &rel);
        if let Some(parent) = disk.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TransferError::filesystem(parent, e))?;
        }
        let tmp = Self::tmp_path_for(&disk);
        let (written, actual) =
            copy_stream_with_cleanup(body, &tmp, 64 * 1024, |_| {}).map_err(|e| match e {
                StreamError::Read(e) => TransferError::Transport(format!("upload body: {}", e)),
                StreamError::Write(e) => TransferError::filesystem(&tmp, e),
            })?;
        if written != len {
            let _ = std::fs::remove_file(&tmp);
            return Err(TransferError::Transport(format!(
                "short upload for {}: {} of {} bytes",
                remote_path, written, len
            )));
        }
        if !actual.eq_ignore_ascii_case(sha256) {
            let _ = std::fs::remove_file(&tmp);
            return Err(TransferError::ChecksumMismatch {
                path: remote_path.to_string(),
                expected: sha256.to_ascii_lowercase(),
                actual,
            });
        }
        atomic_rename_with_retries(&tmp, &disk).map_err(|e| TransferError::filesystem(&disk, e))?;

        let conn = self.lock()?;
        Self::upsert_file(&conn, &repo, &rel, written, &actual)?;
        Self::put_props(&conn, &repo, &rel, props)?;
        Ok(())
    }

    fn create_dir(&self, remote_path: &str, props: &[(String, String)]) -> Result<(), TransferError> {
        let (repo, rel) = locate(remote_path)?;
        let disk = self.disk_path(&repo, &rel);
        std::fs::create_dir_all(&disk).map_err(|e| TransferError::filesystem(&disk, e))?;
        if rel.is_empty() {
            return Ok(());
        }
        let conn = self.lock()?;
        Self::ensure_folders(&conn, &repo, &rel)?;
        Self::put_props(&conn, &repo, &rel, props)
    }

    fn copy(&self, from: &str, to: &str) -> Result<(), TransferError> {
        let (src_repo, src_rel) = locate(from)?;
        let (dst_repo, dst_rel) = locate(to)?;
        let conn = self.lock()?;
        if Self::lookup(&conn, &src_repo, &src_rel)?.is_none() {
            return Err(TransferError::NotFound(from.to_string()));
        }
        for (rel, kind) in Self::subtree(&conn, &src_repo, &src_rel)? {
            let suffix = rel[src_rel.len()..].trim_start_matches('/');
            let new_rel = match (dst_rel.is_empty(), suffix.is_empty()) {
                (true, true) => split_parent(&rel).1,
                (true, false) => suffix.to_string(),
                (false, true) => dst_rel.clone(),
                (false, false) => format!("{}/{}", dst_rel, suffix),
            };
            let dst_disk = self.disk_path(&dst_repo, &new_rel);
            match kind {
                ItemKind::Folder => {
                    std::fs::create_dir_all(&dst_disk)
                        .map_err(|e| TransferError::filesystem(&dst_disk, e))?;
                    Self::ensure_folders(&conn, &dst_repo, &new_rel)?;
                }
                ItemKind::File => {
                    if let Some(parent) = dst_disk.parent() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| TransferError::filesystem(parent, e))?;
                    }
                    let src_disk = self.disk_path(&src_repo, &rel);
                    std::fs::copy(&src_disk, &dst_disk)
                        .map_err(|e| TransferError::filesystem(&src_disk, e))?;
                    let (_, size, sha) = Self::lookup(&conn, &src_repo, &rel)?
                        .ok_or_else(|| TransferError::NotFound(rel.clone()))?;
                    Self::upsert_file(&conn, &dst_repo, &new_rel, size, &sha.unwrap_or_default())?;
                }
            }
            let props = Self::props_of(&conn, &src_repo, &rel)?;
            Self::put_props(&conn, &dst_repo, &new_rel, &props)?;
        }
        Ok(())
    }

    fn move_item(&self, from: &str, to: &str) -> Result<(), TransferError> {
        self.copy(from, to)?;
        self.delete(from)
    }

    fn delete(&self, remote_path: &str) -> Result<(), TransferError> {
        let (repo, rel) = locate(remote_path)?;
        let conn = self.lock()?;
        let Some((kind, _, _)) = Self::lookup(&conn, &repo, &rel)? else {
            return Err(TransferError::NotFound(remote_path.to_string()));
        };
        let disk = self.disk_path(&repo, &rel);
        let res = match kind {
            ItemKind::Folder => std::fs::remove_dir_all(&disk),
            ItemKind::File => std::fs::remove_file(&disk),
        };
        if let Err(e) = res
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(TransferError::filesystem(&disk, e));
        }
        for (r, _) in Self::subtree(&conn, &repo, &rel)? {
            Self::remove_rows(&conn, &repo, &r)?;
        }
        Ok(())
    }

    fn set_properties(
        &self,
        remote_path: &str,
        props: &[(String, String)],
        recursive: bool,
    ) -> Result<(), TransferError> {
        let (repo, rel) = locate(remote_path)?;
        let conn = self.lock()?;
        if Self::lookup(&conn, &repo, &rel)?.is_none() {
            return Err(TransferError::NotFound(remote_path.to_string()));
        }
        let targets = if recursive {
            Self::subtree(&conn, &repo, &rel)?.into_iter().map(|(r, _)| r).collect()
        } else {
            vec![rel]
        };
        for r in targets.iter().filter(|r| !r.is_empty()) {
            Self::put_props(&conn, &repo, r, props)?;
        }
        Ok(())
    }

    fn delete_properties(
        &self,
        remote_path: &str,
        keys: &[String],
        recursive: bool,
    ) -> Result<(), TransferError> {
        let (repo, rel) = locate(remote_path)?;
        let conn = self.lock()?;
        if Self::lookup(&conn, &repo, &rel)?.is_none() {
            return Err(TransferError::NotFound(remote_path.to_string()));
        }
        let targets = if recursive {
            Self::subtree(&conn, &repo, &rel)?.into_iter().map(|(r, _)| r).collect()
        } else {
            vec![rel]
        };
        for r in &targets {
            let (path, name) = split_parent(r);
            for k in keys {
                conn.execute(
                    "DELETE FROM properties WHERE repo = ?1 AND path = ?2 AND name = ?3 AND key = ?4",
                    params![repo, path, name, k],
                )?;
            }
        }
        Ok(())
    }
}

impl BuildInfoService for LocalRepository {
    fn build_snapshot(
        &self,
        name: &str,
        number: &BuildNumber,
    ) -> Result<BuildSnapshot, TransferError> {
        let conn = self.lock()?;
        let row: Option<String> = match number {
            BuildNumber::Latest => conn
                .query_row(
                    "SELECT info FROM builds WHERE name = ?1 ORDER BY started DESC, number DESC LIMIT 1",
                    params![name],
                    |r| r.get(0),
                )
                .optional()?,
            BuildNumber::Number(n) => conn
                .query_row(
                    "SELECT info FROM builds WHERE name = ?1 AND number = ?2",
                    params![name, n],
                    |r| r.get(0),
                )
                .optional()?,
        };
        let Some(text) = row else {
            return Err(TransferError::BuildNotFound {
                name: name.to_string(),
                number: number.to_string(),
            });
        };
        let info: BuildInfo = serde_json::from_str(&text)
            .map_err(|e| TransferError::Transport(format!("corrupt build-info {}: {}", name, e)))?;
        Ok(BuildSnapshot {
            name: info.name.clone(),
            number: info.number.clone(),
            started: info.started_at(),
            checksums: info.checksums(),
        })
    }

    fn publish_build(&self, info: &BuildInfo) -> Result<(), TransferError> {
        let text = serde_json::to_string(info)
            .map_err(|e| TransferError::InvalidSpec(format!("build-info: {}", e)))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO builds (name, number, started, info) VALUES (?1, ?2, ?3, ?4)",
            params![info.name, info.number, info.started, text],
        )?;
        Ok(())
    }
}
