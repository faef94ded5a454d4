use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StorageObject;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub name: String,
    pub number: String,
    pub started: String,
    #[serde(default)]
    pub modules: Vec<BuildModule>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BuildModule {
    pub id: String,
    #[serde(default)]
    pub artifacts: Vec<BuildArtifact>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BuildArtifact {
    pub name: String,
    pub path: String,
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
}

impl BuildInfo {
    pub fn new(name: &str, number: &str) -> Self {
        BuildInfo {
            name: name.to_string(),
            number: number.to_string(),
            started: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            modules: Vec::new(),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.started).ok().map(|d| d.with_timezone(&Utc))
    }

    /// Value of the `build.timestamp` property tagged on uploaded artifacts.
    pub fn timestamp_millis(&self) -> String {
        self.started_at().map(|d| d.timestamp_millis().to_string()).unwrap_or_default()
    }

    pub fn checksums(&self) -> BTreeSet<String> {
        self.modules
            .iter()
            .flat_map(|m| m.artifacts.iter())
            .map(|a| a.sha256.to_ascii_lowercase())
            .collect()
    }

    /// Add artifacts to `module_id`; an artifact already recorded at the same
    /// path is replaced.
    pub fn add_artifacts(&mut self, module_id: &str, artifacts: Vec<BuildArtifact>) {
        let idx = match self.modules.iter().position(|m| m.id == module_id) {
            Some(i) => i,
            None => {
                self.modules.push(BuildModule { id: module_id.to_string(), artifacts: Vec::new() });
                self.modules.len() - 1
            }
        };
        let module = &mut self.modules[idx];
        for a in artifacts {
            module.artifacts.retain(|existing| existing.path != a.path);
            module.artifacts.push(a);
        }
    }
}

/// Unpublished build-info documents kept under `<config dir>/builds/<name>/<number>.json`.
pub struct BuildDrafts {
    dir: PathBuf,
}

impl BuildDrafts {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn draft_path(&self, name: &str, number: &str) -> PathBuf {
        let safe = |s: &str| s.replace(['/', '\\', ':'], "_");
        self.dir.join(safe(name)).join(format!("{}.json", safe(number)))
    }

    pub fn load(&self, name: &str, number: &str) -> Result<Option<BuildInfo>> {
        let path = self.draft_path(name, number);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read build draft {}", path.display()))?;
        let info = serde_json::from_str(&text)
            .with_context(|| format!("corrupt build draft {}", path.display()))?;
        Ok(Some(info))
    }

    pub fn load_or_create(&self, name: &str, number: &str) -> Result<BuildInfo> {
        Ok(self.load(name, number)?.unwrap_or_else(|| BuildInfo::new(name, number)))
    }

    pub fn save(&self, info: &BuildInfo) -> Result<PathBuf> {
        let path = self.draft_path(&info.name, &info.number);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        info.save_to(&path)?;
        Ok(path)
    }

    pub fn remove(&self, name: &str, number: &str) -> Result<()> {
        let path = self.draft_path(name, number);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("cannot remove build draft {}", path.display()))?;
        }
        Ok(())
    }
}
