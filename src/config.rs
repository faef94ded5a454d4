use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;

const CONFIG_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub server_file_path: PathBuf,
    #[serde(default)]
    pub default_server: Option<String>,
    /// Worker threads; `None` lets the tool choose from the workload.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_retries")]
    pub retries: usize,
    pub version: Option<u32>,
    #[serde(skip)]
    home: PathBuf,
}

fn default_retries() -> usize {
    3
}

impl Config {
    /// Config rooted at `home` (normally `~/.artipilot`, or `$ARTIPILOT_HOME`).
    pub fn with_home<P: AsRef<Path>>(home: P) -> Self {
        let home = home.as_ref().to_path_buf();
        Config {
            server_file_path: home.join("server.db"),
            default_server: None,
            threads: None,
            retries: default_retries(),
            version: Some(CONFIG_VERSION),
            home,
        }
    }

    pub fn init() -> Result<Self> {
        let home = match std::env::var_os("ARTIPILOT_HOME") {
            Some(h) if !h.is_empty() => PathBuf::from(h),
            _ => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("cannot find user's home dir"))?
                .join(".".to_owned() + env!("CARGO_PKG_NAME")),
        };
        Self::load_or_create(&home)
    }

    pub fn load_or_create(home: &Path) -> Result<Self> {
        if !home.exists() {
            std::fs::create_dir_all(home)
                .with_context(|| format!("cannot create config dir {}", home.display()))?;
        }
        let config_path = home.join("config.json");
        let mut config = if config_path.exists() {
            Config::read_from::<Config, _>(&config_path)?
        } else {
            let config = Config::with_home(home);
            config.save_to(&config_path)?;
            config
        };
        config.home = home.to_path_buf();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(self.home.join("config.json"))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.home.join("builds")
    }
}

pub(crate) trait StorageObject {
    fn pretty_json(&self) -> Result<String>;
    fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()>
    where
        Self: Serialize;
    fn read_from<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T>;
}

impl<T: Serialize> StorageObject for T {
    fn pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialization failed")
    }

    fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.pretty_json()?)
            .with_context(|| format!("cannot write {}", path.display()))
    }

    fn read_from<R: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<R> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str::<R>(&text).with_context(|| format!("cannot parse {}", path.display()))
    }
}
