use anyhow::{Context, Result};
use directories::ProjectDirs;
use faceid_core::MatchConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    PathBuf::from(option_env!("FACEID_CONFIG_PATH").unwrap_or("/usr/local/etc/faceid/config.toml"))
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEID_DATA_DIR") {
    Some(dir) => PathBuf::from(dir),
    None => ProjectDirs::from("", "", "faceid")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/usr/local/var/faceid")),
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overrides [`DATA_DIR`] for the registry and journal files.
    pub data_dir: Option<PathBuf>,
    /// Append every decision to the recognition journal.
    pub journal: bool,
    /// Journal entries kept before the oldest are dropped; 0 keeps all.
    pub journal_limit: usize,
    pub matching: MatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            journal: true,
            journal_limit: 10_000,
            matching: MatchConfig::default(),
        }
    }
}

impl Config {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| DATA_DIR.clone())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.matching
        .validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
