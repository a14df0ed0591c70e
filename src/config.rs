use anyhow::{Context, Result};
use facepick_match::MatchPolicy;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(p) = option_env!("FACEPICK_CONFIG_PATH") {
        return PathBuf::from(p);
    }
    directories::ProjectDirs::from("", "", "facepick")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("facepick.toml"))
});

pub static STORE_PREFIX: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(p) = option_env!("FACEPICK_STORE_PREFIX") {
        return PathBuf::from(p);
    }
    directories::ProjectDirs::from("", "", "facepick")
        .map(|dirs| dirs.data_dir().join("references"))
        .unwrap_or_else(|| PathBuf::from("references"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedding engine invocation, program first (for example
    /// `["python3", "scripts/face_processor.py"]`).
    pub engine_command: Vec<String>,
    /// Per engine call; expired calls count as failures, not hangs.
    pub engine_timeout_secs: u64,
    /// Concurrent archive images in flight.
    pub workers: usize,
    /// Extraction attempts per image before it is skipped for the run.
    pub attempts: u32,
    /// Best-N size for the archive flow.
    pub best_limit: usize,
    /// Best-N size for the direct pool-comparison flow.
    pub pool_limit: usize,
    pub policy: MatchPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_command: vec![],
            engine_timeout_secs: 30,
            workers: 4,
            attempts: 3,
            best_limit: 10,
            pool_limit: 5,
            policy: MatchPolicy::default(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
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
