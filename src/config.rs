//! Runtime configuration: judge limits, storage location, catalog source.
//!
//! Values start from the defaults below, are replaced by the YAML file named
//! in `CODE_MASTER_CONFIG` when present, and finally by single-value
//! environment overrides.

use crate::error::ConfigError;
use crate::model::Difficulty;
use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "CODE_MASTER_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub beginner_timeout_ms: u64,
    pub intermediate_timeout_ms: u64,
    pub pro_timeout_ms: u64,
    /// Wall-clock budget for a whole submission, all tests included.
    pub submission_budget_ms: u64,
    pub max_output_bytes: usize,
    pub python: Option<String>,
    pub node: Option<String>,
    /// When set, every language is evaluated by the judge server at this URL.
    pub remote_endpoint: Option<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            beginner_timeout_ms: 2_000,
            intermediate_timeout_ms: 3_000,
            pro_timeout_ms: 5_000,
            submission_budget_ms: 15_000,
            max_output_bytes: 64 * 1024,
            python: None,
            node: None,
            remote_endpoint: None,
        }
    }
}

impl JudgeConfig {
    pub fn test_timeout(&self, difficulty: Difficulty) -> Duration {
        let ms = match difficulty {
            Difficulty::Beginner => self.beginner_timeout_ms,
            Difficulty::Intermediate => self.intermediate_timeout_ms,
            Difficulty::Pro => self.pro_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn submission_budget(&self) -> Duration {
        Duration::from_millis(self.submission_budget_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub judge: JudgeConfig,
    pub storage_dir: PathBuf,
    /// External question bank; the embedded one is used when absent.
    pub catalog_path: Option<PathBuf>,
    pub bind: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            judge: JudgeConfig::default(),
            storage_dir: PathBuf::from("code_master_progress"),
            catalog_path: None,
            bind: "0.0.0.0:8787".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(lookup);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = non_empty(lookup("CODE_MASTER_BIND")) {
            self.bind = bind;
        }
        if let Some(endpoint) = non_empty(lookup("CODE_MASTER_JUDGE_ENDPOINT")) {
            self.judge.remote_endpoint = Some(endpoint);
        }
        if let Some(dir) = non_empty(lookup("CODE_MASTER_STORAGE_DIR")) {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(catalog) = non_empty(lookup("CODE_MASTER_CATALOG")) {
            self.catalog_path = Some(PathBuf::from(catalog));
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
