//! Configuration for the git binary, the reader cache and commit parsing, loadable from TOML.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::internal::errors::GitError;

/// Commit messages are stored up to 10 KiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub git: GitConfig,
    pub cache: CacheConfig,
    pub commit: CommitConfig,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, GitError> {
        let config: Config =
            toml::from_str(content).map_err(|e| GitError::InvalidConfig(e.to_string()))?;
        config.cache.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GitError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            GitError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Path or name of the git executable.
    pub binary: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }
}

/// Limits of the idle reader pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Distinct repositories with idle readers.
    pub max_keys: usize,
    /// Idle readers kept for one repository.
    pub max_per_key: usize,
    pub ttl_secs: u64,
    pub monitor_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_keys: 100,
            max_per_key: 4,
            ttl_secs: 10,
            monitor_interval_ms: 1_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn validate(&self) -> Result<(), GitError> {
        if self.max_keys == 0 {
            return Err(GitError::InvalidConfig("cache.max_keys must be positive".into()));
        }
        if self.max_per_key == 0 {
            return Err(GitError::InvalidConfig(
                "cache.max_per_key must be positive".into(),
            ));
        }
        if self.monitor_interval_ms == 0 {
            return Err(GitError::InvalidConfig(
                "cache.monitor_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Bodies longer than this are truncated; `body_size` keeps the real length.
    pub max_body_size: usize,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}
