//! # memo-config
//!
//! Configuration management for memo.
//!
//! Loads configuration from:
//! 1. `~/.memo/config.toml` (global)
//! 2. `<project>/.memo/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! There is no process-wide config instance: callers load a [`Config`] and
//! pass it (or values derived from it) into every operation.

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding project-local state (config, cache, pipeline lock).
pub const PROJECT_DIR: &str = ".memo";

/// Environment variable overriding `cache.dir`.
pub const ENV_CACHE_DIR: &str = "MEMO_CACHE_DIR";

/// Environment variable overriding `core.remote`.
pub const ENV_REMOTE: &str = "MEMO_REMOTE";

/// Environment variable setting the `memo.lock` wait, in seconds.
pub const ENV_LOCK_TIMEOUT: &str = "MEMO_LOCK_TIMEOUT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("remote '{0}' is not configured")]
    UnknownRemote(String),
    #[error("no default remote configured (set core.remote or pass --remote)")]
    NoDefaultRemote,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub cache: CacheConfig,
    pub run_cache: RunCacheConfig,
    pub progress: ProgressConfig,
    pub remote: BTreeMap<String, RemoteConfig>,
}

impl Config {
    /// Load config from the standard locations for `project_root`.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_layers(global.as_deref(), project_root)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load the file layers only (no environment overrides).
    pub fn load_layers(global: Option<&Path>, project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(global_path)?;
            }
        }

        let project_path = Self::project_config_path(project_root);
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::from_file(&project_path)?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Parse a single TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.memo/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(PROJECT_DIR).join("config.toml"))
    }

    /// Project config path: <root>/.memo/config.toml
    pub fn project_config_path(project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_DIR).join("config.toml")
    }

    /// Merge another config on top of this one.
    ///
    /// Fields left at their default value in `other` do not override.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.core.remote.is_some() {
            self.core.remote = other.core.remote;
        }
        if other.cache.dir != defaults.cache.dir {
            self.cache.dir = other.cache.dir;
        }
        if !other.cache.link_types.is_empty() {
            self.cache.link_types = other.cache.link_types;
        }
        if other.cache.hardlink != defaults.cache.hardlink {
            self.cache.hardlink = other.cache.hardlink;
        }
        if other.run_cache != defaults.run_cache {
            self.run_cache = other.run_cache;
        }
        if other.progress != defaults.progress {
            self.progress = other.progress;
        }
        self.remote.extend(other.remote);
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|s| !s.trim().is_empty()) {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(remote) = lookup(ENV_REMOTE).filter(|s| !s.trim().is_empty()) {
            self.core.remote = Some(remote);
        }
    }

    /// Resolve the local cache directory against `project_root`.
    pub fn cache_dir(&self, project_root: &Path) -> PathBuf {
        path::resolve(project_root, &self.cache.dir)
    }

    /// Look up a remote by name, falling back to `core.remote`.
    pub fn remote(&self, name: Option<&str>) -> Result<(&str, &RemoteConfig), ConfigError> {
        let name = match name.or(self.core.remote.as_deref()) {
            Some(n) => n,
            None => return Err(ConfigError::NoDefaultRemote),
        };
        self.remote
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownRemote(name.to_string()))
    }

    /// Serialize to a TOML string
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }
}

/// Repository-wide settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Default remote name used by push/pull and `run --pull`
    pub remote: Option<String>,
}

/// Local object cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Object cache root; relative paths resolve against the project root
    pub dir: PathBuf,
    /// Explicit link chain (`reflink`, `hardlink`, `symlink`, `copy`)
    #[serde(rename = "type")]
    pub link_types: Vec<String>,
    /// Use the default chain with hardlink enabled
    pub hardlink: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(PROJECT_DIR).join("cache"),
            link_types: Vec::new(),
            hardlink: false,
        }
    }
}

/// Run-cache behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunCacheConfig {
    /// Allow restore to consult the run-cache
    pub enabled: bool,
    /// Pull referenced objects from the default remote during restore
    pub pull: bool,
}

impl Default for RunCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pull: false,
        }
    }
}

/// Progress bar settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub enabled: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// A named remote object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Location of the remote store. `memory://` selects an in-process store.
    pub url: String,
}
