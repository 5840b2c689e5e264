//! Configuration loading and validation.
//!
//! Settings are layered with [`figment`], later layers winning:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. an optional configuration file (TOML, YAML or JSON, picked by extension),
//! 3. environment variables prefixed with `TANKO_`, using `__` to separate
//!    nested keys (e.g. `TANKO_SYNC__STALENESS_SECS=3600`).
//!
//! ```toml
//! [database]
//! path = "/var/lib/tanko/cache.sqlite"
//!
//! [sync]
//! staleness_secs = 432000
//! hide_empty_chapters = true
//!
//! [pages]
//! window_size = 10
//!
//! [sources.shelf]
//! kind = "local"
//! root = "/srv/manga"
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "TANKO_";
/// Five days: how long a synced chapter list is trusted before refetching.
pub const DEFAULT_STALENESS_SECS: u64 = 5 * 24 * 60 * 60;
/// Number of pages fetched together in one window.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "tanko", "tanko")
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub pages: PagesConfig,
    /// Content sources, keyed by source identifier.
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Location of the SQLite cache database.
    pub path: PathBuf,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = project_dirs()
            .map(|dirs| dirs.data_dir().join("cache.sqlite"))
            .unwrap_or_else(|| PathBuf::from("tanko.sqlite"));
        Self { path }
    }
}

/// Chapter list synchronization policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum age (in seconds) of the last successful sync before a remote
    /// refetch is attempted automatically.
    pub staleness_secs: u64,
    /// Drop chapters without any pages from merged chapter lists.
    pub hide_empty_chapters: bool,
}
impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staleness_secs: DEFAULT_STALENESS_SECS,
            hide_empty_chapters: false,
        }
    }
}

/// Page loading policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesConfig {
    pub window_size: usize,
}
impl Default for PagesConfig {
    fn default() -> Self {
        Self { window_size: DEFAULT_WINDOW_SIZE }
    }
}

/// A configured content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Chapters served from a directory tree on the local filesystem.
    Local { root: PathBuf },
}

impl Config {
    /// Default location of the configuration file, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// The layered [`Figment`] that [`load`](Self::load) extracts from.
    ///
    /// An explicitly given file must exist; its format is chosen by extension
    /// and falls back to TOML.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => figment.merge(Toml::file_exact(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration.
    #[instrument]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(file).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(sources = config.sources.len(), "Configuration loaded");
        Ok(config)
    }

    /// Load from [`default_path`](Self::default_path) when that file exists,
    /// otherwise from defaults and the environment only.
    pub fn load_default() -> Result<Self> {
        match Self::default_path().filter(|path| path.is_file()) {
            Some(path) => Self::load(Some(&path)),
            None => Self::load(None),
        }
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.pages.window_size == 0 {
            exn::bail!(ErrorKind::Invalid {
                key: "pages.window_size".to_string(),
                reason: "must be greater than zero",
            });
        }
        for (id, source) in &self.sources {
            if id.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid {
                    key: "sources".to_string(),
                    reason: "source identifiers cannot be blank",
                });
            }
            match source {
                SourceConfig::Local { root } if !root.is_absolute() => exn::bail!(ErrorKind::Invalid {
                    key: format!("sources.{id}.root"),
                    reason: "must be an absolute path",
                }),
                SourceConfig::Local { .. } => {},
            }
        }
        Ok(())
    }
}
