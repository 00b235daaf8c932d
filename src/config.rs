//! Service configuration loaded from TOML.
//!
//! ```toml
//! location = "data/graph.json"
//! version = "1.2.0"
//! log_filter = "penumbra=debug"
//!
//! [[types]]
//! name = "Person"
//!
//! [[types.fields]]
//! name = "name"
//! type = "string"
//! required = true
//! unique = true
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patch::UNDEFINED_VERSION;
use crate::schema::{Namespace, TypeDescriptor};

/// Environment variable overriding the configured application version.
pub const VERSION_ENV: &str = "PENUMBRA_VERSION";

/// Namespace name used for types declared in the configuration file.
pub const CONFIG_NAMESPACE: &str = "config";

/// Service settings, loaded from TOML or built in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Snapshot file of the embedded graph. `None` keeps the graph in memory.
    pub location: Option<PathBuf>,
    /// Application version the stored graph is patched up to.
    pub version: String,
    /// Fallback `tracing` filter when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Entity types declared in configuration rather than code.
    pub types: Vec<TypeDescriptor>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            location: None,
            version: UNDEFINED_VERSION.to_owned(),
            log_filter: "penumbra=info".to_owned(),
            types: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// In-memory configuration pinned to `version`, mostly for tests.
    pub fn in_memory(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    /// Persists the graph to a JSON snapshot at `location`.
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Reads a configuration file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: ServiceConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(parent) = path.parent() {
            if let Some(location) = config.location.as_mut() {
                if location.is_relative() {
                    *location = parent.join(&*location);
                }
            }
        }
        config.apply_env();
        Ok(config)
    }

    /// Loads `explicit` or the default path; falls back to defaults when
    /// neither exists.
    pub fn load_or_default(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(&path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => {
                    let mut config = Self::default();
                    config.apply_env();
                    Ok(config)
                }
            },
        }
    }

    fn apply_env(&mut self) {
        if let Ok(version) = env::var(VERSION_ENV) {
            if !version.trim().is_empty() {
                self.version = version.trim().to_owned();
            }
        }
    }

    /// Declared types bundled as a namespace, if any were configured.
    pub fn namespace(&self) -> Option<Namespace> {
        if self.types.is_empty() {
            return None;
        }
        let mut namespace = Namespace::new(CONFIG_NAMESPACE);
        for ty in &self.types {
            namespace = namespace.with_type(ty.clone());
        }
        Some(namespace)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }
}

/// Failure to load or save a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid configuration TOML.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Configuration file.
        path: PathBuf,
        /// Parser error.
        source: toml::de::Error,
    },
    /// The configuration could not be written as TOML.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Serializer error.
        source: toml::ser::Error,
    },
}

/// `penumbra/service.toml` under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("penumbra").join("service.toml"))
}
