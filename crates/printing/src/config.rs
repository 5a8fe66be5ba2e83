use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::units::{Anchor, LogicalUnit};

const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read session config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse session config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize session config {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write session config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// When settings are pushed back to a live job handle between pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResyncPolicy {
    /// Reset the handle only when settings changed since the last page.
    #[default]
    Lazy,
    /// Reset the handle at every page boundary.
    Eager,
}

/// Per-session behaviour knobs.
/// 工作階段的行為設定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub resync: ResyncPolicy,
    #[serde(default)]
    pub logical_unit: LogicalUnit,
    #[serde(default)]
    pub anchor: Anchor,
    /// Device opened when none is named explicitly.
    #[serde(default)]
    pub default_device: Option<String>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            resync: ResyncPolicy::default(),
            logical_unit: LogicalUnit::default(),
            anchor: Anchor::default(),
            default_device: None,
        }
    }
}

impl SessionConfig {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = CONFIG_VERSION;
        }
        if let Some(name) = self.default_device.as_mut() {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                self.default_device = None;
            } else if trimmed.len() != name.len() {
                *name = trimmed.to_string();
            }
        }
    }
}

/// JSON-backed persistence for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigStore {
    path: PathBuf,
    data: SessionConfig,
}

impl SessionConfigStore {
    pub fn new(path: impl Into<PathBuf>, config: SessionConfig) -> Self {
        Self {
            path: path.into(),
            data: config,
        }
    }

    /// Loads the config, falling back to defaults when the file is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut data = SessionConfig::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: SessionConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.data
    }

    pub fn update<F>(&mut self, op: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut SessionConfig),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload =
            serde_json::to_string_pretty(&self.data).map_err(|source| ConfigError::Serialize {
                path: self.path.clone(),
                source,
            })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| ConfigError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
