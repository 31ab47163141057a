//! # Store Configuration
//!
//! Loaded from TOML. Every key is optional:
//!
//! ```toml
//! data_root = "target/lexis"
//! database_file = "lexis.redb"
//! backend = "file"            # or "in-memory"
//! rebuild_citations_on_open = false
//! ```
//!
//! `LEXIS_DATA_ROOT` in the environment overrides `data_root`.

use crate::types::LexisError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides `data_root`.
pub const DATA_ROOT_ENV: &str = "LEXIS_DATA_ROOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// A redb file under `data_root`.
    #[default]
    File,
    /// A redb in-memory backend; nothing survives the process.
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_root: PathBuf,
    pub database_file: String,
    pub backend: BackendKind,
    /// Clear and replay both citation partitions after opening.
    pub rebuild_citations_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("target/lexis"),
            database_file: "lexis.redb".to_string(),
            backend: BackendKind::File,
            rebuild_citations_on_open: false,
        }
    }
}

impl StoreConfig {
    /// A file-backed config rooted at `data_root`.
    #[must_use]
    pub fn at(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::InMemory,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, LexisError> {
        toml::from_str(text).map_err(|e| LexisError::ConfigError(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LexisError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LexisError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Apply `LEXIS_DATA_ROOT` if it is set and non-empty.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_data_root_override(std::env::var(DATA_ROOT_ENV).ok())
    }

    fn with_data_root_override(mut self, value: Option<String>) -> Self {
        if let Some(root) = value.filter(|v| !v.trim().is_empty()) {
            self.data_root = PathBuf::from(root);
        }
        self
    }

    /// Full path of the database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_root.join(&self.database_file)
    }
}
