//! Configuration module for storage backend selection and engine settings
//!
//! This module provides the configuration structures consumed by the snapshot
//! facade: which storage driver to use, how subjects are serialized, how long
//! snapshots are retained and which lifecycle events trigger automatic capture.

use crate::record::LifecycleEvent;
use crate::serialize::SerializeOptions;
use crate::{ChronicleError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Enumeration of supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local storage, gone when the process exits
    #[default]
    Memory,
    /// One JSON file per snapshot under a directory
    File,
    /// SQLite database file
    Sqlite,
}

/// Configuration structure for storage backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// The storage backend to use
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory (file backend) or database file (sqlite backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Create a configuration for in-memory storage
    pub fn memory() -> Self {
        StorageConfig {
            backend: StorageBackend::Memory,
            path: None,
        }
    }

    /// Create a configuration for file storage rooted at `dir`
    pub fn file<P: Into<PathBuf>>(dir: P) -> Self {
        StorageConfig {
            backend: StorageBackend::File,
            path: Some(dir.into()),
        }
    }

    /// Create a configuration for a SQLite database at `path`
    pub fn sqlite<P: Into<PathBuf>>(path: P) -> Self {
        StorageConfig {
            backend: StorageBackend::Sqlite,
            path: Some(path.into()),
        }
    }

    /// Parse a storage URI and create the matching configuration
    ///
    /// Supports formats:
    /// - `memory://` for in-memory storage
    /// - `sqlite:///path/to/db.sqlite` or `sqlite://relative.db`
    /// - `file:///path/to/dir`
    /// - `/local/path` or `./relative/path` for file storage
    pub fn from_uri(uri: &str) -> Result<StorageConfig> {
        if let Some(rest) = uri.strip_prefix("memory://") {
            if !rest.is_empty() {
                return Err(ChronicleError::validation(format!(
                    "Invalid memory URI: unexpected path '{rest}'"
                )));
            }
            Ok(StorageConfig::memory())
        } else if let Some(path) = uri.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(ChronicleError::validation(
                    "Invalid sqlite URI: missing database path",
                ));
            }
            Ok(StorageConfig::sqlite(path))
        } else if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(ChronicleError::validation(
                    "Invalid file URI: missing directory",
                ));
            }
            Ok(StorageConfig::file(path))
        } else if uri.contains("://") {
            Err(ChronicleError::validation(format!(
                "Unsupported storage URI scheme: {uri}"
            )))
        } else if uri.is_empty() {
            Err(ChronicleError::validation("Storage URI cannot be empty"))
        } else {
            Ok(StorageConfig::file(uri))
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            StorageBackend::Memory => {}
            StorageBackend::File | StorageBackend::Sqlite => {
                let missing = self
                    .path
                    .as_ref()
                    .map_or(true, |p| p.as_os_str().is_empty());
                if missing {
                    return Err(ChronicleError::validation(format!(
                        "{:?} backend requires a path",
                        self.backend
                    )));
                }
            }
        }
        Ok(())
    }
}

/// How long snapshots are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days: 30,
        }
    }
}

impl RetentionConfig {
    pub fn days(days: u32) -> Self {
        Self {
            enabled: true,
            days,
        }
    }

    /// Records created before this instant are expired, or `None` when
    /// retention is disabled.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.enabled
            .then(|| now - Duration::days(i64::from(self.days)))
    }
}

/// Which lifecycle events capture a snapshot, per subject type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomaticCaptureConfig {
    pub enabled: bool,
    pub types: HashMap<String, Vec<LifecycleEvent>>,
}

impl Default for AutomaticCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            types: HashMap::new(),
        }
    }
}

impl AutomaticCaptureConfig {
    /// Enable automatic capture of `events` for `subject_type`
    pub fn track<S: Into<String>>(mut self, subject_type: S, events: &[LifecycleEvent]) -> Self {
        self.types.insert(subject_type.into(), events.to_vec());
        self
    }

    /// True if `event` on a subject of `subject_type` should be captured
    pub fn should_capture(&self, subject_type: &str, event: LifecycleEvent) -> bool {
        self.enabled
            && self
                .types
                .get(subject_type)
                .is_some_and(|events| events.contains(&event))
    }
}

/// Top-level configuration for a snapshot manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChronicleConfig {
    pub storage: StorageConfig,
    pub serialization: SerializeOptions,
    pub retention: RetentionConfig,
    pub automatic_capture: AutomaticCaptureConfig,
}

impl ChronicleConfig {
    /// Parse a configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ChronicleError::validation(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ChronicleError::validation(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_serialization(mut self, serialization: SerializeOptions) -> Self {
        self.serialization = serialization;
        self
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_automatic_capture(mut self, automatic_capture: AutomaticCaptureConfig) -> Self {
        self.automatic_capture = automatic_capture;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        if self.retention.enabled && self.retention.days == 0 {
            return Err(ChronicleError::validation(
                "retention.days must be at least 1 when retention is enabled",
            ));
        }
        Ok(())
    }
}
