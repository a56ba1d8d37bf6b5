//! Replica configuration.
//!
//! Configuration is plain serde data, loaded from JSON. Missing fields take
//! their defaults, so an empty object is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::change::ReplicaId;

/// The current configuration format version.
const CONFIG_VERSION: u8 = 0;

fn is_v0(v: &u8) -> bool {
    *v == 0
}

fn validate_config_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != CONFIG_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported config version {version}; only version {CONFIG_VERSION} is supported"
        )));
    }
    Ok(version)
}

/// Errors raised while loading configuration.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {source}")]
    FileIo {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn is_io_error(&self) -> bool {
        matches!(self, ConfigError::FileIo { .. })
    }
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err)
    }
}

/// Settings for a single replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    #[serde(
        rename = "_v",
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_config_version"
    )]
    version: u8,
    /// Fixed replica id. A random one is drawn when absent.
    pub replica_id: Option<u64>,
    /// Check local mutations against the permission table before logging
    /// them. Peers check every change regardless.
    pub enforce_local_permissions: bool,
    /// Upper bound on changes returned by one poll. `None` means unbounded.
    pub max_batch_size: Option<usize>,
    /// Compact the change log whenever a peer acknowledges a frontier.
    pub auto_compact: bool,
    /// Run the index invariant check after every committed batch.
    pub validate_after_commit: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            replica_id: None,
            enforce_local_permissions: true,
            max_batch_size: None,
            auto_compact: false,
            validate_after_commit: cfg!(debug_assertions),
        }
    }
}

impl ReplicaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replica_id(mut self, id: ReplicaId) -> Self {
        self.replica_id = Some(id.get());
        self
    }

    pub fn with_local_permissions(mut self, enforce: bool) -> Self {
        self.enforce_local_permissions = enforce;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max);
        self
    }

    pub fn with_auto_compact(mut self, enabled: bool) -> Self {
        self.auto_compact = enabled;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.as_ref().display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::FileIo { source }),
        }
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse { source })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.replica_id == Some(0) {
            return Err(ConfigError::Invalid {
                reason: "replica_id must be non-zero".into(),
            });
        }
        if self.max_batch_size == Some(0) {
            return Err(ConfigError::Invalid {
                reason: "max_batch_size must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// The configured replica id, or a fresh random one.
    pub fn resolve_replica_id(&self) -> Result<ReplicaId, ConfigError> {
        match self.replica_id {
            None => Ok(ReplicaId::random()),
            Some(id) => ReplicaId::new(id).ok_or_else(|| ConfigError::Invalid {
                reason: "replica_id must be non-zero".into(),
            }),
        }
    }
}
