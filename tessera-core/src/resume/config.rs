//! Configuration for the serializer and the bootstrap.
//!
//! Both structs deserialize from camelCase JSON with every field optional, so
//! a host can ship `{}` and get the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::snapshot::VersionStrategy;
use crate::error::ConfigError;

/// Default ceiling on the encoded snapshot size: 1 MiB.
pub const DEFAULT_MAX_SNAPSHOT_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SerializerConfig {
    /// When false, nothing is registered and captures are empty.
    pub enabled: bool,
    /// Include each computed's derivation source in the snapshot.
    pub serialize_functions: bool,
    /// Encoded size above which a warning is logged. Not a hard limit.
    pub max_snapshot_size: usize,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            serialize_functions: false,
            max_snapshot_size: DEFAULT_MAX_SNAPSHOT_SIZE,
        }
    }
}

impl SerializerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// On failure, report a degraded success so the caller falls back to a
    /// full hydration.
    pub fallback_to_hydration: bool,
    /// Deadline for the whole resume pipeline.
    pub timeout_ms: Option<u64>,
    pub version_strategy: VersionStrategy,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            fallback_to_hydration: true,
            timeout_ms: None,
            version_strategy: VersionStrategy::Compatible,
        }
    }
}

impl BootstrapConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
