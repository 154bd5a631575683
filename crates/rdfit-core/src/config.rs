//! Runtime configuration.

use crate::error::RdfItError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Tuning knobs of an [`Rit`](crate::Rit) context.
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdfItConfig {
    /// Records buffered between a background parser and its consumer.
    pub queue_capacity: usize,
    /// Upper bound on concurrently running background parses.
    pub max_workers: usize,
    /// How long an idle worker thread lingers, in milliseconds.
    pub worker_keep_alive_ms: u64,
    /// Normalization rounds after which a source is considered cyclic.
    pub max_normalization_rounds: usize,
}

impl Default for RdfItConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_workers: 64,
            worker_keep_alive_ms: 10_000,
            max_normalization_rounds: 32,
        }
    }
}

impl RdfItConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.worker_keep_alive_ms)
    }

    /// Reject values that would deadlock or disable the engine.
    pub fn validate(&self) -> Result<(), RdfItError> {
        if self.queue_capacity == 0 {
            return Err(RdfItError::Config("queue_capacity must be at least 1".into()));
        }
        if self.max_workers == 0 {
            return Err(RdfItError::Config("max_workers must be at least 1".into()));
        }
        if self.max_normalization_rounds == 0 {
            return Err(RdfItError::Config(
                "max_normalization_rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load and validate a config file; the extension picks the format.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RdfItError> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| RdfItError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_bytes(&data, path.to_str())
    }

    /// Parse config from bytes, picking the format from the path extension.
    ///
    /// Without a recognised extension the data is read as TOML.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, RdfItError> {
        let format = path.and_then(Format::of_path).unwrap_or(Format::Toml);
        format.parse(data)
    }

    /// Parse config from bytes in the named format (`json`, `yaml` or `toml`).
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, RdfItError> {
        Format::named(format)
            .ok_or_else(|| RdfItError::Config(format!("unsupported config format: {format}")))?
            .parse(data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    fn named(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }

    fn of_path(path: &str) -> Option<Self> {
        Self::named(Path::new(path).extension()?.to_str()?)
    }

    fn parse(self, data: &[u8]) -> Result<RdfItConfig, RdfItError> {
        let invalid = |e: &dyn std::fmt::Display| RdfItError::Config(format!("{self:?} config: {e}"));
        let config: RdfItConfig = match self {
            Format::Json => serde_json::from_slice(data).map_err(|e| invalid(&e))?,
            Format::Yaml => serde_yaml::from_slice(data).map_err(|e| invalid(&e))?,
            Format::Toml => {
                let text = std::str::from_utf8(data).map_err(|e| invalid(&e))?;
                toml::from_str(text).map_err(|e| invalid(&e))?
            }
        };
        config.validate()?;
        Ok(config)
    }
}
