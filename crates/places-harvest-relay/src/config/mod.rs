//! Configuration loading and resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use places_harvest::{CaptureLayout, FieldTable};

use crate::delivery::QueueSettings;
use crate::types::{RelayError, RelayResult};

pub const CONFIG_ENV: &str = "PLACES_HARVEST_CONFIG";
pub const ENDPOINT_ENV: &str = "PLACES_HARVEST_ENDPOINT";

/// Relay settings. Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    /// Collector base URL.
    pub endpoint: String,
    /// Queue size that triggers an immediate flush.
    pub batch_size: usize,
    pub debounce_ms: u64,
    pub health_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub fields: FieldTable,
    pub capture: CaptureLayout,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            batch_size: 10,
            debounce_ms: 5_000,
            health_interval_ms: 30_000,
            request_timeout_ms: 10_000,
            fields: FieldTable::default(),
            capture: CaptureLayout::default(),
        }
    }
}

impl RelayConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> RelayResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| RelayError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RelayResult<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(RelayError::Config("endpoint must not be empty".into()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(RelayError::Config(format!(
                "endpoint must be an http(s) URL: {endpoint}"
            )));
        }
        if self.batch_size == 0 {
            return Err(RelayError::Config("batchSize must be at least 1".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(RelayError::Config("requestTimeoutMs must be positive".into()));
        }
        Ok(())
    }

    /// Apply an endpoint override taken from the environment.
    pub fn apply_endpoint_override(&mut self, value: Option<String>) {
        if let Some(endpoint) = value.filter(|v| !v.trim().is_empty()) {
            tracing::debug!("Endpoint overridden from {ENDPOINT_ENV}: {endpoint}");
            self.endpoint = endpoint;
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_endpoint_override(std::env::var(ENDPOINT_ENV).ok());
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            batch_size: self.batch_size,
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

/// Resolve the config file path: explicit flag, then env var, then the
/// project-local file if it exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    resolve_from(
        explicit,
        std::env::var(CONFIG_ENV).ok(),
        Path::new(".places-harvest/relay.json"),
    )
}

fn resolve_from(explicit: Option<&Path>, env: Option<String>, local: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(env_path) = env.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(env_path));
    }

    if local.exists() {
        return Some(local.to_path_buf());
    }

    None
}

/// Load the effective configuration, falling back to defaults when no file
/// is found. Environment overrides are applied last.
pub fn load_config(explicit: Option<&Path>) -> RelayResult<RelayConfig> {
    let mut config = match resolve_config_path(explicit) {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            RelayConfig::load(&path)?
        }
        None => RelayConfig::default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}
