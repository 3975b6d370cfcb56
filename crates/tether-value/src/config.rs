use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ValueError};

/// Field name used for modification stamps when nothing else is configured.
pub const DEFAULT_DATE_MODIFIED_KEY: &str = "@";

/// Process-wide configuration for observables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservableConfig {
    /// Field name used to stamp modification times on synced records.
    pub date_modified_key: Option<String>,
    /// Maximum number of equality-fn links followed by raw value extraction.
    pub max_derivation_depth: usize,
}

impl Default for ObservableConfig {
    fn default() -> Self {
        Self {
            date_modified_key: None,
            max_derivation_depth: 64,
        }
    }
}

impl ObservableConfig {
    /// Parse a configuration from TOML. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ValueError::Config(e.to_string()))
    }
}

fn global() -> &'static RwLock<ObservableConfig> {
    static CONFIG: OnceLock<RwLock<ObservableConfig>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(ObservableConfig::default()))
}

/// Replace the process-wide configuration.
pub fn configure_observable(config: ObservableConfig) {
    debug!(?config, "observable configuration replaced");
    *global().write().expect("config lock poisoned") = config;
}

/// A snapshot of the process-wide configuration.
pub fn observable_configuration() -> ObservableConfig {
    global().read().expect("config lock poisoned").clone()
}

/// Resolve the modification-stamp field: an explicit non-empty key wins,
/// then the configured key, then [`DEFAULT_DATE_MODIFIED_KEY`].
pub fn date_modified_key(explicit: Option<&str>) -> String {
    if let Some(key) = explicit.filter(|k| !k.is_empty()) {
        return key.to_string();
    }
    observable_configuration()
        .date_modified_key
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| DEFAULT_DATE_MODIFIED_KEY.to_string())
}
