//! Store configuration via `koya.toml`
//!
//! On first open a commented default `koya.toml` is written to the data
//! directory. Edit it and reopen to change settings. The logging flag is fixed
//! when a store is created; on later opens the persisted flag wins.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use koya_core::{KoyaError, KoyaResult};
use koya_storage::BusyPolicy;

/// Config file name placed in the data directory
pub const CONFIG_FILE_NAME: &str = "koya.toml";

/// Snapshot file name placed in the data directory
pub const DATA_FILE_NAME: &str = "koya.db";

/// Store configuration loaded from `koya.toml`
///
/// # Example
///
/// ```toml
/// use_log = true
/// global_cache = true
/// polling_interval_ms = 100
/// # busy_timeout_ms = 30000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Record every property mutation so the store can be reverted
    #[serde(default = "default_true")]
    pub use_log: bool,
    /// Keep committed objects materialized between transactions
    #[serde(default = "default_true")]
    pub global_cache: bool,
    /// Sleep between attempts on a busy backend
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Give up on a busy backend after this long; absent waits forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_polling_interval_ms() -> u64 {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            use_log: true,
            global_cache: true,
            polling_interval_ms: default_polling_interval_ms(),
            busy_timeout_ms: None,
        }
    }
}

impl StoreConfig {
    /// Enable or disable the property log
    pub fn with_log(mut self, use_log: bool) -> Self {
        self.use_log = use_log;
        self
    }

    /// Enable or disable the cross-transaction object cache
    pub fn with_global_cache(mut self, enabled: bool) -> Self {
        self.global_cache = enabled;
        self
    }

    /// Set the busy polling interval
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the busy timeout
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Busy policy handed to the backend
    pub fn busy_policy(&self) -> BusyPolicy {
        let policy = BusyPolicy::default()
            .with_polling_interval(Duration::from_millis(self.polling_interval_ms));
        match self.busy_timeout_ms {
            Some(ms) => policy.with_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> KoyaResult<()> {
        if self.polling_interval_ms == 0 {
            return Err(KoyaError::invalid_input(
                "polling_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Koya store configuration
#
# Record every property mutation in the property log (default: true).
# Required for revert_to. Fixed when the store is first created.
use_log = true

# Keep committed objects materialized between transactions (default: true).
global_cache = true

# Milliseconds to sleep between attempts while the backend is busy.
polling_interval_ms = 100

# Give up with a Busy error after this many milliseconds (default: wait forever).
# busy_timeout_ms = 30000
"#
    }

    /// Read and parse config from a file path
    pub fn from_file(path: &Path) -> KoyaResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            KoyaError::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist
    pub fn write_default_if_missing(path: &Path) -> KoyaResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path
    pub fn write_to_file(&self, path: &Path) -> KoyaResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            KoyaError::Serialization(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
