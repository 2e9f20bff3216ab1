//! Reporter configuration, loaded from TOML

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reporter configuration
///
/// Every key is optional in the file; missing keys take their defaults.
///
/// # Example
/// ```
/// use powergraph::config::GraphConfig;
///
/// let config: GraphConfig = toml::from_str(r#"
///     measurement = "jvm-run-7"
///     bridge_timeout_ms = 0
///
///     [store]
///     workers = 4
/// "#).unwrap();
/// assert_eq!(config.measurement, "jvm-run-7");
/// assert_eq!(config.bridge_timeout(), None);
/// assert_eq!(config.store.workers, 4);
/// assert_eq!(config.lock_stripes, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Id of the monitored software run every sample is attributed to
    pub measurement: String,

    pub world: u64,

    /// Bound on every blocking wait for the store
    ///
    /// `0` waits forever, which is how a hung store used to behave.
    pub bridge_timeout_ms: u64,

    pub store: StoreConfig,

    /// Number of per-key creation locks
    pub lock_stripes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Threads completing store operations; `0` completes them inline
    pub workers: usize,

    /// JSON snapshot loaded on connect and written on save
    pub snapshot_path: Option<PathBuf>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            measurement: "default".to_string(),
            world: 0,
            bridge_timeout_ms: 5000,
            store: StoreConfig::default(),
            lock_stripes: 64,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            snapshot_path: None,
        }
    }
}

impl GraphConfig {
    /// Read and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| GraphError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.measurement.trim().is_empty() {
            return Err(GraphError::Config("measurement must not be empty".to_string()));
        }
        if self.lock_stripes == 0 {
            return Err(GraphError::Config("lock_stripes must be >= 1".to_string()));
        }
        Ok(())
    }

    pub fn bridge_timeout(&self) -> Option<Duration> {
        match self.bridge_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
