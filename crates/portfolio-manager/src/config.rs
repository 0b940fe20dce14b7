//! Manager configuration.

use crate::error::{PortfolioError, Result};
use portfolio_spatial::DEFAULT_CELL_SIZE;
use portfolio_storage::DEFAULT_COMPACT_AFTER_FRAMES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a [`crate::Manager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Root directory; each portfolio lives in `<base_dir>/<portfolio id>/`
    pub base_dir: PathBuf,
    /// Grid cell edge for building spatial indexes
    pub spatial_cell_size: f64,
    /// Deadline applied to federated queries when the caller sets none
    pub query_timeout_ms: Option<u64>,
    /// Log frames a building store accumulates before compacting
    pub compact_after_frames: usize,
    /// Reload portfolios from disk even when already in memory
    pub force_reload: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./portfolios"),
            spatial_cell_size: DEFAULT_CELL_SIZE,
            query_timeout_ms: Some(30_000),
            compact_after_frames: DEFAULT_COMPACT_AFTER_FRAMES,
            force_reload: false,
        }
    }
}

impl ManagerConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PortfolioError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| PortfolioError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn with_cell_size(mut self, cell_size: f64) -> Self {
        self.spatial_cell_size = cell_size;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_compact_after(mut self, frames: usize) -> Self {
        self.compact_after_frames = frames;
        self
    }

    pub fn with_force_reload(mut self, force_reload: bool) -> Self {
        self.force_reload = force_reload;
        self
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

/// Per-call options for [`crate::Manager::load_portfolio_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Discard any in-memory copy and rebuild from disk.
    pub force_reload: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.json");
        std::fs::write(&path, r#"{ "base_dir": "/srv/portfolios", "force_reload": true }"#).unwrap();

        let config = ManagerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/srv/portfolios"));
        assert!(config.force_reload);
        assert_eq!(config.spatial_cell_size, DEFAULT_CELL_SIZE);
        assert_eq!(config.query_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.json");
        std::fs::write(&path, "{ base_dir: ").unwrap();

        assert!(matches!(
            ManagerConfig::from_json_file(&path),
            Err(PortfolioError::Config { .. })
        ));
    }
}
