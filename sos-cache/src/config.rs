//! Configuration for the cache controller

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// EPSG code used when nothing else is configured (WGS 84)
pub const DEFAULT_EPSG: i32 = 4326;

/// Controller configuration
///
/// Passed explicitly to the controller and everything it creates; nothing in
/// the crate reads ambient configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Where the snapshot is read at startup and written at shutdown
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// Upper bound for lock acquisition and waits on other rebuilds
    #[serde(default = "default_update_timeout")]
    pub update_timeout_ms: u64,

    /// Worker threads used for per-offering fetches during a full rebuild
    #[serde(default = "default_rebuild_threads")]
    pub rebuild_threads: usize,

    /// CRS code attached to computed envelopes
    #[serde(default = "default_epsg")]
    pub default_epsg: i32,

    /// Period of the scheduled full rebuild, disabled when unset
    #[serde(default)]
    pub rebuild_interval_ms: Option<u64>,

    /// Delete the snapshot once it has been loaded
    #[serde(default = "default_true")]
    pub discard_snapshot_after_load: bool,

    /// Save a snapshot on shutdown
    #[serde(default = "default_true")]
    pub persist_on_shutdown: bool,
}

fn default_true() -> bool { true }
fn default_update_timeout() -> u64 { 60_000 }
fn default_rebuild_threads() -> usize { num_cpus::get().max(1) }
fn default_epsg() -> i32 { DEFAULT_EPSG }

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            update_timeout_ms: default_update_timeout(),
            rebuild_threads: default_rebuild_threads(),
            default_epsg: DEFAULT_EPSG,
            rebuild_interval_ms: None,
            discard_snapshot_after_load: true,
            persist_on_shutdown: true,
        }
    }
}

impl ControllerConfig {
    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::IoError {
            message: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Set the snapshot location
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Set the update timeout
    pub fn with_update_timeout(mut self, timeout: Duration) -> Self {
        self.update_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the number of rebuild worker threads (at least one)
    pub fn with_rebuild_threads(mut self, threads: usize) -> Self {
        self.rebuild_threads = threads.max(1);
        self
    }

    /// Set the default EPSG code
    pub fn with_default_epsg(mut self, epsg: i32) -> Self {
        self.default_epsg = epsg;
        self
    }

    /// Enable the scheduled full rebuild
    pub fn with_rebuild_interval(mut self, interval: Duration) -> Self {
        self.rebuild_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Keep or delete the snapshot after loading it
    pub fn with_discard_snapshot_after_load(mut self, discard: bool) -> Self {
        self.discard_snapshot_after_load = discard;
        self
    }

    /// Save or skip the snapshot at shutdown
    pub fn with_persist_on_shutdown(mut self, persist: bool) -> Self {
        self.persist_on_shutdown = persist;
        self
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }

    pub fn rebuild_interval(&self) -> Option<Duration> {
        self.rebuild_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.default_epsg, 4326);
        assert_eq!(config.update_timeout(), Duration::from_secs(60));
        assert!(config.rebuild_threads >= 1);
        assert!(config.rebuild_interval().is_none());
        assert!(config.discard_snapshot_after_load);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"update_timeout_ms": 250, "default_epsg": 31467}"#).unwrap();
        assert_eq!(config.update_timeout(), Duration::from_millis(250));
        assert_eq!(config.default_epsg, 31467);
        assert!(config.persist_on_shutdown);
        assert!(config.snapshot_path.is_none());
    }

    #[test]
    fn test_builder() {
        let config = ControllerConfig::default()
            .with_rebuild_threads(0)
            .with_rebuild_interval(Duration::from_secs(5))
            .with_snapshot_path("/tmp/cache.snapshot");
        assert_eq!(config.rebuild_threads, 1);
        assert_eq!(config.rebuild_interval(), Some(Duration::from_secs(5)));
        assert_eq!(
            config.snapshot_path.as_deref(),
            Some(Path::new("/tmp/cache.snapshot"))
        );
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("sos-cache-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"rebuild_threads": 3, "rebuild_interval_ms": 0}"#).unwrap();
        let config = ControllerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.rebuild_threads, 3);
        assert!(config.rebuild_interval().is_none());
        std::fs::remove_file(&path).ok();
    }
}
