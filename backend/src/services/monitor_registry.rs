//! Monitor registry
//!
//! Loads, validates, and serves the set of configured monitors. A load is
//! all-or-nothing: one invalid entry fails the whole document, and on reload
//! the previous snapshot stays in effect. Readers see an atomic swap, never
//! a torn set.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use validator::Validate;

use crate::models::{MonitorConfig, MonitorsFile};
use crate::utils::{ApiError, ApiResult};

pub struct MonitorRegistry {
    path: PathBuf,
    snapshot: RwLock<Arc<Vec<MonitorConfig>>>,
}

impl MonitorRegistry {
    /// Create an empty registry backed by the given monitors file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), snapshot: RwLock::new(Arc::new(Vec::new())) }
    }

    /// Initial load. Same contract as [`MonitorRegistry::reload`].
    pub async fn load(&self) -> ApiResult<usize> {
        self.reload().await
    }

    /// Parse and validate the monitors file, then atomically replace the
    /// snapshot. Any validation error leaves the current snapshot untouched.
    pub async fn reload(&self) -> ApiResult<usize> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ApiError::configuration(format!("Cannot read monitors file {}: {}", self.path.display(), e))
        })?;

        let monitors = Self::parse_and_validate(&raw)?;
        let count = monitors.len();

        {
            let mut guard = self.snapshot.write().expect("monitor registry lock poisoned");
            *guard = Arc::new(monitors);
        }

        tracing::info!("monitors reloaded: {}", count);
        Ok(count)
    }

    /// Parse a monitors document and validate every entry. Duplicate ids and
    /// per-entry schema violations fail the whole document.
    pub fn parse_and_validate(raw: &str) -> ApiResult<Vec<MonitorConfig>> {
        let file: MonitorsFile = serde_json::from_str(raw)
            .map_err(|e| ApiError::configuration(format!("Invalid monitors document: {}", e)))?;

        let mut seen = std::collections::HashSet::new();
        for monitor in &file.monitors {
            monitor.validate().map_err(|e| {
                ApiError::configuration(format!("Monitor '{}' failed validation: {}", monitor.id, e))
            })?;
            if !seen.insert(monitor.id.clone()) {
                return Err(ApiError::configuration(format!("Duplicate monitor id '{}'", monitor.id)));
            }
        }

        Ok(file.monitors)
    }

    /// Current snapshot, cheap to clone.
    fn current(&self) -> Arc<Vec<MonitorConfig>> {
        self.snapshot.read().expect("monitor registry lock poisoned").clone()
    }

    pub fn get(&self, id: &str) -> Option<MonitorConfig> {
        self.current().iter().find(|m| m.id == id).cloned()
    }

    pub fn list(&self) -> Vec<MonitorConfig> {
        self.current().as_ref().clone()
    }

    /// Enabled monitors only; disabled entries are loaded but never scheduled.
    pub fn list_enabled(&self) -> Vec<MonitorConfig> {
        self.current().iter().filter(|m| m.enabled).cloned().collect()
    }
}
