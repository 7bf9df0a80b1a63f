use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::placement::Strategy;

/// Per-run tuning of the synchronizer.
///
/// Loadable from a standalone TOML file or from the `[sync]` table of a
/// larger project file; every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Project name written into `(instances (project ..))`
    pub project: String,
    /// `(generator ..)` of synthesized documents
    pub generator: String,
    /// Placement grid pitch in millimetres
    pub grid: f64,
    /// Free space kept around every obstacle
    pub clearance: f64,
    /// Initial search radius of the placement engine
    pub search_radius: f64,
    pub default_strategy: Strategy,
    /// Keep document components that have no counterpart in code
    pub preserve_unmatched: bool,
    /// Paper size of synthesized documents
    pub paper: String,
    /// Width of newly created sheet symbols
    pub sheet_width: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            project: "project".to_string(),
            generator: "sch_sync".to_string(),
            grid: 2.54,
            clearance: 2.54,
            search_radius: 254.0,
            default_strategy: Strategy::Contextual,
            preserve_unmatched: false,
            paper: "A4".to_string(),
            sheet_width: 25.4,
        }
    }
}

impl SyncConfig {
    /// Parse either a bare config or a document carrying a `[sync]` table.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let value: toml::Table =
            toml::from_str(contents).map_err(|e| SyncError::Config(e.to_string()))?;

        // Unrelated project keys must not trip `deny_unknown_fields`.
        let table = match value.get("sync") {
            Some(sync) => sync.clone(),
            None => toml::Value::Table(value),
        };
        let config: SyncConfig = table
            .try_into()
            .map_err(|e: toml::de::Error| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> Result<()> {
        if self.grid <= 0.0 {
            return Err(SyncError::Config(format!(
                "grid must be positive, got {}",
                self.grid
            )));
        }
        if self.clearance < 0.0 || self.search_radius < 0.0 {
            return Err(SyncError::Config(
                "clearance and search_radius must not be negative".to_string(),
            ));
        }
        if self.sheet_width <= 0.0 {
            return Err(SyncError::Config(format!(
                "sheet_width must be positive, got {}",
                self.sheet_width
            )));
        }
        Ok(())
    }
}
