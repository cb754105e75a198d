//! Project configuration (`plater.config.json`).

use plater_common::{CommonError, CommonResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Quiet period before a background update runs
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Start slicing automatically after a successful validation
    #[serde(default = "default_true")]
    pub background_processing: bool,

    /// Upper bound on retained undo history
    #[serde(default = "default_undo_budget")]
    pub undo_memory_budget_bytes: usize,

    #[serde(default = "default_queue_capacity")]
    pub completion_queue_capacity: usize,

    /// Global print settings, overridden per plate
    #[serde(default)]
    pub print_config: BTreeMap<String, String>,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_undo_budget() -> usize {
    64 * 1024 * 1024
}

fn default_queue_capacity() -> usize {
    32
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            background_processing: true,
            undo_memory_budget_bytes: default_undo_budget(),
            completion_queue_capacity: default_queue_capacity(),
            print_config: BTreeMap::new(),
        }
    }
}

impl ProjectConfig {
    /// Load config from a file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> CommonResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CommonResult<()> {
        if self.completion_queue_capacity == 0 {
            return Err(CommonError::invalid_config(
                "completionQueueCapacity",
                "must hold at least one event",
            ));
        }
        if self.undo_memory_budget_bytes == 0 {
            return Err(CommonError::invalid_config(
                "undoMemoryBudgetBytes",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let json = r#"{
            "debounceMs": 250,
            "printConfig": { "layer_height": "0.2" }
        }"#;

        let config: ProjectConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert!(config.background_processing);
        assert_eq!(config.completion_queue_capacity, 32);
        assert_eq!(config.print_config["layer_height"], "0.2");
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig::load(&dir.path().join("plater.config.json")).unwrap();
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_load_rejects_zero_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plater.config.json");
        std::fs::write(&path, r#"{ "completionQueueCapacity": 0 }"#).unwrap();

        let err = ProjectConfig::load(&path).unwrap_err();
        assert!(matches!(
            err,
            CommonError::InvalidConfig {
                key: "completionQueueCapacity",
                ..
            }
        ));
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plater.config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ProjectConfig::load(&path).is_err());
    }
}
