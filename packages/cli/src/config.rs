use anyhow::{Context, Result};
use plater_editor::ProjectConfig;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "plater.config.json";

/// Path of the config file: `explicit` when given, else the default name in `cwd`
pub fn config_path(cwd: &str, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => PathBuf::from(cwd).join(path),
        None => PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME),
    }
}

/// Load the project config, falling back to defaults when no file exists
pub fn load(cwd: &str, explicit: Option<&Path>) -> Result<ProjectConfig> {
    let path = config_path(cwd, explicit);
    if explicit.is_some() && !path.exists() {
        anyhow::bail!("Config file does not exist: {}", path.display());
    }
    ProjectConfig::load(&path).with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_default_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().display().to_string();

        let config = load(&cwd, None).unwrap();
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_parse_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_NAME),
            r#"{
                "debounceMs": 50,
                "backgroundProcessing": false,
                "printConfig": { "layer_height": "0.3" }
            }"#,
        )
        .unwrap();
        let cwd = dir.path().display().to_string();

        let config = load(&cwd, None).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert!(!config.background_processing);
        assert_eq!(config.print_config["layer_height"], "0.3");
        assert_eq!(config.completion_queue_capacity, 32);
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().display().to_string();

        assert!(load(&cwd, Some(Path::new("other.json"))).is_err());
    }
}
