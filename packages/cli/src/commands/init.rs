use crate::config::DEFAULT_CONFIG_NAME;
use crate::script::EXAMPLE_SCRIPT;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use plater_editor::ProjectConfig;
use std::fs;
use std::path::PathBuf;

pub const EXAMPLE_SCRIPT_NAME: &str = "example.script.json";

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Quiet period before background slicing starts, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub debounce_ms: u64,

    /// Only slice when asked to
    #[arg(long)]
    pub no_background: bool,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &str) -> Result<()> {
    let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    println!("{}", "📝 Initializing Plater project...".bright_blue().bold());

    let mut config = ProjectConfig {
        debounce_ms: args.debounce_ms,
        background_processing: !args.no_background,
        ..Default::default()
    };
    config
        .print_config
        .insert("layer_height".to_string(), "0.2".to_string());
    config
        .print_config
        .insert("bed_size".to_string(), "250".to_string());

    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);

    let script_path = PathBuf::from(cwd).join(EXAMPLE_SCRIPT_NAME);
    if !script_path.exists() {
        fs::write(&script_path, EXAMPLE_SCRIPT)?;
        println!("  {} Created {}", "✓".green(), EXAMPLE_SCRIPT_NAME);
    }

    println!();
    println!("{}", "✅ Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Edit {}", EXAMPLE_SCRIPT_NAME);
    println!("  2. Run: plater run {}", EXAMPLE_SCRIPT_NAME);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn args(force: bool) -> InitArgs {
        InitArgs {
            debounce_ms: 100,
            no_background: false,
            force,
        }
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().display().to_string();

        init(args(false), &cwd).unwrap();

        let loaded = config::load(&cwd, None).unwrap();
        assert_eq!(loaded.debounce_ms, 100);
        assert_eq!(loaded.print_config["layer_height"], "0.2");
        assert!(dir.path().join(EXAMPLE_SCRIPT_NAME).exists());
    }

    #[test]
    fn test_init_keeps_existing_config_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().display().to_string();
        let path = dir.path().join(DEFAULT_CONFIG_NAME);
        fs::write(&path, "{}").unwrap();

        init(args(false), &cwd).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");

        init(args(true), &cwd).unwrap();
        assert_ne!(fs::read_to_string(&path).unwrap(), "{}");
    }
}
