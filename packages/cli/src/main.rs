mod commands;
mod config;
mod script;
mod slicer;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{init, run, InitArgs, RunArgs};
use tracing_subscriber::EnvFilter;

/// Plater CLI - replay edit scripts against a background slicer
#[derive(Parser, Debug)]
#[command(name = "plater")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log state transitions (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config and an example script
    Init(InitArgs),

    /// Replay an edit script, slicing in the background as it goes
    Run(RunArgs),
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = std::env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|cwd| {
            let cwd = cwd.display().to_string();
            match cli.command {
                Command::Init(args) => init(args, &cwd),
                Command::Run(args) => run(args, &cwd),
            }
        });

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
