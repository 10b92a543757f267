pub mod canvas;
pub mod config;
pub mod paths;
pub mod simulate;
pub mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::{Config, LoggingConfig};
use crate::resources::{HostMemoryProbe, ResourceManager};

#[derive(Parser)]
#[command(name = "modelgate")]
#[command(author, version, about = "Model residency and GPU memory budget coordinator")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "MODELGATE_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the memory budget for the configured device
    Status(status::StatusArgs),

    /// Replay a scripted sequence of load/unload calls
    Simulate(simulate::SimulateArgs),

    /// Estimate the memory held by a canvas undo/redo history export
    Canvas(canvas::CanvasArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}

impl Commands {
    /// Whether the command reads the budget config (and may create it on first run).
    pub fn needs_config(&self) -> bool {
        matches!(self, Commands::Status(_) | Commands::Simulate(_))
    }
}

/// Load the config from `--config` if given, else from the XDG location.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    match explicit {
        Some(path) => Config::load_from(Path::new(path)),
        None => Config::load(),
    }
}

/// The file `load_config` reads: `--config` with `~` expanded, else the XDG location.
pub fn config_file(explicit: Option<&str>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).to_string())),
        None => Config::config_path(),
    }
}

/// Logging settings from a config file that already exists, else defaults.
/// Never creates the file.
pub fn existing_logging_config(explicit: Option<&str>) -> LoggingConfig {
    config_file(explicit)
        .ok()
        .filter(|path| path.exists())
        .and_then(|path| Config::load_from(&path).ok())
        .map(|config| config.logging)
        .unwrap_or_default()
}

/// Build a manager for the configured device, probing host RAM when the
/// config leaves it at 0.
pub fn build_manager(config: &Config) -> ResourceManager {
    let manager = ResourceManager::from_config(config, config.budget.capacity());
    if config.budget.probe_host_ram() {
        let probe = HostMemoryProbe::new(
            config.budget.total_vram_gb,
            config.budget.external_apps_vram_gb,
        );
        if !manager.refresh_capacity(&probe) {
            warn!("Host RAM unknown; set budget.total_ram_gb in the config");
        }
    }
    manager
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_budget_commands_need_config() {
        let status = Cli::parse_from(["modelgate", "status"]);
        assert!(status.command.needs_config());
        let simulate = Cli::parse_from(["modelgate", "simulate", "plan.toml"]);
        assert!(simulate.command.needs_config());

        for args in [
            vec!["modelgate", "paths"],
            vec!["modelgate", "canvas", "history.json"],
            vec!["modelgate", "config", "path"],
        ] {
            assert!(!Cli::parse_from(args).command.needs_config());
        }
    }

    #[test]
    fn logging_lookup_does_not_create_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");

        let logging = existing_logging_config(path.to_str());
        assert_eq!(logging.level, "info");
        assert!(!path.exists());

        std::fs::write(&path, "[logging]\nlevel = \"trace\"\nformat = \"json\"\n").unwrap();
        let logging = existing_logging_config(path.to_str());
        assert_eq!(logging.level, "trace");
        assert_eq!(logging.format, "json");
    }
}
