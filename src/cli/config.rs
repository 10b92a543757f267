//! CLI subcommand: `modelgate config`
//!
//! Every action targets the same file `status` and `simulate` read, so
//! `--config other.toml config set ...` edits `other.toml`.

use anyhow::Result;
use clap::{Args, Subcommand};
use std::fs;
use std::path::Path;

use super::{config_file, load_config};
use crate::config::{Config, DEFAULT_CONFIG_TEMPLATE};
use crate::resources::ModelType;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show {
        /// Print JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Print one value (e.g. budget.total_vram_gb)
    Get { key: String },

    /// Change one value (e.g. estimates.llm.vram_gb 9.5) and save
    Set { key: String, value: String },

    /// Reservation used for each model category
    Estimates,

    /// Print the config file location
    Path,

    /// Write the commented default template
    Init {
        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub fn run(args: ConfigArgs, explicit: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommands::Show { json } => {
            let config = load_config(explicit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        ConfigCommands::Get { key } => println!("{}", load_config(explicit)?.get_value(&key)?),
        ConfigCommands::Set { key, value } => {
            let path = config_file(explicit)?;
            set_in_file(&path, &key, &value)?;
            println!("Set {} = {} in {}", key, value, path.display());
        }
        ConfigCommands::Estimates => print_estimates(&load_config(explicit)?),
        ConfigCommands::Path => println!("{}", config_file(explicit)?.display()),
        ConfigCommands::Init { force } => {
            let path = config_file(explicit)?;
            write_template(&path, force)?;
            println!("Created config file at {}", path.display());
        }
    }
    Ok(())
}

fn print_estimates(config: &Config) {
    println!("{:<18} {:>10} {:>10}", "category", "VRAM (GB)", "RAM (GB)");
    for model_type in ModelType::ALL {
        let fp = config.estimates.for_type(model_type);
        println!(
            "{:<18} {:>10.2} {:>10.2}",
            model_type.as_str(),
            fp.vram_gb,
            fp.ram_gb
        );
    }
}

/// Load `path` (template defaults if missing), apply one dotted key, save back.
fn set_in_file(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut config = if path.exists() {
        Config::load_from(path)?
    } else {
        Config::default()
    };
    config.set_value(key, value)?;
    config.save_to(path)
}

fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    Ok(())
}
