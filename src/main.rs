use anyhow::Result;
use clap::Parser;

use modelgate::cli::{self, Cli, Commands};
use modelgate::config::{Config, LoggingConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't need a config must not create one as a side effect.
    let config = cli
        .command
        .needs_config()
        .then(|| cli::load_config(cli.config.as_deref()));
    let logging = match &config {
        Some(Ok(config)) => config.logging.clone(),
        _ => cli::existing_logging_config(cli.config.as_deref()),
    };
    init_logging(&logging, cli.verbose);

    match cli.command {
        Commands::Status(args) => cli::status::run(args, &required(config)?),
        Commands::Simulate(args) => cli::simulate::run(args, &required(config)?),
        Commands::Canvas(args) => cli::canvas::run(args),
        Commands::Config(args) => cli::config::run(args, cli.config.as_deref()),
        Commands::Paths => cli::paths::run(),
    }
}

fn required(config: Option<Result<Config>>) -> Result<Config> {
    config.unwrap_or_else(|| cli::load_config(None))
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let log_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
