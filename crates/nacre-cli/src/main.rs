// crates/nacre-cli/src/main.rs
//
// CLI entrypoint for the Nacre staking ledger developer tools.
//
// Provides subcommands for replaying ledger scenarios, quoting cover
// premiums, and showing the tranche calendar.

mod commands;
mod config;
mod output;

use clap::{Parser, Subcommand};
use commands::quote::QuoteCmd;
use commands::simulate::SimulateCmd;
use commands::tranches::TranchesCmd;
use config::NacreConfig;
use output::OutputFormat;

/// Nacre CLI — developer tools for the staking-pool ledger.
#[derive(Parser, Debug)]
#[command(
    name = "nacre",
    version = "0.1.0",
    about = "Nacre CLI for the staking-pool ledger — scenarios, premium quotes, tranches"
)]
struct Cli {
    /// Path to the TOML configuration file (default: ~/.nacre/config.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Output format: table or json. Overrides the config file.
    #[arg(long, global = true)]
    output: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a JSON scenario against an in-memory ledger.
    Simulate(SimulateCmd),

    /// Price a hypothetical cover purchase.
    Quote(QuoteCmd),

    /// Show the active tranche calendar.
    Tranches(TranchesCmd),
}

/// Load the config from `path` (or the default location), falling back to
/// defaults when the file does not exist.
fn load_config(path: Option<&str>) -> Result<(NacreConfig, String), Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => p.to_string(),
        None => NacreConfig::default_path()?.to_string_lossy().to_string(),
    };
    if !std::path::Path::new(&path).exists() {
        return Ok((NacreConfig::default(), format!("{} not found, using defaults", path)));
    }
    let config = NacreConfig::load(&path)?;
    Ok((config, format!("loaded {}", path)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (config, source) = load_config(cli.config.as_deref())?;

    // Initialize tracing subscriber for structured logging. Logs go to
    // stderr so JSON output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();
    tracing::debug!("Configuration: {}", source);

    let format = match cli.output {
        Some(format) => format,
        None => config.output.parse::<OutputFormat>()?,
    };

    match &cli.command {
        Commands::Simulate(cmd) => commands::simulate::run(cmd, &config, format)?,
        Commands::Quote(cmd) => commands::quote::run(cmd, format)?,
        Commands::Tranches(cmd) => commands::tranches::run(cmd, format)?,
    }

    Ok(())
}
