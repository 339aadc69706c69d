//! GenOps CLI — the main entry point.
//!
//! Commands:
//! - `status`   — Show adapter registration and default attributes
//! - `validate` — Check the setup against the libraries present
//! - `pricing`  — List the model pricing table
//! - `estimate` — Estimate the cost of one call
//! - `budgets`  — Show configured budget policies
//! - `replay`   — Run recorded calls through the governance pipeline
//! - `config`   — Show, generate or locate the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::LibrarySpec;

#[derive(Parser)]
#[command(
    name = "genops",
    about = "GenOps — governance telemetry for AI pipelines",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.genops/config.toml)
    #[arg(short, long, global = true, env = "GENOPS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show adapter registration status and default attributes
    Status {
        /// Describe a library present in the process, as `name=version`
        #[arg(short, long = "library", value_parser = commands::parse_library)]
        libraries: Vec<LibrarySpec>,
    },

    /// Validate the setup and suggest fixes
    Validate {
        /// Describe a library present in the process, as `name=version`
        #[arg(short, long = "library", value_parser = commands::parse_library)]
        libraries: Vec<LibrarySpec>,
    },

    /// List model pricing (per 1M tokens)
    Pricing,

    /// Estimate cost for a model and token counts
    Estimate {
        model: String,
        input_tokens: u64,
        output_tokens: u64,
    },

    /// Show configured budget policies
    Budgets,

    /// Replay JSON-lines call records through the governance pipeline
    Replay {
        /// File with one call per line
        file: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the default configuration
    Default,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Status { libraries } => commands::status::run(config_path, &libraries).await?,
        Commands::Validate { libraries } => commands::config_cmd::validate(config_path, &libraries).await?,
        Commands::Pricing => commands::usage::pricing(config_path).await?,
        Commands::Estimate {
            model,
            input_tokens,
            output_tokens,
        } => commands::usage::estimate(config_path, &model, input_tokens, output_tokens).await?,
        Commands::Budgets => commands::usage::budgets(config_path).await?,
        Commands::Replay { file, json } => commands::replay::run(config_path, &file, json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Default => commands::config_cmd::default().await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
        },
    }

    Ok(())
}
