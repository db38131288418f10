//! typewire CLI, the main entry point.
//!
//! Commands:
//! - `run`    Run a schema-typed request through the agent pipeline
//! - `tools`  List the tools a capability server exposes
//! - `init`   Write a default config file
//! - `config` Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "typewire",
    about = "typewire: schema-typed LLM calls with tool orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.typewire/config.toml
    #[arg(long, global = true, env = "TYPEWIRE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request and print the structured output as JSON
    Run(commands::run::RunArgs),

    /// List the tools a capability server exposes
    Tools {
        /// Capability server base URL
        #[arg(long)]
        url: String,
    },

    /// Write a default config file if none exists
    Init,

    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the JSON result
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => commands::run::run(config_path, args).await?,
        Commands::Tools { url } => commands::tools::run(config_path, &url).await?,
        Commands::Init => commands::init::run()?,
        Commands::Config => commands::config_cmd::show(config_path)?,
    }

    Ok(())
}
