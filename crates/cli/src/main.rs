//! TaskPilot CLI: the main entry point.
//!
//! Commands:
//! - `run`    : Run one task end-to-end against a scripted model
//! - `config` : Print, locate, or validate configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "taskpilot",
    about = "TaskPilot: autonomous agent task execution engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task, replaying model responses from a script
    Run {
        /// The request to work on
        #[arg(short, long)]
        message: String,

        /// JSON script of model responses
        #[arg(short, long)]
        script: PathBuf,

        /// Conversation to run the task in
        #[arg(short, long, default_value = "cli")]
        conversation: String,
    },

    /// Configuration commands (prints the default config when no action is given)
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration (file + environment)
    Show,
    /// Print the config file path
    Path,
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            message,
            script,
            conversation,
        } => commands::run::run(message, script, conversation).await?,
        Commands::Config { action } => match action {
            None => commands::config_cmd::defaults(),
            Some(ConfigAction::Show) => commands::config_cmd::show()?,
            Some(ConfigAction::Path) => commands::config_cmd::path(),
            Some(ConfigAction::Validate) => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}
