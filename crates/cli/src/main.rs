//! agentgraph CLI — the main entry point.
//!
//! Commands:
//! - `init`     — Write a default config file
//! - `config`   — Validate, show or locate the configuration
//! - `inspect`  — Summarize a saved graph checkpoint
//! - `route`    — Show where a checkpoint would resume
//! - `session`  — List, show or delete stored session records

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentgraph",
    about = "agentgraph — agent execution graph with tiered memory",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "AGENTGRAPH_LOG_JSON")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config.toml into the config directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Summarize a checkpoint (a JSON-serialized graph state)
    Inspect {
        checkpoint: std::path::PathBuf,
    },

    /// Print the next top-level and memory nodes for a checkpoint
    Route {
        checkpoint: std::path::PathBuf,
    },

    /// Session record management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse and validate the config file
    Validate,
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions owned by a user
    List { user_id: String },
    /// Print one session record
    Show { key: String },
    /// Delete a session record
    Delete { key: String },
}

#[tokio::main]
async fn main() -> agentgraph_core::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
        Commands::Inspect { checkpoint } => commands::checkpoint::inspect(&checkpoint)?,
        Commands::Route { checkpoint } => commands::checkpoint::route(&checkpoint)?,
        Commands::Session { action } => match action {
            SessionAction::List { user_id } => commands::session::list(&user_id).await?,
            SessionAction::Show { key } => commands::session::show(&key).await?,
            SessionAction::Delete { key } => commands::session::delete(&key).await?,
        },
    }

    Ok(())
}
