use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod db;
mod models;
mod schema;
mod sync;

use commands::{
    ConfigCommand, InteractionCommand, InteractionSubcommand, RespondentCommand,
    RespondentSubcommand, SyncCommand,
};
use config::Config;
use db::init_db;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(version)]
#[command(about = "Offline-first client for field data collection", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage respondents
    Respondent(RespondentCommand),

    /// Record and list interactions
    Interaction(InteractionCommand),

    /// Exchange data with the server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Respondent(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            let is_write = matches!(
                cmd.command,
                RespondentSubcommand::Add { .. } | RespondentSubcommand::Delete { .. }
            );
            cmd.run(&pool, &config).await?;
            // Auto-sync after write commands (only if the command succeeded)
            if is_write {
                sync::maybe_auto_sync(&pool, &config).await;
            }
        }
        Some(Commands::Interaction(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            let is_write = matches!(cmd.command, InteractionSubcommand::Add { .. });
            cmd.run(&pool).await?;
            if is_write {
                sync::maybe_auto_sync(&pool, &config).await;
            }
        }
        Some(Commands::Sync(cmd)) => {
            let pool = init_db(&config.database_path.value).await?;
            cmd.run(&pool, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
