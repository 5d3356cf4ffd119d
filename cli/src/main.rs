// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Switchyard CLI
//!
//! Operator tooling for the delegation engine.
//!
//! ## Commands
//!
//! - `switchyard config show|validate|generate` - Configuration management
//! - `switchyard resolve` - Resolve a delegation against a seed fixture
//! - `switchyard directory` - Render an agent's delegate directory from a fixture
//! - `switchyard tools check NAME` - Check a custom tool name for validity and collisions
//! - `switchyard db migrate` - Apply database schema migrations

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use switchyard_core::domain::node_config::NodeConfigManifest;

mod commands;
mod fixture;

use commands::{ConfigCommand, DbCommand, ResolveArgs, ToolsCommand};

/// Switchyard - delegation resolution and admission control for agent backends
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SWITCHYARD_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines instead of compact text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Resolve a delegation request against a fixture
    #[command(name = "resolve")]
    Resolve(ResolveArgs),

    /// Render the delegate directory of one agent in a fixture
    #[command(name = "directory")]
    Directory(commands::resolve::DirectoryArgs),

    /// Custom tool name checks
    #[command(name = "tools")]
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },

    /// Database schema management
    #[command(name = "db")]
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logging follows the config file unless overridden on the command line.
    let logging = NodeConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .and_then(|c| c.spec.observability.and_then(|o| o.logging));
    let level = cli
        .log_level
        .clone()
        .or_else(|| logging.as_ref().map(|l| l.level.clone()))
        .unwrap_or_else(|| "warn".to_string());
    let json = cli.log_json || logging.as_ref().is_some_and(|l| l.format == "json");
    init_logging(&level, json)?;

    match cli.command {
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Resolve(args)) => commands::resolve::resolve(args, cli.config).await,
        Some(Commands::Directory(args)) => commands::resolve::directory(args, cli.config).await,
        Some(Commands::Tools { command }) => {
            commands::tools::handle_command(command, cli.config).await
        }
        Some(Commands::Db { command }) => commands::db::handle_command(command, cli.config).await,
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(())
}
