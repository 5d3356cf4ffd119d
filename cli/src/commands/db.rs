// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Database schema commands
//!
//! `switchyard db migrate` applies the embedded schema migrations to the
//! configured PostgreSQL database; `--dry-run` lists what would be applied.
//! The database URL comes from `spec.database.url` or
//! `SWITCHYARD_DATABASE_URL`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use switchyard_core::domain::node_config::NodeConfigManifest;
use switchyard_core::domain::repository::{PostgresConfig, StorageBackend};
use switchyard_core::infrastructure::db::Database;

#[derive(Subcommand)]
pub enum DbCommand {
    /// Apply pending schema migrations
    Migrate {
        /// Perform a dry run without applying changes
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn handle_command(command: DbCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        DbCommand::Migrate { dry_run } => migrate(config_path, dry_run).await,
    }
}

async fn migrate(config_path: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    let StorageBackend::PostgreSQL(postgres) = config.storage_backend() else {
        anyhow::bail!(
            "No database configured. Set spec.database.url or SWITCHYARD_DATABASE_URL."
        );
    };

    println!("Connecting to database...");
    let db = Database::connect(&PostgresConfig {
        max_connections: 1,
        ..postgres
    })
    .await?;

    let status = db.migration_status().await?;
    println!(
        "Migration status: {} applied, {} total available.",
        status.applied, status.available
    );

    if status.pending.is_empty() {
        println!("{}", "✓ Database is up to date.".green());
        return Ok(());
    }

    if dry_run {
        println!("Pending migrations found (Dry Run):");
        for migration in &status.pending {
            println!(" - {}", migration);
        }
        println!("Skipping application due to --dry-run");
        return Ok(());
    }

    println!("Applying pending migrations...");
    db.migrate().await?;
    println!("{}", "✓ Database updated successfully.".green());
    Ok(())
}
