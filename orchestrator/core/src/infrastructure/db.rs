// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is
//! injected into the PostgreSQL repository implementations, and owns the
//! embedded schema migrations.

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::domain::repository::PostgresConfig;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Migration bookkeeping reported by [`Database::migration_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: usize,
    pub available: usize,
    pub pending: Vec<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.connection_string)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply every pending migration.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .context("Failed to apply migrations")?;
        info!("Database schema is up to date");
        Ok(())
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        // The bookkeeping table does not exist before the first run.
        let applied = sqlx::query("SELECT version FROM _sqlx_migrations")
            .fetch_all(&self.pool)
            .await
            .map(|rows| rows.len())
            .unwrap_or(0);

        let available = MIGRATOR.iter().count();
        let pending = MIGRATOR
            .iter()
            .skip(applied)
            .map(|m| format!("{} {}", m.version, m.description))
            .collect();

        Ok(MigrationStatus {
            applied,
            available,
            pending,
        })
    }
}
