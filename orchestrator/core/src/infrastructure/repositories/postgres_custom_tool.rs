// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Custom Tool Repository
//!
//! Production `CustomToolRepository` backed by the `custom_tools` table. The
//! `custom_tools_name_key` unique constraint is the last line of defence for
//! the flat capability namespace; violations come back as
//! `RepositoryError::Conflict` naming it.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::link::AgentId;
use crate::domain::repository::{CustomToolRepository, RepositoryError};
use crate::domain::tool::{CustomTool, SealedEnv, ToolId, ToolName};

const TOOL_COLUMNS: &str = r#"
    id, name, description, parameters, command, working_dir, timeout_seconds,
    env, agent_id, enabled, created_by, created_at, updated_at
"#;

pub struct PostgresCustomToolRepository {
    pool: PgPool,
}

impl PostgresCustomToolRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn tool_from_row(row: &PgRow) -> Result<CustomTool, RepositoryError> {
    let name: String = row.try_get("name")?;
    let timeout_seconds: i64 = row.try_get("timeout_seconds")?;
    let env: Option<String> = row.try_get("env")?;
    let agent_id: Option<Uuid> = row.try_get("agent_id")?;

    Ok(CustomTool {
        id: ToolId(row.try_get("id")?),
        name: ToolName::parse(&name).map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        description: row.try_get("description")?,
        parameters: row.try_get::<Value, _>("parameters")?,
        command: row.try_get("command")?,
        working_dir: row.try_get("working_dir")?,
        timeout_seconds: u32::try_from(timeout_seconds).map_err(|_| {
            RepositoryError::Serialization(format!("timeout_seconds out of range: {}", timeout_seconds))
        })?,
        env: env.map(SealedEnv::from_ciphertext),
        agent_id: agent_id.map(AgentId),
        enabled: row.try_get("enabled")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl CustomToolRepository for PostgresCustomToolRepository {
    async fn create(&self, tool: &CustomTool) -> Result<(), RepositoryError> {
        let sql = format!(
            "INSERT INTO custom_tools ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            TOOL_COLUMNS
        );
        sqlx::query(&sql)
            .bind(tool.id.0)
            .bind(tool.name.as_str())
            .bind(&tool.description)
            .bind(&tool.parameters)
            .bind(&tool.command)
            .bind(tool.working_dir.as_deref())
            .bind(i64::from(tool.timeout_seconds))
            .bind(tool.env.as_ref().map(|e| e.ciphertext()))
            .bind(tool.agent_id.map(|a| a.0))
            .bind(tool.enabled)
            .bind(&tool.created_by)
            .bind(tool.created_at)
            .bind(tool.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get(&self, id: ToolId) -> Result<Option<CustomTool>, RepositoryError> {
        let sql = format!("SELECT {} FROM custom_tools WHERE id = $1", TOOL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(tool_from_row).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<CustomTool>, RepositoryError> {
        let sql = format!("SELECT {} FROM custom_tools WHERE name = $1", TOOL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(tool_from_row).transpose()
    }

    async fn update(&self, tool: &CustomTool) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE custom_tools
            SET name = $2, description = $3, parameters = $4, command = $5,
                working_dir = $6, timeout_seconds = $7, env = $8, agent_id = $9,
                enabled = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(tool.id.0)
        .bind(tool.name.as_str())
        .bind(&tool.description)
        .bind(&tool.parameters)
        .bind(&tool.command)
        .bind(tool.working_dir.as_deref())
        .bind(i64::from(tool.timeout_seconds))
        .bind(tool.env.as_ref().map(|e| e.ciphertext()))
        .bind(tool.agent_id.map(|a| a.0))
        .bind(tool.enabled)
        .bind(tool.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("custom tool {}", tool.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: ToolId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM custom_tools WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<CustomTool>, RepositoryError> {
        let sql = format!("SELECT {} FROM custom_tools ORDER BY name", TOOL_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(tool_from_row).collect()
    }
}
