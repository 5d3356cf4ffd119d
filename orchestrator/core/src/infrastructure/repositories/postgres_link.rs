// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Link Repository
//!
//! Production `LinkRepository` backed by the `delegation_links` table, with
//! display projections joined in from `agents` and `teams`.
//!
//! Full-text search runs against the generated `agents.search_document`
//! column. Deployments without the text search configuration (or with the
//! column dropped) surface `FullTextUnavailable` so the resolution engine can
//! fall back to vector search. Vector search reads the stored `REAL[]`
//! embeddings and scores them in-process with the shared cosine metric.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::embedding::cosine_similarity;
use crate::domain::link::{
    rank, AgentId, DelegateTarget, DelegationLink, LinkDirection, LinkDisplay, LinkId,
    LinkSettings, LinkStatus, ScoredTarget, TeamId,
};
use crate::domain::repository::{LinkRepository, RepositoryError};

const LINK_SELECT: &str = r#"
    SELECT
        l.id, l.source_agent_id, l.target_agent_id, l.direction, l.team_id,
        l.max_concurrent, l.settings, l.status, l.created_at, l.updated_at,
        sa.key AS source_key, sa.display_name AS source_display_name,
        ta.key AS target_key, ta.display_name AS target_display_name,
        t.name AS team_name
    FROM delegation_links l
    LEFT JOIN agents sa ON sa.id = l.source_agent_id
    LEFT JOIN agents ta ON ta.id = l.target_agent_id
    LEFT JOIN teams t ON t.id = l.team_id
"#;

// $1 is the delegating agent. `delegate_id` is the agent on the other end.
const TARGET_CTE: &str = r#"
    WITH candidate AS (
        SELECT
            l.*,
            CASE WHEN l.source_agent_id = $1 THEN l.target_agent_id ELSE l.source_agent_id END
                AS delegate_id
        FROM delegation_links l
        WHERE l.status = 'active'
          AND ((l.source_agent_id = $1 AND l.direction IN ('outbound', 'bidirectional'))
            OR (l.target_agent_id = $1 AND l.direction IN ('inbound', 'bidirectional')))
    )
    SELECT
        c.id, c.source_agent_id, c.target_agent_id, c.direction, c.team_id,
        c.max_concurrent, c.settings, c.status, c.created_at, c.updated_at,
        sa.key AS source_key, sa.display_name AS source_display_name,
        ta.key AS target_key, ta.display_name AS target_display_name,
        t.name AS team_name,
        c.delegate_id,
        d.description AS delegate_description,
        d.embedding AS delegate_embedding
"#;

const TARGET_FROM: &str = r#"
    FROM candidate c
    LEFT JOIN agents sa ON sa.id = c.source_agent_id
    LEFT JOIN agents ta ON ta.id = c.target_agent_id
    LEFT JOIN agents d ON d.id = c.delegate_id
    LEFT JOIN teams t ON t.id = c.team_id
"#;

/// Delegate target query with optional extra select columns and a tail
/// (filters, ordering, limit).
fn target_query(extra_columns: &str, tail: &str) -> String {
    format!("{}{}{}{}", TARGET_CTE, extra_columns, TARGET_FROM, tail)
}

// SQLSTATEs raised when the text search machinery is missing.
const FULL_TEXT_MISSING: [&str; 3] = ["42704", "42883", "42703"];

pub struct PostgresLinkRepository {
    pool: PgPool,
}

impl PostgresLinkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn link_from_row(row: &PgRow) -> Result<DelegationLink, RepositoryError> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;
    let max_concurrent: i64 = row.try_get("max_concurrent")?;
    let team_id: Option<Uuid> = row.try_get("team_id")?;

    Ok(DelegationLink {
        id: LinkId(row.try_get("id")?),
        source_agent_id: AgentId(row.try_get("source_agent_id")?),
        target_agent_id: AgentId(row.try_get("target_agent_id")?),
        direction: LinkDirection::parse(&direction)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        team_id: team_id.map(TeamId),
        max_concurrent: u32::try_from(max_concurrent).map_err(|_| {
            RepositoryError::Serialization(format!("max_concurrent out of range: {}", max_concurrent))
        })?,
        settings: LinkSettings::new(row.try_get::<String, _>("settings")?),
        status: LinkStatus::parse(&status)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        display: LinkDisplay {
            source_key: row.try_get("source_key")?,
            target_key: row.try_get("target_key")?,
            source_display_name: row.try_get("source_display_name")?,
            target_display_name: row.try_get("target_display_name")?,
            team_name: row.try_get("team_name")?,
        },
    })
}

/// Maps a [`target_query`] row. Returns the target and its stored embedding.
fn target_from_row(row: &PgRow) -> Result<(DelegateTarget, Option<Vec<f32>>), RepositoryError> {
    let link = link_from_row(row)?;
    let agent_id = AgentId(row.try_get("delegate_id")?);
    let (key, display_name) = if agent_id == link.target_agent_id {
        (link.display.target_key.clone(), link.display.target_display_name.clone())
    } else {
        (link.display.source_key.clone(), link.display.source_display_name.clone())
    };
    let embedding: Option<Vec<f32>> = row.try_get("delegate_embedding")?;

    let target = DelegateTarget {
        agent_id,
        agent_key: key.unwrap_or_else(|| agent_id.to_string()),
        display_name,
        description: row.try_get("delegate_description")?,
        team_name: link.display.team_name.clone(),
        link,
    };
    Ok((target, embedding))
}

fn map_search_error(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db
            .code()
            .is_some_and(|code| FULL_TEXT_MISSING.iter().any(|missing| code == *missing))
        {
            return RepositoryError::FullTextUnavailable(db.message().to_string());
        }
    }
    RepositoryError::from(err)
}

fn limit_param(limit: Option<usize>) -> Option<i64> {
    limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX))
}

#[async_trait]
impl LinkRepository for PostgresLinkRepository {
    async fn create(&self, link: &DelegationLink) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO delegation_links (
                id, source_agent_id, target_agent_id, direction, team_id,
                max_concurrent, settings, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(link.id.0)
        .bind(link.source_agent_id.0)
        .bind(link.target_agent_id.0)
        .bind(link.direction.as_str())
        .bind(link.team_id.map(|t| t.0))
        .bind(i64::from(link.max_concurrent))
        .bind(link.settings.as_str())
        .bind(link.status.as_str())
        .bind(link.created_at)
        .bind(link.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: LinkId) -> Result<Option<DelegationLink>, RepositoryError> {
        let sql = format!("{} WHERE l.id = $1", LINK_SELECT);
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(link_from_row).transpose()
    }

    async fn update(&self, link: &DelegationLink) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE delegation_links
            SET direction = $2, max_concurrent = $3, settings = $4, status = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(link.id.0)
        .bind(link.direction.as_str())
        .bind(i64::from(link.max_concurrent))
        .bind(link.settings.as_str())
        .bind(link.status.as_str())
        .bind(link.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("link {}", link.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: LinkId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM delegation_links WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_source(
        &self,
        agent_id: AgentId,
        include_disabled: bool,
    ) -> Result<Vec<DelegationLink>, RepositoryError> {
        let sql = format!(
            "{} WHERE l.source_agent_id = $1 AND ($2 OR l.status = 'active') ORDER BY l.created_at, l.id",
            LINK_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(agent_id.0)
            .bind(include_disabled)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(link_from_row).collect()
    }

    async fn list_by_target(
        &self,
        agent_id: AgentId,
        include_disabled: bool,
    ) -> Result<Vec<DelegationLink>, RepositoryError> {
        let sql = format!(
            "{} WHERE l.target_agent_id = $1 AND ($2 OR l.status = 'active') ORDER BY l.created_at, l.id",
            LINK_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(agent_id.0)
            .bind(include_disabled)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(link_from_row).collect()
    }

    async fn get_link_between(
        &self,
        from: AgentId,
        to: AgentId,
    ) -> Result<Option<DelegationLink>, RepositoryError> {
        let sql = format!(
            r#"{}
            WHERE l.status = 'active'
              AND ((l.source_agent_id = $1 AND l.target_agent_id = $2
                    AND l.direction IN ('outbound', 'bidirectional'))
                OR (l.source_agent_id = $2 AND l.target_agent_id = $1
                    AND l.direction IN ('inbound', 'bidirectional')))
            ORDER BY l.created_at, l.id
            LIMIT 1
            "#,
            LINK_SELECT
        );
        let row = sqlx::query(&sql)
            .bind(from.0)
            .bind(to.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(link_from_row).transpose()
    }

    async fn delegate_targets(&self, from: AgentId) -> Result<Vec<DelegateTarget>, RepositoryError> {
        let sql = target_query("", "ORDER BY c.created_at, c.delegate_id");
        let rows = sqlx::query(&sql)
            .bind(from.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| target_from_row(row).map(|(target, _)| target))
            .collect()
    }

    async fn search_delegate_targets(
        &self,
        from: AgentId,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredTarget>, RepositoryError> {
        let sql = target_query(
            ", ts_rank(d.search_document, plainto_tsquery('simple', $2))::float8 AS score",
            r#"
            WHERE d.search_document @@ plainto_tsquery('simple', $2)
            ORDER BY score DESC, c.created_at ASC, c.delegate_id ASC
            LIMIT $3
            "#,
        );
        let rows = sqlx::query(&sql)
            .bind(from.0)
            .bind(query)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_search_error)?;

        rows.iter()
            .map(|row| {
                let (target, _) = target_from_row(row)?;
                let score: f64 = row.try_get("score")?;
                Ok(ScoredTarget::new(target, score))
            })
            .collect()
    }

    async fn vector_search_delegate_targets(
        &self,
        from: AgentId,
        embedding: &[f32],
        limit: Option<usize>,
    ) -> Result<Vec<ScoredTarget>, RepositoryError> {
        let sql = target_query("", "");
        let rows = sqlx::query(&sql)
            .bind(from.0)
            .fetch_all(&self.pool)
            .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let (target, stored) = target_from_row(row)?;
                let score = stored
                    .as_deref()
                    .map(|stored| cosine_similarity(embedding, stored))
                    .unwrap_or(0.0);
                Ok(ScoredTarget::new(target, score))
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(rank(scored, limit.unwrap_or(usize::MAX)))
    }

    async fn delete_team_links_for_agent(
        &self,
        team_id: TeamId,
        agent_id: AgentId,
    ) -> Result<Vec<LinkId>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM delegation_links
            WHERE team_id = $1 AND (source_agent_id = $2 OR target_agent_id = $2)
            RETURNING id
            "#,
        )
        .bind(team_id.0)
        .bind(agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id").map(LinkId))
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        ids.sort();
        Ok(ids)
    }
}
