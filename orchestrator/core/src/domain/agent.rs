// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

use crate::domain::link::{AgentId, TeamId};

/// Directory entry for an agent, as far as delegation needs to know it.
///
/// The `embedding` is precomputed from the agent's description by whatever
/// owns agent records; the engine only reads it for similarity ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub key: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl AgentProfile {
    pub fn new(id: AgentId, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            display_name: None,
            description: None,
            embedding: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Text indexed by full-text search.
    pub fn searchable_text(&self) -> String {
        [
            Some(self.key.as_str()),
            self.display_name.as_deref(),
            self.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamProfile {
    pub id: TeamId,
    pub name: String,
}
