// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::link::LinkId;
use crate::domain::tool::ToolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationKind {
    Link,
    CustomTool,
}

impl InvalidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationKind::Link => "link",
            InvalidationKind::CustomTool => "custom_tool",
        }
    }
}

/// Key-only notification that cached state for `key` is stale.
///
/// Carries no payload: subscribers drop their entry and re-read the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub kind: InvalidationKind,
    pub key: String,
}

impl InvalidationEvent {
    pub fn link(id: LinkId) -> Self {
        Self {
            kind: InvalidationKind::Link,
            key: id.to_string(),
        }
    }

    pub fn custom_tool(id: ToolId) -> Self {
        Self {
            kind: InvalidationKind::CustomTool,
            key: id.to_string(),
        }
    }

    pub fn link_id(&self) -> Option<LinkId> {
        match self.kind {
            InvalidationKind::Link => LinkId::from_string(&self.key).ok(),
            InvalidationKind::CustomTool => None,
        }
    }

    pub fn tool_id(&self) -> Option<ToolId> {
        match self.kind {
            InvalidationKind::CustomTool => ToolId::from_string(&self.key).ok(),
            InvalidationKind::Link => None,
        }
    }
}

impl fmt::Display for InvalidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.key)
    }
}
