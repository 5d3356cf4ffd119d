// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Delegation Error Taxonomy
//!
//! The typed failures every public engine operation returns. Callers match on
//! the variant to decide between surfacing, retrying with backoff, or
//! choosing another name.
//!
//! | Variant | Recoverable by | Retried automatically |
//! |---------|----------------|-----------------------|
//! | `DelegationNotAuthorized` | caller picks another target | never |
//! | `AdmissionRejected` | caller retry / backoff | never (by the engine) |
//! | `NameCollision` | user picks another name | never |
//! | `EmbeddingUnavailable` | full-text fallback | n/a |
//! | `StoreUnavailable` | caller retry | never swallowed |
//! | `InvalidInput` | caller fixes input | never |

use crate::domain::link::{AgentId, LinkId};
use crate::domain::repository::RepositoryError;
use crate::domain::tool::ToolSource;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DelegationError {
    #[error("agent {from} is not authorized to delegate to {to}")]
    DelegationNotAuthorized { from: AgentId, to: AgentId },

    #[error("link {link_id} is at capacity ({in_flight}/{max_concurrent} in flight)")]
    AdmissionRejected {
        link_id: LinkId,
        in_flight: u32,
        max_concurrent: u32,
    },

    /// `existing` is `None` when the store rejected the name but the owning
    /// record could not be read back.
    #[error("capability name '{name}' is already registered by {}", owner(.existing))]
    NameCollision {
        name: String,
        existing: Option<ToolSource>,
    },

    #[error("capability '{0}' is provided by the runtime and cannot be removed")]
    ImmutableCapability(String),

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl DelegationError {
    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DelegationError::AdmissionRejected { .. } | DelegationError::StoreUnavailable(_)
        )
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        DelegationError::InvalidInput(message.into())
    }
}

fn owner(existing: &Option<ToolSource>) -> String {
    match existing {
        Some(source) => source.to_string(),
        None => "an unknown owner".to_string(),
    }
}

impl From<RepositoryError> for DelegationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => DelegationError::NotFound(what),
            // Conflicts that reach this conversion were not claimed by a more
            // specific handler (tool names are mapped by the tool service).
            RepositoryError::Conflict { constraint, detail } => {
                DelegationError::InvalidInput(format!("{} violated: {}", constraint, detail))
            }
            RepositoryError::FullTextUnavailable(msg) => DelegationError::StoreUnavailable(msg),
            RepositoryError::Unavailable(msg) => DelegationError::StoreUnavailable(msg),
            RepositoryError::Serialization(msg) => DelegationError::StoreUnavailable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let rejected = DelegationError::AdmissionRejected {
            link_id: LinkId::new(),
            in_flight: 1,
            max_concurrent: 1,
        };
        assert!(rejected.is_retryable());
        assert!(DelegationError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!DelegationError::DelegationNotAuthorized {
            from: AgentId::new(),
            to: AgentId::new(),
        }
        .is_retryable());
        assert!(!DelegationError::invalid("bad").is_retryable());
    }

    #[test]
    fn test_repository_errors_map_to_store_unavailable() {
        let err: DelegationError = RepositoryError::Unavailable("connection reset".into()).into();
        assert_eq!(err, DelegationError::StoreUnavailable("connection reset".into()));

        let err: DelegationError = RepositoryError::NotFound("link".into()).into();
        assert!(matches!(err, DelegationError::NotFound(_)));
    }
}
