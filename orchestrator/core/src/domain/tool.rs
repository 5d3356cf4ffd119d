// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Capabilities and Custom Tools
//!
//! Every tool an agent can call lives in one flat namespace shared by three
//! sources: tools built into the runtime, tools discovered from MCP servers,
//! and user-defined custom tools. Custom tools are persisted; the other two
//! are fixed for the lifetime of the process.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Tool naming rules, custom tool aggregate and its read view

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DelegationError;
use crate::domain::link::AgentId;

/// Applied when a tool is created or updated without a positive timeout.
pub const DEFAULT_TOOL_TIMEOUT_SECONDS: u32 = 60;

static SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolId(pub Uuid);

impl ToolId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, DelegationError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| DelegationError::invalid(format!("malformed tool id '{}': {}", s, e)))
    }
}

impl Default for ToolId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A custom tool name: lowercase letters, digits and hyphens only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolName(String);

impl ToolName {
    pub fn parse(name: &str) -> Result<Self, DelegationError> {
        if SLUG.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(DelegationError::invalid(format!(
                "tool name '{}' must contain only lowercase letters, digits and hyphens",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ToolName {
    type Error = DelegationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ToolName> for String {
    fn from(name: ToolName) -> Self {
        name.0
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who owns a name in the capability namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSource {
    BuiltIn,
    Mcp { server: String },
    Custom { tool_id: ToolId },
}

impl ToolSource {
    /// Built-in and MCP names cannot be unregistered while the process runs.
    pub fn is_immutable(&self) -> bool {
        !matches!(self, ToolSource::Custom { .. })
    }
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolSource::BuiltIn => f.write_str("built-in tool"),
            ToolSource::Mcp { server } => write!(f, "MCP server '{}'", server),
            ToolSource::Custom { tool_id } => write!(f, "custom tool {}", tool_id),
        }
    }
}

/// Encrypted environment blob. Only the secrets layer can open it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedEnv(String);

impl SealedEnv {
    pub fn from_ciphertext(ciphertext: impl Into<String>) -> Self {
        Self(ciphertext.into())
    }

    pub fn ciphertext(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SealedEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealedEnv(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTool {
    pub id: ToolId,
    pub name: ToolName,
    pub description: String,
    pub parameters: Value,
    pub command: String,
    pub working_dir: Option<String>,
    pub timeout_seconds: u32,
    pub env: Option<SealedEnv>,
    /// `None` makes the tool visible to every agent.
    pub agent_id: Option<AgentId>,
    pub enabled: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomTool {
    pub fn visible_to(&self, agent_id: Option<AgentId>) -> bool {
        match (self.agent_id, agent_id) {
            (None, _) => true,
            (Some(owner), Some(agent)) => owner == agent,
            (Some(_), None) => false,
        }
    }

    pub fn view(&self) -> CustomToolView {
        CustomToolView {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            timeout_seconds: self.timeout_seconds,
            has_env: self.env.is_some(),
            agent_id: self.agent_id,
            enabled: self.enabled,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// What every read path returns. The sealed env never leaves the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomToolView {
    pub id: ToolId,
    pub name: ToolName,
    pub description: String,
    pub parameters: Value,
    pub command: String,
    pub working_dir: Option<String>,
    pub timeout_seconds: u32,
    pub has_env: bool,
    pub agent_id: Option<AgentId>,
    pub enabled: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn normalize_timeout(timeout_seconds: Option<i64>) -> u32 {
    match timeout_seconds {
        Some(t) if t > 0 => u32::try_from(t).unwrap_or(u32::MAX),
        _ => DEFAULT_TOOL_TIMEOUT_SECONDS,
    }
}

fn validate_parameters(parameters: &Value) -> Result<(), DelegationError> {
    match parameters {
        Value::Null | Value::Object(_) => Ok(()),
        _ => Err(DelegationError::invalid("tool parameters must be a JSON object schema")),
    }
}

fn validate_command(command: &str) -> Result<(), DelegationError> {
    if command.trim().is_empty() {
        return Err(DelegationError::invalid("tool command cannot be empty"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCustomTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NewCustomTool {
    /// Validates the input and returns the parsed name.
    pub fn validate(&self) -> Result<ToolName, DelegationError> {
        let name = ToolName::parse(&self.name)?;
        validate_command(&self.command)?;
        validate_parameters(&self.parameters)?;
        Ok(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomToolUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: Option<Value>,
    pub command: Option<String>,
    pub working_dir: Option<String>,
    pub timeout_seconds: Option<i64>,
    pub env: Option<HashMap<String, String>>,
    pub agent_id: Option<AgentId>,
    pub enabled: Option<bool>,
}

impl CustomToolUpdate {
    /// Validates the present fields and returns the parsed new name, if any.
    pub fn validate(&self) -> Result<Option<ToolName>, DelegationError> {
        let name = self.name.as_deref().map(ToolName::parse).transpose()?;
        if let Some(command) = &self.command {
            validate_command(command)?;
        }
        if let Some(parameters) = &self.parameters {
            validate_parameters(parameters)?;
        }
        Ok(name)
    }

    /// Applies every field except `env`, which the service seals separately.
    pub fn apply_to(&self, tool: &mut CustomTool, name: Option<ToolName>, now: DateTime<Utc>) {
        if let Some(name) = name {
            tool.name = name;
        }
        if let Some(description) = &self.description {
            tool.description = description.clone();
        }
        if let Some(parameters) = &self.parameters {
            tool.parameters = parameters.clone();
        }
        if let Some(command) = &self.command {
            tool.command = command.clone();
        }
        if let Some(working_dir) = &self.working_dir {
            tool.working_dir = Some(working_dir.clone());
        }
        if self.timeout_seconds.is_some() {
            tool.timeout_seconds = normalize_timeout(self.timeout_seconds);
        }
        if let Some(agent_id) = self.agent_id {
            tool.agent_id = Some(agent_id);
        }
        if let Some(enabled) = self.enabled {
            tool.enabled = enabled;
        }
        tool.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slug_rules() {
        assert!(ToolName::parse("deploy-app").is_ok());
        assert!(ToolName::parse("k8s-rollout-2").is_ok());
        assert!(ToolName::parse("My Tool").is_err());
        assert!(ToolName::parse("under_score").is_err());
        assert!(ToolName::parse("Upper").is_err());
        assert!(ToolName::parse("").is_err());
    }

    #[test]
    fn test_timeout_normalization() {
        assert_eq!(normalize_timeout(None), 60);
        assert_eq!(normalize_timeout(Some(0)), 60);
        assert_eq!(normalize_timeout(Some(-5)), 60);
        assert_eq!(normalize_timeout(Some(15)), 15);
        assert_eq!(normalize_timeout(Some(i64::MAX)), u32::MAX);
    }

    #[test]
    fn test_new_tool_validation() {
        let mut input = NewCustomTool {
            name: "lint".into(),
            command: "cargo clippy".into(),
            parameters: json!({"type": "object"}),
            ..Default::default()
        };
        assert_eq!(input.validate().unwrap().as_str(), "lint");

        input.command = "   ".into();
        assert!(input.validate().is_err());

        input.command = "ok".into();
        input.parameters = json!([1, 2]);
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_sealed_env_is_redacted_in_debug() {
        let env = SealedEnv::from_ciphertext("c2VjcmV0");
        assert_eq!(format!("{:?}", env), "SealedEnv(<redacted>)");
    }

    #[test]
    fn test_view_hides_env() {
        let now = Utc::now();
        let tool = CustomTool {
            id: ToolId::new(),
            name: ToolName::parse("fetch").unwrap(),
            description: String::new(),
            parameters: Value::Null,
            command: "curl".into(),
            working_dir: None,
            timeout_seconds: 60,
            env: Some(SealedEnv::from_ciphertext("abc")),
            agent_id: None,
            enabled: true,
            created_by: "admin".into(),
            created_at: now,
            updated_at: now,
        };
        let view = serde_json::to_value(tool.view()).unwrap();
        assert_eq!(view["has_env"], json!(true));
        assert!(view.get("env").is_none());
    }

    #[test]
    fn test_visibility_scoping() {
        let owner = AgentId::new();
        let now = Utc::now();
        let mut tool = CustomTool {
            id: ToolId::new(),
            name: ToolName::parse("scoped").unwrap(),
            description: String::new(),
            parameters: Value::Null,
            command: "true".into(),
            working_dir: None,
            timeout_seconds: 60,
            env: None,
            agent_id: Some(owner),
            enabled: true,
            created_by: "admin".into(),
            created_at: now,
            updated_at: now,
        };
        assert!(tool.visible_to(Some(owner)));
        assert!(!tool.visible_to(Some(AgentId::new())));
        assert!(!tool.visible_to(None));

        tool.agent_id = None;
        assert!(tool.visible_to(Some(AgentId::new())));
    }
}
