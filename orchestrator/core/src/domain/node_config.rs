// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a switchyard delegation node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Store backend selection (in-memory or PostgreSQL)
// - Cache TTLs and invalidation bus capacity
// - Resolution limits and the embedding provider
// - Built-in and MCP capability names seeded into the registry
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "switchyard.dev/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "switchyard.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NodeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    pub node: NodeIdentity,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Absent disables the vector-similarity fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingConfig>,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string; absent selects the in-memory store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on how long a resolver may serve a cached link view
    /// after missing an invalidation event
    #[serde(default = "default_link_ttl")]
    pub link_ttl_seconds: u64,

    /// Interval of the registry's full resync against the tool store
    #[serde(default = "default_registry_resync")]
    pub registry_resync_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber buffer; a subscriber lagging further loses events
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API base (e.g., "https://api.openai.com/v1")
    pub endpoint: String,

    pub model: String,

    /// API key or "env:VAR_NAME" reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_builtin_tools")]
    pub builtin: Vec<String>,

    #[serde(default)]
    pub mcp: Vec<McpServerTools>,

    /// Base64 AES-256 key, or "env:VAR_NAME" reference, sealing tool env
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerTools {
    pub server: String,

    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_link_ttl() -> u64 {
    30
}

fn default_registry_resync() -> u64 {
    60
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_limit() -> usize {
    5
}

fn default_max_limit() -> usize {
    50
}

fn default_embedding_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

pub fn default_builtin_tools() -> Vec<String> {
    [
        "bash",
        "exec",
        "read_file",
        "write_file",
        "edit_file",
        "list_files",
        "web_search",
        "web_fetch",
        "memory_search",
        "memory_get",
        "spawn",
        "delegate",
        "message",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            link_ttl_seconds: default_link_ttl(),
            registry_resync_seconds: default_registry_resync(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            builtin: default_builtin_tools(),
            mcp: vec![],
            env_key: None,
        }
    }
}

impl Default for NodeConfigSpec {
    fn default() -> Self {
        Self {
            node: NodeIdentity {
                id: uuid::Uuid::new_v4().to_string(),
                region: None,
            },
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            bus: BusConfig::default(),
            resolution: ResolutionConfig::default(),
            embedding: None,
            tools: ToolsConfig::default(),
            observability: None,
        }
    }
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "switchyard-node".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl CacheConfig {
    pub fn link_ttl(&self) -> Duration {
        Duration::from_secs(self.link_ttl_seconds)
    }

    pub fn registry_resync(&self) -> Duration {
        Duration::from_secs(self.registry_resync_seconds)
    }
}

/// Resolve a secret reference (supports "env:VAR_NAME" syntax)
pub fn resolve_secret(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => std::env::var(var_name)
            .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
        None => Ok(value.to_string()),
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SWITCHYARD_CONFIG_PATH environment variable
    /// 2. ./switchyard-config.yaml (working directory)
    /// 3. ~/.switchyard/config.yaml (user home)
    /// 4. /etc/switchyard/config.yaml (system, Unix) or C:\ProgramData\Switchyard\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SWITCHYARD_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./switchyard-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".switchyard").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/switchyard/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Switchyard\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SWITCHYARD_DATABASE_URL") {
            tracing::info!("Environment override: SWITCHYARD_DATABASE_URL");
            self.spec.database.url = Some(url);
        }

        if let Ok(level) = std::env::var("SWITCHYARD_LOG_LEVEL") {
            tracing::info!("Environment override: SWITCHYARD_LOG_LEVEL={}", level);
            let observability = self
                .spec
                .observability
                .get_or_insert(ObservabilityConfig { logging: None });
            let logging = observability.logging.get_or_insert(LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            });
            logging.level = level;
        }

        if let Ok(val) = std::env::var("SWITCHYARD_CACHE_TTL_SECONDS") {
            match val.parse::<u64>() {
                Ok(ttl) => {
                    tracing::info!("Environment override: SWITCHYARD_CACHE_TTL_SECONDS={}", ttl);
                    self.spec.cache.link_ttl_seconds = ttl;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for SWITCHYARD_CACHE_TTL_SECONDS: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match &self.spec.database.url {
            Some(url) => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: url.clone(),
                max_connections: self.spec.database.max_connections,
            }),
            None => StorageBackend::InMemory,
        }
    }

    pub fn log_level(&self) -> Option<&str> {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.logging.as_ref())
            .map(|l| l.level.as_str())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.node.id.is_empty() {
            anyhow::bail!("spec.node.id cannot be empty");
        }

        if self.spec.bus.capacity == 0 {
            anyhow::bail!("spec.bus.capacity must be greater than zero");
        }

        if self.spec.cache.link_ttl_seconds == 0 {
            anyhow::bail!("spec.cache.link_ttl_seconds must be greater than zero");
        }

        let resolution = &self.spec.resolution;
        if resolution.default_limit == 0 || resolution.default_limit > resolution.max_limit {
            anyhow::bail!(
                "spec.resolution.default_limit must be within 1..={} (got {})",
                resolution.max_limit,
                resolution.default_limit
            );
        }

        if let Some(embedding) = &self.spec.embedding {
            if embedding.endpoint.is_empty() {
                anyhow::bail!("spec.embedding.endpoint cannot be empty");
            }
            if embedding.model.is_empty() {
                anyhow::bail!("spec.embedding.model cannot be empty");
            }
        }

        let mut seen = HashSet::new();
        for name in &self.spec.tools.builtin {
            if !seen.insert(name.as_str()) {
                anyhow::bail!("Duplicate built-in tool name: {}", name);
            }
        }
        for server in &self.spec.tools.mcp {
            if server.server.is_empty() {
                anyhow::bail!("MCP server name cannot be empty");
            }
            for name in &server.tools {
                if !seen.insert(name.as_str()) {
                    anyhow::bail!(
                        "MCP tool '{}' from server '{}' collides with another registered name",
                        name,
                        server.server
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = NodeConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(manifest.spec.database.url.is_none());
        assert!(manifest.spec.tools.builtin.contains(&"bash".to_string()));
        assert!(matches!(manifest.storage_backend(), StorageBackend::InMemory));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_defaults_fill_missing_sections() {
        let yaml = r#"
apiVersion: switchyard.dev/v1
kind: NodeConfig
metadata:
  name: edge-1
spec:
  node:
    id: node-1
  tools:
    mcp:
      - server: github
        tools: [github-create-issue, github-list-prs]
"#;
        let manifest = NodeConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.cache.link_ttl_seconds, 30);
        assert_eq!(manifest.spec.bus.capacity, 1024);
        assert_eq!(manifest.spec.resolution.default_limit, 5);
        assert_eq!(manifest.spec.tools.builtin, default_builtin_tools());
        assert_eq!(manifest.spec.tools.mcp[0].tools.len(), 2);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut manifest = NodeConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.embedding = Some(EmbeddingConfig {
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            timeout_seconds: 5,
        });
        manifest.to_yaml_file(&path).unwrap();

        let parsed = NodeConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(parsed.metadata.name, "roundtrip");
        assert_eq!(parsed.spec.embedding.unwrap().model, "nomic-embed-text");
    }

    #[test]
    fn test_validation() {
        let mut manifest = NodeConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "WrongKind".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.bus.capacity = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.bus.capacity = 16;

        manifest.spec.resolution.default_limit = 100;
        assert!(manifest.validate().is_err());
        manifest.spec.resolution.default_limit = 5;

        manifest.spec.tools.mcp.push(McpServerTools {
            server: "shell".to_string(),
            tools: vec!["bash".to_string()],
        });
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_resolve_secret_literal_and_missing_env() {
        assert_eq!(resolve_secret("plain").unwrap(), "plain");
        assert!(resolve_secret("env:SWITCHYARD_TEST_SURELY_UNSET_VAR").is_err());
    }

    #[test]
    fn test_storage_backend_selection() {
        let mut manifest = NodeConfigManifest::default();
        manifest.spec.database.url = Some("postgres://localhost/switchyard".to_string());
        match manifest.storage_backend() {
            StorageBackend::PostgreSQL(config) => {
                assert_eq!(config.connection_string, "postgres://localhost/switchyard");
                assert_eq!(config.max_connections, 5);
            }
            StorageBackend::InMemory => panic!("expected PostgreSQL backend"),
        }
    }
}
