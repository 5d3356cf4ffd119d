// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Custom tool name checks
//!
//! Checks a prospective custom tool name against the slug rules and the
//! built-in and MCP names the node is configured with.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use switchyard_core::application::CapabilityRegistry;
use switchyard_core::domain::node_config::NodeConfigManifest;
use switchyard_core::domain::tool::ToolName;

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// Check whether NAME can be used for a custom tool
    Check {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List the built-in and MCP capability names
    List,
}

pub async fn handle_command(command: ToolsCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    let registry = CapabilityRegistry::from_config(&config.spec.tools)
        .context("Configured capability names collide")?;

    match command {
        ToolsCommand::Check { name } => check(&registry, &name),
        ToolsCommand::List => {
            for (name, source) in registry.entries() {
                println!("  {} {}", name.bold(), format!("({})", source).dimmed());
            }
            Ok(())
        }
    }
}

fn check(registry: &CapabilityRegistry, name: &str) -> Result<()> {
    if let Err(e) = ToolName::parse(name) {
        bail!("{}", e);
    }
    if let Some(existing) = registry.lookup(name) {
        bail!("'{}' is already registered by {}", name, existing);
    }
    println!("{}", format!("✓ '{}' is available", name).green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::domain::node_config::ToolsConfig;

    #[test]
    fn test_check_rules() {
        let registry = CapabilityRegistry::from_config(&ToolsConfig::default()).unwrap();
        assert!(check(&registry, "deploy-app").is_ok());
        assert!(check(&registry, "bash").is_err());
        assert!(check(&registry, "My Tool").is_err());
    }
}
