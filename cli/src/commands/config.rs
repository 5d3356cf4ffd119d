// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use switchyard_core::domain::node_config::NodeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./switchyard-config.yaml)
        #[arg(short, long, default_value = "./switchyard-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, yaml: bool) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SWITCHYARD_CONFIG_PATH: {}",
            std::env::var("SWITCHYARD_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./switchyard-config.yaml");
        println!("  4. ~/.switchyard/config.yaml");
        println!("  5. /etc/switchyard/config.yaml");
        println!();
    }

    if yaml {
        let rendered =
            serde_yaml::to_string(&config).context("Failed to render configuration")?;
        print!("{}", rendered);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node Identity:".bold());
    println!("  ID: {}", spec.node.id);
    if let Some(region) = &spec.node.region {
        println!("  Region: {}", region);
    }
    println!();

    println!("{}", "Storage:".bold());
    match &spec.database.url {
        Some(_) => println!(
            "  Backend: postgres (max {} connections)",
            spec.database.max_connections
        ),
        None => println!("  Backend: in-memory"),
    }
    println!();

    println!("{}", "Resolution:".bold());
    println!(
        "  Limits: default {}, max {}",
        spec.resolution.default_limit, spec.resolution.max_limit
    );
    match &spec.embedding {
        Some(embedding) => println!(
            "  Vector fallback: {} via {}",
            embedding.model, embedding.endpoint
        ),
        None => println!("  Vector fallback: {}", "disabled".dimmed()),
    }
    println!(
        "  Link cache TTL: {}s, registry resync: {}s",
        spec.cache.link_ttl_seconds, spec.cache.registry_resync_seconds
    );
    println!("  Bus capacity: {}", spec.bus.capacity);
    println!();

    println!("{}", "Capabilities:".bold());
    println!("  Built-in: {}", spec.tools.builtin.join(", "));
    for server in &spec.tools.mcp {
        println!("  MCP {}: {}", server.server.bold(), server.tools.join(", "));
    }
    println!(
        "  Env sealing key: {}",
        if spec.tools.env_key.is_some() {
            "configured".normal()
        } else {
            "ephemeral".yellow()
        }
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_templates_are_valid() {
        for template in [
            include_str!("../../templates/config-minimal.yaml"),
            include_str!("../../templates/config-with-examples.yaml"),
        ] {
            let config = switchyard_core::domain::node_config::NodeConfigManifest::from_yaml_str(
                template,
            )
            .unwrap();
            config.validate().unwrap();
        }
    }
}
