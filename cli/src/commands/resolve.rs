// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Offline resolution commands
//!
//! Loads a seed fixture into the in-memory store, starts an engine over it
//! with the node configuration, and runs one request.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use switchyard_core::application::repository_factory::create_embedding_provider;
use switchyard_core::application::{DelegationEngine, EngineStores, Resolution, ResolveRequest};
use switchyard_core::domain::node_config::NodeConfigManifest;
use switchyard_core::infrastructure::repositories::InMemoryCustomToolRepository;

use crate::fixture::{Fixture, LoadedFixture};

#[derive(Args)]
pub struct ResolveArgs {
    /// Fixture file describing agents, teams and links
    #[arg(long, value_name = "FILE")]
    fixture: PathBuf,

    /// Key of the delegating agent
    #[arg(long, value_name = "AGENT")]
    from: String,

    /// Key of an explicit target agent
    #[arg(long, value_name = "AGENT", conflicts_with = "query", required_unless_present = "query")]
    to: Option<String>,

    /// Task description to match against delegate targets
    #[arg(long, value_name = "TEXT")]
    query: Option<String>,

    /// Maximum number of candidates for a query
    #[arg(long)]
    limit: Option<usize>,

    /// Skip the vector fallback even if an embedding provider is configured
    #[arg(long)]
    no_embedding: bool,

    /// Print the resolution as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct DirectoryArgs {
    /// Fixture file describing agents, teams and links
    #[arg(long, value_name = "FILE")]
    fixture: PathBuf,

    /// Key of the agent whose delegates are listed
    #[arg(long, value_name = "AGENT")]
    from: String,
}

pub async fn resolve(args: ResolveArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let loaded = Fixture::from_file(&args.fixture)?.load().await?;
    let from = loaded.agent(&args.from)?;

    let request = match (&args.to, &args.query) {
        (Some(to), _) => ResolveRequest::explicit(loaded.agent(to)?),
        (None, Some(text)) => ResolveRequest::query(text.clone(), args.limit),
        (None, None) => anyhow::bail!("Either --to or --query is required"),
    };

    let embedder = if args.no_embedding {
        None
    } else {
        create_embedding_provider(config.spec.embedding.as_ref())?
    };
    let engine = start_engine(&config, &loaded, embedder).await?;

    let outcome = engine.resolve(from, &request).await;
    engine.shutdown().await;
    let resolution = outcome.with_context(|| format!("Resolution from '{}' failed", args.from))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&resolution).context("Failed to render resolution")?
        );
    } else {
        print_resolution(&resolution, &loaded);
    }
    Ok(())
}

pub async fn directory(args: DirectoryArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let loaded = Fixture::from_file(&args.fixture)?.load().await?;
    let from = loaded.agent(&args.from)?;

    let engine = start_engine(&config, &loaded, None).await?;
    let rendered = engine.delegate_directory(from).await;
    engine.shutdown().await;

    print!("{}", rendered.context("Failed to list delegate targets")?);
    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<NodeConfigManifest> {
    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

async fn start_engine(
    config: &NodeConfigManifest,
    loaded: &LoadedFixture,
    embedder: Option<Arc<dyn switchyard_core::domain::embedding::EmbeddingProvider>>,
) -> Result<DelegationEngine> {
    let stores = EngineStores {
        links: Arc::new(loaded.store.clone()),
        tools: Arc::new(InMemoryCustomToolRepository::new()),
    };
    DelegationEngine::start(config, stores, embedder).await
}

fn print_resolution(resolution: &Resolution, loaded: &LoadedFixture) {
    if resolution.full_text_unavailable {
        println!("{}", "! Full-text search unavailable".yellow());
    }
    if let Some(err) = &resolution.embedding_error {
        println!("{}", format!("! {}", err).yellow());
    }
    if resolution.is_empty() {
        println!("{}", "No delegate candidates.".dimmed());
        return;
    }

    println!(
        "{} ({})",
        "Candidates:".bold(),
        resolution.strategy.as_str()
    );
    for (rank, candidate) in resolution.candidates.iter().enumerate() {
        let target = &candidate.target;
        let key = loaded
            .key_of(target.agent_id)
            .unwrap_or(target.agent_key.as_str());
        let limit = match target.link.max_concurrent {
            0 => "unlimited".to_string(),
            n => format!("max {}", n),
        };
        println!(
            "  {}. {} score {:.3} via {} link ({})",
            rank + 1,
            key.bold(),
            candidate.score,
            target.link.direction.as_str(),
            limit
        );
        if let Some(description) = &target.description {
            println!("     {}", description.dimmed());
        }
        if !target.link.settings.as_str().is_empty() && target.link.settings.as_str() != "{}" {
            println!("     settings: {}", target.link.settings.as_str());
        }
    }
}
