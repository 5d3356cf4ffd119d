// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod admission;
pub mod capability_registry;
pub mod custom_tools;
pub mod directory;
pub mod engine;
pub mod link_cache;
pub mod links;
pub mod repository_factory;
pub mod resolution;

// Re-export services for convenience
pub use admission::{AdmissionController, AdmissionTicket, AdmittedError, LinkLoad};
pub use capability_registry::CapabilityRegistry;
pub use custom_tools::CustomToolService;
pub use directory::render_delegate_directory;
pub use engine::{DelegationEngine, EngineStores};
pub use links::LinkService;
pub use resolution::{Resolution, ResolutionEngine, ResolutionStrategy, ResolveRequest};
