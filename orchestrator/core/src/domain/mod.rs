// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Links, capabilities, the error taxonomy and the store contracts the
//! engine is written against. Nothing in here performs I/O.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Aggregates, value objects and ports

pub mod agent;
pub mod embedding;
pub mod errors;
pub mod events;
pub mod link;
pub mod node_config;
pub mod repository;
pub mod tool;
