// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Switchyard Core
//!
//! Decides, for a multi-agent backend, which agent may hand work to which,
//! how many delegations may run over a link at once, and which tool names
//! are taken.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Delegation resolution, admission control, capability registry

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
