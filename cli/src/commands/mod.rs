// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the switchyard CLI

pub mod config;
pub mod db;
pub mod resolve;
pub mod tools;

pub use self::config::ConfigCommand;
pub use self::db::DbCommand;
pub use self::resolve::ResolveArgs;
pub use self::tools::ToolsCommand;
