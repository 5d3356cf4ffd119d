// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod embedding;
pub mod event_bus;
pub mod repositories;
pub mod secrets;

pub use embedding::OpenAIEmbeddingClient;
pub use event_bus::{EventBusError, InvalidationBus, InvalidationReceiver};
pub use secrets::{EnvCipher, SecretsError};
