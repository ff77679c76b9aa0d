//! Infrastructure layer: persistence, configuration and the engine services
//! that tie the domain crates together.

pub mod config;
pub mod engine;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError, EngineResult};
pub use store::{EngineStore, InMemoryStore, PostgresStore, StoreError};
