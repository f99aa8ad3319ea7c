//! Zebu Runtime - Replication and node orchestration
//!
//! This crate runs a replica:
//! - Replication engine (inbound gossip merge, periodic republish)
//! - Post chain reader
//! - Node facade over directory, engine and content store
//! - Configuration, log setup and health endpoints

pub mod config;
pub mod telemetry;
pub mod engine;
pub mod chain;
pub mod health;
pub mod node;

pub use config::*;
pub use engine::*;
pub use chain::*;
pub use node::*;
