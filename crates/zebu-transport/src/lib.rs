//! Zebu Transport - Content store and broadcast contracts
//!
//! This crate provides:
//! - The content store contract (put/get opaque blobs by content id)
//! - The broadcast contract (topic publish/subscribe, lossy, unordered)
//! - In-memory implementations of both for tests and single-process networks

pub mod content;
pub mod broadcast;

pub use content::*;
pub use broadcast::*;
