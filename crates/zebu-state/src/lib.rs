//! Zebu State - Record directory
//!
//! This crate holds the replica's view of the naming layer:
//! - The record directory and its merge rule
//! - Durable per-identity record storage
//!
//! A record enters the directory only if it verifies against its owner and
//! carries a sequence strictly above the one already held.

pub mod directory;
pub mod storage;

pub use directory::*;
pub use storage::*;
