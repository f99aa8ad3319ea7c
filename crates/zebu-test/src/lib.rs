//! Zebu Test Harness - Chaos testing and replication validation
//!
//! This crate provides:
//! - A broadcast transport that loses, duplicates and reorders messages
//! - Multi-replica simulation over that transport
//! - Convergence tests and benchmarks

pub mod chaos;
pub mod simulator;

pub use chaos::*;
pub use simulator::*;
