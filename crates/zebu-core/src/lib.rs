//! Zebu Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every zebu crate:
//! - Identifiers (Identity, ContentId)
//! - Name records and their canonical encoding
//! - Profiles and posts stored in the content store
//! - Broadcast topic names
//! - The error taxonomy

pub mod id;
pub mod record;
pub mod profile;
pub mod topic;
pub mod error;

pub use id::*;
pub use record::*;
pub use profile::*;
pub use topic::*;
pub use error::*;
