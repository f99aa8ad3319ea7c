//! Error types for the zebu naming layer

use std::time::Duration;

use thiserror::Error;

use crate::{ContentId, Identity};

/// Core zebu errors
#[derive(Error, Debug)]
pub enum ZebuError {
    // Identity and record errors
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Record for {0} is unsigned")]
    UnsignedRecord(Identity),

    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u32),

    #[error("Record for {owner} superseded: attempted seq {attempted}, current seq {current}; retry with a fresh sequence")]
    Superseded {
        owner: Identity,
        attempted: u64,
        current: u64,
    },

    #[error("No record for {0}")]
    NotFound(Identity),

    // Encoding errors
    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    // Crypto errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    // I/O errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Content {0} not found")]
    ContentNotFound(ContentId),

    #[error("Content store error: {0}")]
    ContentStore(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Subscription to {0} closed")]
    SubscriptionClosed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    // Setup errors
    #[error("Config error: {0}")]
    Config(String),
}

impl ZebuError {
    /// Stale-sequence outcomes are expected races, not failures of the writer
    pub fn is_superseded(&self) -> bool {
        matches!(self, ZebuError::Superseded { .. })
    }
}

impl From<serde_json::Error> for ZebuError {
    fn from(e: serde_json::Error) -> Self {
        ZebuError::Decode(e.to_string())
    }
}

/// Result type for zebu operations
pub type ZebuResult<T> = Result<T, ZebuError>;
