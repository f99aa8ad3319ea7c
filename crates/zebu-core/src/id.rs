//! Identity types for the zebu naming layer
//!
//! An [`Identity`] is the 20-byte address derived from a secp256k1 public key.
//! A [`ContentId`] is whatever opaque string the content store hands back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::{ZebuError, ZebuResult};

/// Length of an identity address in bytes
pub const IDENTITY_LEN: usize = 20;

/// Identity - last 20 bytes of the Keccak-256 hash of an uncompressed public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    pub const ZERO: Identity = Identity([0u8; IDENTITY_LEN]);

    #[inline]
    pub fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Identity(bytes)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; IDENTITY_LEN] {
        self.0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// Derive an identity from the 64-byte `x || y` encoding of a public key
    pub fn from_public_key(uncompressed_xy: &[u8; 64]) -> Self {
        let hash = Keccak256::digest(uncompressed_xy);
        let mut bytes = [0u8; IDENTITY_LEN];
        bytes.copy_from_slice(&hash[32 - IDENTITY_LEN..]);
        Identity(bytes)
    }

    /// Parse `0x`-prefixed (or bare) hex, any letter case
    pub fn parse(s: &str) -> ZebuResult<Self> {
        let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if digits.len() != IDENTITY_LEN * 2 {
            return Err(ZebuError::InvalidIdentity(s.to_string()));
        }
        let mut bytes = [0u8; IDENTITY_LEN];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|_| ZebuError::InvalidIdentity(s.to_string()))?;
        Ok(Identity(bytes))
    }

    /// EIP-55 mixed-case checksum encoding, `0x` prefixed
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(2 + lower.len());
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_checksum())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl FromStr for Identity {
    type Err = ZebuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identity::parse(s)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identity::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Content identifier handed out by the content store
///
/// The empty id means "no content", which is how the end of a post chain and
/// a profile without posts are encoded on the wire.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        ContentId(id.into())
    }

    /// The "no content" marker
    pub fn empty() -> Self {
        ContentId(String::new())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `None` for the empty marker
    pub fn non_empty(&self) -> Option<&ContentId> {
        (!self.is_empty()).then_some(self)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        ContentId(s.to_string())
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        ContentId(s)
    }
}
