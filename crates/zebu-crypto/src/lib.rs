//! Zebu Crypto - Record authentication without a certificate authority
//!
//! Provides:
//! - secp256k1 keypairs whose public key hash is the owner identity
//! - Recoverable signatures over canonical name records
//! - Verification by recovering the signer and comparing identities

pub mod codec;
pub mod identity;

pub use codec::*;
pub use identity::*;
