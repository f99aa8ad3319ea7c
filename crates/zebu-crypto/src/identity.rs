//! Signing keypairs on secp256k1

use std::fs;
use std::io::Write;
use std::path::Path;

use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use rand::rngs::OsRng;

use zebu_core::{Identity, ZebuError, ZebuResult};

/// Keypair for an identity. Only ever held by the record owner; replicas
/// never see one.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    identity: Identity,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Create keypair from existing secret scalar bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> ZebuResult<Self> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|e| ZebuError::Crypto(e.to_string()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let identity = identity_of(signing_key.verifying_key());
        Keypair {
            signing_key,
            identity,
        }
    }

    /// Get the secret scalar bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    /// Get the identity (address derived from the public key)
    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Load a hex-encoded secret from a key file
    pub fn load(path: impl AsRef<Path>) -> ZebuResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ZebuError::Storage(format!("read {}: {e}", path.display())))?;
        let mut secret = [0u8; 32];
        hex::decode_to_slice(text.trim(), &mut secret)
            .map_err(|e| ZebuError::Crypto(format!("key file {} is not a hex secret: {e}", path.display())))?;
        Self::from_bytes(&secret)
    }

    /// Write the secret to a key file, readable only by the owner on unix
    pub fn save(&self, path: impl AsRef<Path>) -> ZebuResult<()> {
        let path = path.as_ref();
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .map_err(|e| ZebuError::Storage(format!("create {}: {e}", path.display())))?;
        file.write_all(hex::encode(self.secret_bytes()).as_bytes())
            .map_err(|e| ZebuError::Storage(format!("write {}: {e}", path.display())))
    }

    /// Load the key at `path`, generating and saving a fresh one if absent
    pub fn load_or_generate(path: impl AsRef<Path>) -> ZebuResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let keypair = Self::generate();
        keypair.save(path)?;
        tracing::info!(identity = %keypair.identity(), path = %path.display(), "generated key");
        Ok(keypair)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Derive the identity for a public key
pub fn identity_of(verifying_key: &VerifyingKey) -> Identity {
    let point = PublicKey::from(verifying_key).to_encoded_point(false);
    let mut xy = [0u8; 64];
    // drop the 0x04 uncompressed tag
    xy.copy_from_slice(&point.as_bytes()[1..]);
    Identity::from_public_key(&xy)
}
