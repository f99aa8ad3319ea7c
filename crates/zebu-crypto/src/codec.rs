//! Record signature codec
//!
//! Records are signed the way wallets sign personal messages: the canonical
//! record JSON is hashed under the `"\x19Ethereum Signed Message:\n<len>"`
//! prefix with Keccak-256, and the 65-byte recoverable signature is stored as
//! `r || s || v`. The prefix keeps a record signature from ever being valid as
//! a transaction or any other payload signed with the same key.
//!
//! Two conventions for `v` exist in the wild: raw recovery ids (0/1) and the
//! yellow-paper form (27/28). Both verify; signing always emits 27/28.

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

use zebu_core::{
    Identity, NameRecord, RecordSignature, ZebuError, ZebuResult, RECORD_VERSION, SIGNATURE_LEN,
};

use crate::identity::{identity_of, Keypair};

/// Offset added to the recovery id in the yellow-paper `v` convention
pub const RECOVERY_ID_OFFSET: u8 = 27;

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";

/// Hash a message under the personal-message domain prefix
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX);
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Sign a message, returning `r || s || v` with `v` in 27/28 form
pub fn sign_message(keypair: &Keypair, message: &[u8]) -> ZebuResult<[u8; SIGNATURE_LEN]> {
    let prehash = personal_message_hash(message);
    let signature: Signature = keypair
        .signing_key()
        .sign_prehash(&prehash)
        .map_err(|e| ZebuError::Crypto(e.to_string()))?;
    let recovery_id =
        RecoveryId::trial_recovery_from_prehash(keypair.verifying_key(), &prehash, &signature)
            .map_err(|e| ZebuError::Crypto(e.to_string()))?;

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte() + RECOVERY_ID_OFFSET;
    Ok(out)
}

/// Recover the identity that produced `signature` over `message`
pub fn recover_signer(message: &[u8], signature: &[u8]) -> ZebuResult<Identity> {
    if signature.len() != SIGNATURE_LEN {
        return Err(ZebuError::Crypto(format!(
            "signature is {} bytes, expected {}",
            signature.len(),
            SIGNATURE_LEN
        )));
    }

    let recovery_id = normalize_v(signature[64])
        .ok_or_else(|| ZebuError::Crypto(format!("invalid recovery byte {}", signature[64])))?;
    let mut sig =
        Signature::from_slice(&signature[..64]).map_err(|e| ZebuError::Crypto(e.to_string()))?;

    // Recovery only accepts low-S; (r, n - s) recovers the same key with the
    // parity of R flipped.
    let mut recovery_id = recovery_id;
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let prehash = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| ZebuError::Crypto(e.to_string()))?;
    Ok(identity_of(&key))
}

/// Map either `v` convention onto a recovery id
fn normalize_v(v: u8) -> Option<RecoveryId> {
    let raw = match v {
        0 | 1 => v,
        27 | 28 => v - RECOVERY_ID_OFFSET,
        _ => return None,
    };
    RecoveryId::from_byte(raw)
}

/// Sign a record with the owner's keypair, replacing any existing signature
pub fn sign_record(record: &NameRecord, keypair: &Keypair) -> ZebuResult<NameRecord> {
    if record.owner != keypair.identity() {
        return Err(ZebuError::Crypto(format!(
            "record owner {} does not match key {}",
            record.owner,
            keypair.identity()
        )));
    }
    if record.version > RECORD_VERSION {
        return Err(ZebuError::UnsupportedVersion(record.version));
    }
    let canonical = record.canonical_bytes()?;
    let signature = sign_message(keypair, &canonical)?;

    let mut signed = record.without_signature();
    signed.signature = Some(RecordSignature::from_bytes(signature.to_vec()));
    Ok(signed)
}

/// Check that a record's signature recovers to its owner
///
/// Never errors: anything malformed is simply untrusted.
pub fn verify_record(record: &NameRecord) -> bool {
    let Some(signature) = record.signature.as_ref() else {
        tracing::debug!(owner = %record.owner, "record is unsigned");
        return false;
    };
    if record.version > RECORD_VERSION {
        tracing::debug!(owner = %record.owner, version = record.version, "unsupported record version");
        return false;
    }
    let canonical = match record.canonical_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(owner = %record.owner, error = %e, "could not canonicalize record");
            return false;
        }
    };

    match recover_signer(&canonical, signature.as_bytes()) {
        Ok(signer) if signer == record.owner => true,
        Ok(signer) => {
            tracing::debug!(owner = %record.owner, %signer, "signature recovers to a different identity");
            false
        }
        Err(e) => {
            tracing::debug!(owner = %record.owner, error = %e, "signature recovery failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use zebu_core::{ContentId, LEGACY_RECORD_VERSION};

    const ACCOUNT: &str = "0xCbd6073f486714E6641bf87c22A9CEc25aCf5804";

    fn legacy_record(cid: &str, sequence: u64, signature: &str) -> NameRecord {
        NameRecord {
            content_id: ContentId::from(cid),
            sequence,
            signature: Some(RecordSignature::from_hex(signature).unwrap()),
            owner: Identity::parse(ACCOUNT).unwrap(),
            version: LEGACY_RECORD_VERSION,
        }
    }

    #[test]
    fn test_recover_fixture_message() {
        let sig = hex::decode("3af8f094d62c1db889050993f803d59844f90cb2eec606353001a38c2a55c43934e5118b829afd8575a19492eb9262c2bbea1d73886ef9772c4f8e75e1d162351c").unwrap();
        let signer = recover_signer(b"TESTTEST", &sig).unwrap();
        assert_eq!(signer.to_string(), ACCOUNT);
    }

    #[test]
    fn test_fixture_records_verify() {
        let first = legacy_record(
            "QmP95DscnxiNzzDJ7wcivJNKe1xNCRzxh8Td9Uo5focKpZ",
            1,
            "0x45480889de60205eb8acc159f812a6d965c6c7b303d0efaf91ab211132dc9bd70be2f8c5f85d913226f4259f1da021c0dd8b9c4a1f677a4e52cb3a8cc9e209361b",
        );
        assert!(verify_record(&first));

        let sixth = legacy_record(
            "Qmd8fBSQeJ2MNkALQiLCFihymSAM4o7i13VnEJSAofAZWb",
            6,
            "59657ed9783c2fcce688c93b2f3a2196ce7fd07b2e2cca52c3a1bcde97db68136353d83304a27d0fd4824bbedcc75834e191034ba1d6b409d4e2f3c5e742f0051b",
        );
        assert!(verify_record(&sixth));
    }

    #[test]
    fn test_fixture_tampering_fails() {
        let mut record = legacy_record(
            "Qmd8fBSQeJ2MNkALQiLCFihymSAM4o7i13VnEJSAofAZWb",
            6,
            "0x59657ed9783c2fcce688c93b2f3a2196ce7fd07b2e2cca52c3a1bcde97db68136353d83304a27d0fd4824bbedcc75834e191034ba1d6b409d4e2f3c5e742f0051b",
        );
        record.sequence = 7;
        assert!(!verify_record(&record));
    }

    #[test]
    fn test_raw_recovery_id_is_accepted() {
        let mut sig = hex::decode("59657ed9783c2fcce688c93b2f3a2196ce7fd07b2e2cca52c3a1bcde97db68136353d83304a27d0fd4824bbedcc75834e191034ba1d6b409d4e2f3c5e742f0051b").unwrap();
        sig[64] -= RECOVERY_ID_OFFSET;
        let record = legacy_record(
            "Qmd8fBSQeJ2MNkALQiLCFihymSAM4o7i13VnEJSAofAZWb",
            6,
            &hex::encode(&sig),
        );
        assert!(verify_record(&record));
    }

    #[test]
    fn test_sign_verify() {
        let keypair = Keypair::generate();
        let record = NameRecord::unsigned(keypair.identity(), ContentId::from("Qmabc"), 6);

        let signed = sign_record(&record, &keypair).unwrap();
        let v = signed.signature.as_ref().unwrap().as_bytes()[64];
        assert!(v == 27 || v == 28);
        assert!(verify_record(&signed));

        // wire roundtrip keeps it valid
        let decoded = NameRecord::decode(&signed.encode().unwrap()).unwrap();
        assert!(verify_record(&decoded));
    }

    #[test]
    fn test_sign_rejects_foreign_owner() {
        let keypair = Keypair::generate();
        let other = Keypair::generate();
        let record = NameRecord::unsigned(other.identity(), ContentId::from("Qmabc"), 1);
        assert!(sign_record(&record, &keypair).is_err());
    }

    #[test]
    fn test_signature_from_wrong_key_fails() {
        let owner = Keypair::generate();
        let forger = Keypair::generate();
        let mut record = NameRecord::unsigned(owner.identity(), ContentId::from("Qmabc"), 9);
        let sig = sign_message(&forger, &record.canonical_bytes().unwrap()).unwrap();
        record.signature = Some(RecordSignature::from_bytes(sig.to_vec()));
        assert!(!verify_record(&record));
    }

    #[test]
    fn test_malformed_signatures_never_verify() {
        let keypair = Keypair::generate();
        let signed = sign_record(
            &NameRecord::unsigned(keypair.identity(), ContentId::from("Qmabc"), 1),
            &keypair,
        )
        .unwrap();
        let good = signed.signature.clone().unwrap();

        let mut record = signed.clone();
        record.signature = None;
        assert!(!verify_record(&record));

        record.signature = Some(RecordSignature::from_bytes(&good.as_bytes()[..64]));
        assert!(!verify_record(&record));

        let mut bad_v = good.as_bytes().to_vec();
        bad_v[64] = 35;
        record.signature = Some(RecordSignature::from_bytes(bad_v));
        assert!(!verify_record(&record));

        record.signature = Some(RecordSignature::from_bytes(vec![0u8; SIGNATURE_LEN]));
        assert!(!verify_record(&record));

        record.signature = Some(RecordSignature::from_bytes(vec![0xffu8; SIGNATURE_LEN]));
        assert!(!verify_record(&record));
    }

    #[test]
    fn test_future_version_is_untrusted() {
        let keypair = Keypair::generate();
        let mut record = NameRecord::unsigned(keypair.identity(), ContentId::from("Qmabc"), 1);
        record.version = RECORD_VERSION + 1;
        let sig = sign_message(&keypair, &record.canonical_bytes().unwrap()).unwrap();
        record.signature = Some(RecordSignature::from_bytes(sig.to_vec()));
        assert!(!verify_record(&record));
    }

    #[test]
    fn test_sign_refuses_future_version() {
        let keypair = Keypair::generate();
        let mut record = NameRecord::unsigned(keypair.identity(), ContentId::from("Qmabc"), 1);
        record.version = RECORD_VERSION + 1;
        assert!(matches!(
            sign_record(&record, &keypair),
            Err(ZebuError::UnsupportedVersion(v)) if v == RECORD_VERSION + 1
        ));
    }

    #[test]
    fn test_high_s_signature_still_recovers() {
        // secp256k1 group order
        const N: [u8; 32] = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c,
            0xd0, 0x36, 0x41, 0x41,
        ];

        let keypair = Keypair::generate();
        let message = b"high s";
        let sig = sign_message(&keypair, message).unwrap();

        // s' = n - s, and flip the parity bit
        let mut flipped = sig;
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let diff = N[i] as i16 - sig[32 + i] as i16 - borrow;
            flipped[32 + i] = diff.rem_euclid(256) as u8;
            borrow = if diff < 0 { 1 } else { 0 };
        }
        flipped[64] = if sig[64] == 27 { 28 } else { 27 };

        assert_eq!(recover_signer(message, &flipped).unwrap(), keypair.identity());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_signed_records_verify_only_unchanged(
            cid in "Qm[a-zA-Z0-9]{20,44}",
            sequence in 1u64..u64::MAX,
        ) {
            let keypair = Keypair::generate();
            let record = NameRecord::unsigned(keypair.identity(), ContentId::from(cid.as_str()), sequence);
            let signed = sign_record(&record, &keypair).unwrap();
            prop_assert!(verify_record(&signed));

            let mut bumped = signed.clone();
            bumped.sequence = sequence.wrapping_add(1);
            prop_assert!(!verify_record(&bumped));
        }
    }
}
