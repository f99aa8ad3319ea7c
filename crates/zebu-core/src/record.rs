//! Name records - signed, sequenced pointers from an identity to its profile
//!
//! The JSON encoding doubles as the canonical signing input, so the field
//! order of [`NameRecord`] is part of the protocol and must not change:
//!
//! ```text
//! {"CID":"...","Sequence":1,"Signature":"0x...","PubKey":"0x...","Version":1}
//! ```
//!
//! `Signature` is left out of the canonical form. Records written before the
//! `Version` field existed carry no version and decode as version 0.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{ContentId, Identity, ZebuError, ZebuResult};

/// Length of a recoverable signature: `r || s || v`
pub const SIGNATURE_LEN: usize = 65;

/// Record schema version written by this implementation
pub const RECORD_VERSION: u32 = 1;

/// Records written before the schema carried a version
pub const LEGACY_RECORD_VERSION: u32 = 0;

/// Raw recoverable signature bytes
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RecordSignature(Vec<u8>);

impl RecordSignature {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        RecordSignature(bytes.into())
    }

    /// Parse hex with an optional `0x` prefix. Length is not checked here;
    /// a wrong-length signature simply fails verification.
    pub fn from_hex(s: &str) -> ZebuResult<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(digits)
            .map(RecordSignature)
            .map_err(|e| ZebuError::Decode(format!("signature is not hex: {e}")))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RecordSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig({})", self.to_hex())
    }
}

impl Serialize for RecordSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RecordSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RecordSignature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

fn is_legacy_version(version: &u32) -> bool {
    *version == LEGACY_RECORD_VERSION
}

/// Signed pointer from an owner identity to its current profile blob
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameRecord {
    #[serde(rename = "CID")]
    pub content_id: ContentId,

    #[serde(rename = "Sequence")]
    pub sequence: u64,

    #[serde(
        rename = "Signature",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_signature"
    )]
    pub signature: Option<RecordSignature>,

    #[serde(rename = "PubKey")]
    pub owner: Identity,

    #[serde(rename = "Version", default, skip_serializing_if = "is_legacy_version")]
    pub version: u32,
}

/// An empty signature string means "unsigned", as older writers emitted it
fn deserialize_signature<'de, D>(deserializer: D) -> Result<Option<RecordSignature>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => RecordSignature::from_hex(s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl NameRecord {
    /// Create an unsigned record at the current schema version
    pub fn unsigned(owner: Identity, content_id: ContentId, sequence: u64) -> Self {
        NameRecord {
            content_id,
            sequence,
            signature: None,
            owner,
            version: RECORD_VERSION,
        }
    }

    #[inline]
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Copy of this record with the signature cleared
    pub fn without_signature(&self) -> Self {
        NameRecord {
            signature: None,
            ..self.clone()
        }
    }

    /// Deterministic signing input: JSON of the record with the signature cleared
    pub fn canonical_bytes(&self) -> ZebuResult<Vec<u8>> {
        serde_json::to_vec(&self.without_signature()).map_err(|e| ZebuError::Encode(e.to_string()))
    }

    /// Wire encoding used on the broadcast transport and in durable storage
    pub fn encode(&self) -> ZebuResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ZebuError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> ZebuResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: &str = "0xCbd6073f486714E6641bf87c22A9CEc25aCf5804";

    fn owner() -> Identity {
        Identity::parse(ACCOUNT).unwrap()
    }

    #[test]
    fn test_legacy_canonical_form_matches_field_order() {
        let mut record = NameRecord::unsigned(
            owner(),
            ContentId::from("QmP95DscnxiNzzDJ7wcivJNKe1xNCRzxh8Td9Uo5focKpZ"),
            1,
        );
        record.version = LEGACY_RECORD_VERSION;
        record.signature = Some(RecordSignature::from_bytes(vec![1u8; SIGNATURE_LEN]));

        let canonical = String::from_utf8(record.canonical_bytes().unwrap()).unwrap();
        assert_eq!(
            canonical,
            r#"{"CID":"QmP95DscnxiNzzDJ7wcivJNKe1xNCRzxh8Td9Uo5focKpZ","Sequence":1,"PubKey":"0xCbd6073f486714E6641bf87c22A9CEc25aCf5804"}"#
        );
    }

    #[test]
    fn test_current_version_is_emitted_last() {
        let record = NameRecord::unsigned(owner(), ContentId::from("Qmabc"), 7);
        let canonical = String::from_utf8(record.canonical_bytes().unwrap()).unwrap();
        assert!(canonical.ends_with(r#""Version":1}"#));
    }

    #[test]
    fn test_decode_accepts_unprefixed_and_empty_signature() {
        let json = format!(
            r#"{{"CID":"Qmabc","Sequence":2,"Signature":"","PubKey":"{}"}}"#,
            ACCOUNT
        );
        let record = NameRecord::decode(json.as_bytes()).unwrap();
        assert!(!record.is_signed());
        assert_eq!(record.version, LEGACY_RECORD_VERSION);

        let json = format!(
            r#"{{"CID":"Qmabc","Sequence":2,"Signature":"abcd","PubKey":"{}"}}"#,
            ACCOUNT
        );
        let record = NameRecord::decode(json.as_bytes()).unwrap();
        assert_eq!(record.signature.unwrap().as_bytes(), &[0xab, 0xcd]);
    }

    #[test]
    fn test_decode_rejects_unknown_fields() {
        let json = format!(
            r#"{{"CID":"Qmabc","Sequence":2,"PubKey":"{}","Extra":true}}"#,
            ACCOUNT
        );
        assert!(NameRecord::decode(json.as_bytes()).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(NameRecord::decode(b"not json").is_err());
        assert!(NameRecord::decode(br#"{"CID":"x","Sequence":1,"PubKey":"0x12"}"#).is_err());
    }

    #[test]
    fn test_wire_roundtrip_keeps_signature() {
        let mut record = NameRecord::unsigned(owner(), ContentId::from("Qmabc"), 3);
        record.signature = Some(RecordSignature::from_bytes(vec![7u8; SIGNATURE_LEN]));
        let decoded = NameRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }
}
