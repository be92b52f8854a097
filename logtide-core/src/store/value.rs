/*
    value.rs - Stored configuration values and their wire codec

    A ConfigValue is the unit the versioned store persists: opaque payload
    bytes, the version assigned by the store, and write metadata. Values
    are immutable once persisted; an update creates a new value at the
    next version.

    Blob format: [format:1][body:bincode][crc32:4]
    The checksum covers the body. Decoding a blob with an unknown format
    byte or a bad checksum is a Corrupt error, never a silent fallback.
*/

use crate::store::errors::{StoreError, StoreResult};
use crate::store::version::ConfigVersion;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Version of the blob encoding format
const BLOB_FORMAT_VERSION: u8 = 1;

/// Metadata recorded with every accepted write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMetadata {
    /// Milliseconds since epoch at which the write was accepted
    pub created_at_ms: u64,

    /// Node or tool that issued the write, if known
    pub author: Option<String>,
}

impl ValueMetadata {
    pub fn new(author: Option<String>) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        ValueMetadata { created_at_ms, author }
    }
}

/// A versioned configuration value as held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigValue {
    /// Opaque payload; the typed layer owns its meaning
    pub payload: Vec<u8>,

    /// Version assigned by the store at write time
    pub version: ConfigVersion,

    /// Write metadata
    pub metadata: ValueMetadata,
}

impl ConfigValue {
    pub fn new(payload: Vec<u8>, version: ConfigVersion, metadata: ValueMetadata) -> Self {
        ConfigValue { payload, version, metadata }
    }

    /// Encode into the persisted blob form.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let checksum = crc32fast::hash(&body);

        let mut blob = Vec::with_capacity(1 + body.len() + 4);
        blob.push(BLOB_FORMAT_VERSION);
        blob.extend_from_slice(&body);
        blob.extend_from_slice(&checksum.to_le_bytes());
        Ok(blob)
    }

    /// Decode a persisted blob, verifying format byte and checksum.
    pub fn decode(blob: &[u8]) -> StoreResult<Self> {
        if blob.len() < 5 {
            return Err(StoreError::Corrupt(format!("blob too short: {} bytes", blob.len())));
        }

        let format = blob[0];
        if format != BLOB_FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!("unknown blob format {}", format)));
        }

        let body = &blob[1..blob.len() - 4];
        let mut checksum_buf = [0u8; 4];
        checksum_buf.copy_from_slice(&blob[blob.len() - 4..]);
        let stored_checksum = u32::from_le_bytes(checksum_buf);

        if crc32fast::hash(body) != stored_checksum {
            return Err(StoreError::Corrupt("checksum mismatch".to_string()));
        }

        bincode::deserialize(body)
            .map_err(|e| StoreError::Corrupt(format!("undecodable body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_value() -> ConfigValue {
        ConfigValue::new(
            b"nodes payload".to_vec(),
            ConfigVersion::new(3),
            ValueMetadata::new(Some("node-1".to_string())),
        )
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let value = sample_value();
        let blob = value.encode().unwrap();
        let decoded = ConfigValue::decode(&blob).unwrap();

        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_rejects_flipped_bit() {
        let value = sample_value();
        let mut blob = value.encode().unwrap();
        let mid = blob.len() / 2;
        blob[mid] ^= 0x40;

        let err = ConfigValue::decode(&blob).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_format() {
        let value = sample_value();
        let mut blob = value.encode().unwrap();
        blob[0] = 99;

        let err = ConfigValue::decode(&blob).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        let err = ConfigValue::decode(&[1, 2]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
