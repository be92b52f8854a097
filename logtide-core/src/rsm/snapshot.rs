/*
    snapshot.rs - Snapshot blob codec

    A snapshot is the full materialized state plus the exact log position
    it reflects, written so future bootstraps need not replay the whole
    history. The position inside the blob must agree with the position
    the backend record carries; a disagreement means the snapshot was
    written incorrectly and is treated as corruption, never guessed
    around.

    Blob format: [format:1][body:bincode (position, state)][crc32:4]
*/

use crate::rsm::errors::{RsmError, RsmResult};
use crate::rsm::log::LogPosition;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Version of the snapshot encoding format
const SNAPSHOT_FORMAT_VERSION: u8 = 1;

/// Encode a state + position pair into the persisted blob form.
pub fn encode_snapshot<S: Serialize>(state: &S, position: LogPosition) -> RsmResult<Vec<u8>> {
    let body = bincode::serialize(&(position, state))?;
    let checksum = crc32fast::hash(&body);

    let mut blob = Vec::with_capacity(1 + body.len() + 4);
    blob.push(SNAPSHOT_FORMAT_VERSION);
    blob.extend_from_slice(&body);
    blob.extend_from_slice(&checksum.to_le_bytes());
    Ok(blob)
}

/// Decode a snapshot blob, verifying format byte and checksum.
pub fn decode_snapshot<S: DeserializeOwned>(blob: &[u8]) -> RsmResult<(S, LogPosition)> {
    if blob.len() < 5 {
        return Err(RsmError::Corrupt(format!("snapshot too short: {} bytes", blob.len())));
    }

    let format = blob[0];
    if format != SNAPSHOT_FORMAT_VERSION {
        return Err(RsmError::Corrupt(format!("unknown snapshot format {}", format)));
    }

    let body = &blob[1..blob.len() - 4];
    let mut checksum_buf = [0u8; 4];
    checksum_buf.copy_from_slice(&blob[blob.len() - 4..]);
    if crc32fast::hash(body) != u32::from_le_bytes(checksum_buf) {
        return Err(RsmError::Corrupt("snapshot checksum mismatch".to_string()));
    }

    let (position, state): (LogPosition, S) = bincode::deserialize(body)
        .map_err(|e| RsmError::Corrupt(format!("undecodable snapshot body: {}", e)))?;
    Ok((state, position))
}
