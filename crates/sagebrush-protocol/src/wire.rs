use rmp_serde::{decode, encode};
use thiserror::Error;

use crate::{ActionEnvelope, EventEnvelope, SessionSnapshot};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[from] encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] decode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// Internally tagged enums need field names on the wire, so everything goes
// through `to_vec_named`.

pub fn serialize_action(envelope: &ActionEnvelope) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(envelope)?)
}

pub fn deserialize_action(bytes: &[u8]) -> Result<ActionEnvelope, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn serialize_event(envelope: &EventEnvelope) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(envelope)?)
}

pub fn deserialize_event(bytes: &[u8]) -> Result<EventEnvelope, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn serialize_snapshot(snapshot: &SessionSnapshot) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(snapshot)?)
}

pub fn deserialize_snapshot(bytes: &[u8]) -> Result<SessionSnapshot, WireError> {
    Ok(decode::from_slice(bytes)?)
}

pub fn action_to_json(envelope: &ActionEnvelope) -> Result<String, WireError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn action_from_json(text: &str) -> Result<ActionEnvelope, WireError> {
    Ok(serde_json::from_str(text)?)
}

pub fn event_to_json(envelope: &EventEnvelope) -> Result<String, WireError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn event_from_json(text: &str) -> Result<EventEnvelope, WireError> {
    Ok(serde_json::from_str(text)?)
}

/// Deterministic snapshot hash for desync detection.
///
/// Hashes the MessagePack-serialized snapshot using FNV-1a 64-bit.
pub fn snapshot_hash(snapshot: &SessionSnapshot) -> Result<u64, WireError> {
    let bytes = serialize_snapshot(snapshot)?;
    Ok(hash_bytes_fnv1a64(&bytes))
}

/// Deterministic, stable 64-bit hash for raw bytes (FNV-1a).
pub fn hash_bytes_fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
