//! Payload encoding, compression and integrity hashing
//!
//! Payloads are serialized to canonical JSON (object keys sorted), hashed with
//! SHA-256 and, above a size threshold, gzipped and stored base64 encoded. The
//! hash always covers the uncompressed canonical bytes, so it can be checked
//! regardless of how the payload was stored.

use crate::diff::StateDiff;
use crate::error::{CheckpointError, Result};
use crate::state::CheckpointState;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// What a checkpoint holds: a whole state or the change since its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CheckpointPayload {
    Full(CheckpointState),
    Diff(StateDiff),
}

impl CheckpointPayload {
    pub fn is_diff(&self) -> bool {
        matches!(self, CheckpointPayload::Diff(_))
    }
}

/// Payload as written to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "body", rename_all = "snake_case")]
pub enum StoredPayload {
    Json(Value),
    /// Base64 of the gzipped canonical JSON
    Gzip(String),
}

/// Output of [`PayloadCodec::encode`]
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub stored: StoredPayload,
    pub hash: String,
    /// Length of the uncompressed serialized payload
    pub size_bytes: usize,
    pub compressed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    compression: bool,
    threshold: usize,
}

impl PayloadCodec {
    pub fn new(compression: bool, threshold: usize) -> Self {
        Self {
            compression,
            threshold,
        }
    }

    pub fn encode(&self, payload: &CheckpointPayload) -> Result<EncodedPayload> {
        let value = serde_json::to_value(payload)?;
        let bytes = serde_json::to_vec(&value)?;
        let hash = sha256_hex(&bytes);
        let size_bytes = bytes.len();

        if self.compression && size_bytes > self.threshold {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&bytes)
                .map_err(|e| CheckpointError::Compression(e.to_string()))?;
            let gz = encoder
                .finish()
                .map_err(|e| CheckpointError::Compression(e.to_string()))?;
            Ok(EncodedPayload {
                stored: StoredPayload::Gzip(BASE64.encode(gz)),
                hash,
                size_bytes,
                compressed: true,
            })
        } else {
            Ok(EncodedPayload {
                stored: StoredPayload::Json(value),
                hash,
                size_bytes,
                compressed: false,
            })
        }
    }

    /// Decode a stored payload
    ///
    /// With `validate` set, the hash and the top-level shape are checked
    /// before deserializing. Undecodable payloads are integrity errors either
    /// way.
    pub fn decode(
        &self,
        id: &str,
        stored: &StoredPayload,
        expected_hash: &str,
        validate: bool,
    ) -> Result<CheckpointPayload> {
        let value = match stored {
            StoredPayload::Json(value) => value.clone(),
            StoredPayload::Gzip(body) => {
                let gz = BASE64
                    .decode(body)
                    .map_err(|e| CheckpointError::integrity(id, format!("bad base64: {e}")))?;
                let mut bytes = Vec::new();
                GzDecoder::new(gz.as_slice())
                    .read_to_end(&mut bytes)
                    .map_err(|e| CheckpointError::Compression(e.to_string()))?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| CheckpointError::integrity(id, e.to_string()))?
            }
        };

        if validate {
            let actual = content_hash(&value)?;
            if actual != expected_hash {
                return Err(CheckpointError::integrity(id, "hash mismatch"));
            }
            validate_shape(id, &value)?;
        }

        serde_json::from_value(value).map_err(|e| CheckpointError::integrity(id, e.to_string()))
    }

    /// Recompute the hash of an in-memory payload and compare
    pub fn verify(&self, id: &str, payload: &CheckpointPayload, expected_hash: &str) -> Result<()> {
        let value = serde_json::to_value(payload)?;
        if content_hash(&value)? != expected_hash {
            return Err(CheckpointError::integrity(id, "hash mismatch"));
        }
        validate_shape(id, &value)
    }
}

/// SHA-256 hex digest of the canonical JSON form of `value`
pub fn content_hash(value: &Value) -> Result<String> {
    Ok(sha256_hex(&serde_json::to_vec(value)?))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Full payloads need a conversation object and a task collection
fn validate_shape(id: &str, value: &Value) -> Result<()> {
    let data = match value.get("kind").and_then(Value::as_str) {
        Some("full") => value.get("data"),
        Some("diff") => {
            return match value.get("data") {
                Some(Value::Object(_)) => Ok(()),
                _ => Err(CheckpointError::integrity(id, "diff payload is not an object")),
            }
        }
        _ => return Err(CheckpointError::integrity(id, "unknown payload kind")),
    };

    let conversation_ok = matches!(
        data.and_then(|d| d.get("conversation")),
        Some(Value::Object(_))
    );
    if !conversation_ok {
        return Err(CheckpointError::integrity(id, "missing conversation object"));
    }

    let tasks_ok = matches!(
        data.and_then(|d| d.get("tasks")),
        Some(Value::Object(_)) | Some(Value::Array(_))
    );
    if !tasks_ok {
        return Err(CheckpointError::integrity(id, "missing task collection"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Message, TaskSnapshot};
    use serde_json::json;

    fn payload(messages: usize) -> CheckpointPayload {
        let mut state = CheckpointState::new().with_task(TaskSnapshot::new("t1", "task", "pending"));
        for i in 0..messages {
            state.conversation.push(Message::user(format!("message number {i}")));
        }
        CheckpointPayload::Full(state)
    }

    #[test]
    fn test_small_payload_stays_plain() {
        let codec = PayloadCodec::new(true, 10 * 1024);
        let encoded = codec.encode(&payload(1)).unwrap();

        assert!(!encoded.compressed);
        assert!(matches!(encoded.stored, StoredPayload::Json(_)));
        assert_eq!(encoded.hash.len(), 64);
    }

    #[test]
    fn test_large_payload_is_gzipped_and_decodes() {
        let codec = PayloadCodec::new(true, 256);
        let original = payload(50);
        let encoded = codec.encode(&original).unwrap();

        assert!(encoded.compressed);
        assert!(matches!(encoded.stored, StoredPayload::Gzip(_)));

        let decoded = codec
            .decode("cp", &encoded.stored, &encoded.hash, true)
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_hash_is_independent_of_compression() {
        let plain = PayloadCodec::new(false, 0).encode(&payload(20)).unwrap();
        let gz = PayloadCodec::new(true, 0).encode(&payload(20)).unwrap();
        assert_eq!(plain.hash, gz.hash);
        assert_eq!(plain.size_bytes, gz.size_bytes);
    }

    #[test]
    fn test_tampered_payload_fails_validation() {
        let codec = PayloadCodec::new(false, 0);
        let encoded = codec.encode(&payload(2)).unwrap();
        let StoredPayload::Json(mut value) = encoded.stored else {
            panic!("expected plain payload");
        };
        value["data"]["conversation"]["messages"][0]["content"] = json!("edited");
        let stored = StoredPayload::Json(value);

        let err = codec.decode("cp", &stored, &encoded.hash, true).unwrap_err();
        assert!(matches!(err, CheckpointError::Integrity { .. }));

        // skipping validation accepts the edit
        assert!(codec.decode("cp", &stored, &encoded.hash, false).is_ok());
    }

    #[test]
    fn test_shape_check() {
        let value = json!({"kind": "full", "data": {"conversation": "nope", "tasks": {}}});
        let hash = content_hash(&value).unwrap();
        let err = PayloadCodec::new(false, 0)
            .decode("cp", &StoredPayload::Json(value), &hash, true)
            .unwrap_err();
        assert!(err.to_string().contains("conversation"));
    }

    #[test]
    fn test_verify_in_memory_payload() {
        let codec = PayloadCodec::new(false, 0);
        let original = payload(3);
        let encoded = codec.encode(&original).unwrap();

        assert!(codec.verify("cp", &original, &encoded.hash).is_ok());
        assert!(codec.verify("cp", &payload(4), &encoded.hash).is_err());
    }
}
