// ── Inbound update classification ──
//
// A topic message is one of three shapes, told apart by explicit boolean
// flags. Each variant's required fields are validated here, before any
// handler runs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::model::snapshot::parse_timestamp;

/// Upper bound on `totalChunks`. Larger announcements are rejected before
/// any buffer is allocated.
pub const MAX_TOTAL_CHUNKS: usize = 10_000;

/// Raw envelope fields. Everything is optional on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    chunked: Option<bool>,
    compressed: Option<bool>,
    session_id: Option<String>,
    chunk_index: Option<u64>,
    total_chunks: Option<u64>,
    device_id: Option<String>,
    timestamp: Option<Value>,
    original_size: Option<u64>,
    compressed_size: Option<u64>,
}

/// One fragment of a chunked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPart {
    pub session_id: String,
    pub index: usize,
    pub total: usize,
    pub data: String,
}

/// A Base64(+GZIP) encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPayload {
    pub encoded: String,
    /// Length of the JSON text before encoding, when the producer says.
    pub original_size: Option<u64>,
    pub compressed_size: Option<u64>,
}

/// The three message shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Chunked(ChunkPart),
    Compressed(CompressedPayload),
    /// The structured payload itself: `data`, or the whole message.
    Regular(Value),
}

/// A classified topic message plus the envelope metadata worth keeping.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundUpdate {
    pub kind: UpdateKind,
    /// Top-level `phoneNumber`, if any.
    pub phone_number: Option<String>,
    pub device_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundUpdate {
    /// Classify a parsed message and validate its variant's fields.
    pub fn classify(mut message: Value) -> Result<Self, CoreError> {
        if !message.is_object() {
            return Err(CoreError::parse("update is not a JSON object"));
        }

        let envelope = Envelope::deserialize(&message)
            .map_err(|e| CoreError::parse(format!("bad envelope: {e}")))?;

        let phone_number = message
            .get("phoneNumber")
            .and_then(Value::as_str)
            .map(String::from);
        let data = message.get_mut("data").map(Value::take);

        let kind = if envelope.chunked.unwrap_or(false) {
            UpdateKind::Chunked(chunk_part(&envelope, data)?)
        } else if envelope.compressed.unwrap_or(false) {
            let Some(Value::String(encoded)) = data else {
                return Err(CoreError::parse("compressed update without string data"));
            };
            UpdateKind::Compressed(CompressedPayload {
                encoded,
                original_size: envelope.original_size,
                compressed_size: envelope.compressed_size,
            })
        } else {
            match data {
                Some(Value::Null) | None => UpdateKind::Regular(message),
                Some(payload) => UpdateKind::Regular(payload),
            }
        };

        Ok(Self {
            kind,
            phone_number,
            device_id: envelope.device_id,
            timestamp: envelope.timestamp.as_ref().and_then(parse_timestamp),
        })
    }
}

fn chunk_part(envelope: &Envelope, data: Option<Value>) -> Result<ChunkPart, CoreError> {
    let session_id = envelope
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::parse("chunk without sessionId"))?;
    let total = envelope
        .total_chunks
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n > 0)
        .ok_or_else(|| CoreError::parse("chunk without a positive totalChunks"))?;
    if total > MAX_TOTAL_CHUNKS {
        return Err(CoreError::parse(format!(
            "totalChunks {total} exceeds the limit of {MAX_TOTAL_CHUNKS}"
        )));
    }
    let index = envelope
        .chunk_index
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CoreError::parse("chunk without chunkIndex"))?;
    if index >= total {
        return Err(CoreError::parse(format!(
            "chunkIndex {index} out of range for totalChunks {total}"
        )));
    }
    let Some(Value::String(data)) = data else {
        return Err(CoreError::parse("chunk data is not a string"));
    };

    Ok(ChunkPart {
        session_id,
        index,
        total,
        data,
    })
}
