// ── Payload assembler ──
//
// Reduces a topic message that already matched the tracked entity to
// zero or one materialized payload. Chunked transfers report progress
// until their last slot fills; compressed and regular messages complete
// (or fail) in one step.

mod chunks;
mod codec;
mod envelope;

use serde_json::Value;

pub use chunks::{ChunkBuffers, ChunkProgress};
pub use codec::{decode_compressed, is_gzip};
pub use envelope::{ChunkPart, CompressedPayload, InboundUpdate, MAX_TOTAL_CHUNKS, UpdateKind};

use crate::error::CoreError;
use crate::model::{DeviceSnapshot, PayloadInfo};

/// A payload ready to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub snapshot: DeviceSnapshot,
    pub info: PayloadInfo,
}

/// What one message did to the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum Assembly {
    /// A chunk was stored; the payload is still incomplete.
    Progress { received: usize, total: usize },
    Complete(Box<Materialized>),
    /// A regular payload whose nested identity is someone else's.
    Ignored,
}

/// Owns every chunk buffer; nothing else reads or writes chunk state.
#[derive(Debug, Default)]
pub struct PayloadAssembler {
    chunks: ChunkBuffers,
}

impl PayloadAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one classified update for `entity`.
    ///
    /// Errors are per-message: the offending message (and for chunk
    /// reassembly failures, its buffer) is gone, the assembler is intact.
    pub fn ingest(&mut self, update: InboundUpdate, entity: &str) -> Result<Assembly, CoreError> {
        let InboundUpdate {
            kind,
            phone_number,
            device_id,
            timestamp,
        } = update;

        let (payload, info) = match kind {
            UpdateKind::Chunked(part) => match self.chunks.insert(part)? {
                ChunkProgress::Partial { received, total } => {
                    return Ok(Assembly::Progress { received, total });
                }
                ChunkProgress::Complete { text, total } => {
                    let payload = parse_payload(&text, "reassembled chunks")?;
                    let info = PayloadInfo {
                        compressed: false,
                        byte_size: byte_len(&text),
                        chunk_count: u32::try_from(total).unwrap_or(u32::MAX),
                    };
                    (payload, info)
                }
            },
            UpdateKind::Compressed(compressed) => {
                let text = decode_compressed(&compressed.encoded)?;
                let payload = parse_payload(&text, "decompressed payload")?;
                tracing::debug!(
                    compressed_size = compressed.compressed_size,
                    original_size = compressed.original_size,
                    decoded = text.len(),
                    "compressed payload decoded"
                );
                let info = PayloadInfo {
                    compressed: true,
                    byte_size: compressed
                        .original_size
                        .filter(|&n| n > 0)
                        .unwrap_or_else(|| byte_len(&text)),
                    chunk_count: 0,
                };
                (payload, info)
            }
            UpdateKind::Regular(payload) => {
                let nested = payload.get("phoneNumber").and_then(Value::as_str);
                if nested != Some(entity) && phone_number.as_deref() != Some(entity) {
                    tracing::debug!(entity, nested, "regular payload for another entity");
                    return Ok(Assembly::Ignored);
                }
                let serialized = serde_json::to_string(&payload)
                    .map_err(|e| CoreError::Internal(format!("re-serialize payload: {e}")))?;
                let info = PayloadInfo {
                    compressed: false,
                    byte_size: byte_len(&serialized),
                    chunk_count: 0,
                };
                (payload, info)
            }
        };

        let snapshot =
            DeviceSnapshot::from_push(payload, entity).with_envelope(device_id, timestamp);
        Ok(Assembly::Complete(Box::new(Materialized { snapshot, info })))
    }

    /// Discard all partial chunk state.
    pub fn reset(&mut self) {
        self.chunks.clear();
    }

    /// Sessions with a partially received payload.
    pub fn pending_chunks(&self) -> usize {
        self.chunks.pending()
    }
}

fn parse_payload(text: &str, what: &str) -> Result<Value, CoreError> {
    serde_json::from_str(text).map_err(|e| CoreError::parse(format!("{what} is not JSON: {e}")))
}

fn byte_len(text: &str) -> u64 {
    u64::try_from(text.len()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn chunk(session: &str, index: usize, total: usize, data: &str) -> InboundUpdate {
        InboundUpdate::classify(json!({
            "phoneNumber": "555",
            "chunked": true,
            "sessionId": session,
            "chunkIndex": index,
            "totalChunks": total,
            "data": data,
        }))
        .unwrap()
    }

    fn complete(assembly: Assembly) -> Materialized {
        match assembly {
            Assembly::Complete(done) => *done,
            other => panic!("expected a complete payload, got {other:?}"),
        }
    }

    fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for (i, &first) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn out_of_order_pair_reassembles() {
        let mut assembler = PayloadAssembler::new();

        // "A" + "B" is not JSON, so go through the chunk buffers directly
        // for the literal pair and through the assembler for a JSON pair.
        let mut buffers = ChunkBuffers::new();
        let parts = [("s1", 1, "B"), ("s1", 0, "A")].map(|(s, i, d)| ChunkPart {
            session_id: s.into(),
            index: i,
            total: 2,
            data: d.into(),
        });
        let [second, first] = parts;
        assert!(matches!(
            buffers.insert(second).unwrap(),
            ChunkProgress::Partial { .. }
        ));
        assert_eq!(
            buffers.insert(first).unwrap(),
            ChunkProgress::Complete {
                text: "AB".into(),
                total: 2
            }
        );

        assert_eq!(
            assembler.ingest(chunk("s1", 1, 2, r#"B"}"#), "555").unwrap(),
            Assembly::Progress {
                received: 1,
                total: 2
            }
        );
        let done = complete(
            assembler
                .ingest(chunk("s1", 0, 2, r#"{"model":"A"#), "555")
                .unwrap(),
        );
        assert_eq!(done.snapshot.details, json!({ "model": "AB" }));
        assert_eq!(done.info.chunk_count, 2);
        assert_eq!(assembler.pending_chunks(), 0);
    }

    #[test]
    fn every_arrival_order_commits_the_same_payload_once() {
        let text = r#"{"phoneNumber":"555","model":"Pixel","batteryLevel":77}"#;
        let pieces: Vec<String> = text
            .as_bytes()
            .chunks(12)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();
        let total = pieces.len();
        let expected: Value = serde_json::from_str(text).unwrap();

        let indices: Vec<usize> = (0..total).collect();
        for order in permutations(&indices) {
            // Replay the first index again right before the last arrival.
            let mut arrivals = order.clone();
            arrivals.insert(total - 1, order[0]);

            let mut assembler = PayloadAssembler::new();
            let mut commits = Vec::new();
            for (n, &idx) in arrivals.iter().enumerate() {
                match assembler.ingest(chunk("s1", idx, total, &pieces[idx]), "555").unwrap() {
                    Assembly::Complete(done) => commits.push((n, done)),
                    Assembly::Progress { received, .. } => assert!(received < total),
                    Assembly::Ignored => panic!("chunk ignored"),
                }
            }

            assert_eq!(commits.len(), 1, "order {order:?}");
            let (at, done) = &commits[0];
            assert_eq!(*at, arrivals.len() - 1, "committed early for {order:?}");
            assert_eq!(done.snapshot.details, expected);
            assert_eq!(done.info.byte_size, text.len() as u64);
        }
    }

    #[test]
    fn reset_mid_assembly_prevents_commit() {
        let mut assembler = PayloadAssembler::new();
        assembler
            .ingest(chunk("s1", 0, 2, r#"{"a":"#), "555")
            .unwrap();

        assembler.reset();

        assert_eq!(
            assembler.ingest(chunk("s1", 1, 2, "1}"), "555").unwrap(),
            Assembly::Progress {
                received: 1,
                total: 2
            }
        );
    }

    #[test]
    fn unparsable_reassembly_drops_buffer() {
        let mut assembler = PayloadAssembler::new();
        assembler.ingest(chunk("s1", 0, 2, "not "), "555").unwrap();
        let err = assembler.ingest(chunk("s1", 1, 2, "json"), "555").unwrap_err();
        assert!(matches!(err, CoreError::MessageParse { .. }));
        assert_eq!(assembler.pending_chunks(), 0);
    }

    #[test]
    fn regular_size_is_serialized_data_length() {
        let data = json!({ "phoneNumber": "555", "model": "Pixel 9", "batteryLevel": 42 });
        let update = InboundUpdate::classify(json!({
            "compressed": false,
            "data": data.clone(),
            "timestamp": 1_700_000_000_000_i64,
        }))
        .unwrap();

        let done = complete(PayloadAssembler::new().ingest(update, "555").unwrap());
        assert_eq!(
            done.info,
            PayloadInfo {
                compressed: false,
                byte_size: serde_json::to_string(&data).unwrap().len() as u64,
                chunk_count: 0,
            }
        );
        assert_eq!(done.snapshot.details, data);
        assert!(done.snapshot.responded_at.is_some());
    }

    #[test]
    fn regular_for_other_entity_is_ignored() {
        let update = InboundUpdate::classify(json!({
            "data": { "phoneNumber": "777", "model": "X" },
        }))
        .unwrap();
        assert_eq!(
            PayloadAssembler::new().ingest(update, "555").unwrap(),
            Assembly::Ignored
        );
    }

    #[test]
    fn compressed_round_trips_to_same_object() {
        let object = json!({
            "phoneNumber": "555",
            "deviceDetails": { "model": "Pixel 9", "imei": "3500" },
            "latestTelemetry": { "battery": 64, "wifi": "on" },
        });
        let text = serde_json::to_string(&object).unwrap();
        let update = InboundUpdate::classify(json!({
            "phoneNumber": "555",
            "compressed": true,
            "data": codec::encode_compressed(&text),
            "deviceId": "d-9",
        }))
        .unwrap();

        let done = complete(PayloadAssembler::new().ingest(update, "555").unwrap());
        assert!(done.info.compressed);
        assert_eq!(done.info.byte_size, text.len() as u64);
        assert_eq!(done.snapshot.device_id.as_deref(), Some("d-9"));
        assert_eq!(done.snapshot.details, object["deviceDetails"]);
        assert_eq!(done.snapshot.telemetry, object["latestTelemetry"]);
    }

    #[test]
    fn compressed_size_prefers_original_size() {
        let update = InboundUpdate::classify(json!({
            "phoneNumber": "555",
            "compressed": true,
            "data": codec::encode_compressed(r#"{"phoneNumber":"555"}"#),
            "originalSize": 4096,
        }))
        .unwrap();
        let done = complete(PayloadAssembler::new().ingest(update, "555").unwrap());
        assert_eq!(done.info.byte_size, 4096);
    }

    #[test]
    fn zero_original_size_falls_back_to_decoded_length() {
        let text = r#"{"phoneNumber":"555"}"#;
        let update = InboundUpdate::classify(json!({
            "phoneNumber": "555",
            "compressed": true,
            "data": codec::encode_compressed(text),
            "originalSize": 0,
        }))
        .unwrap();
        let done = complete(PayloadAssembler::new().ingest(update, "555").unwrap());
        assert_eq!(done.info.byte_size, text.len() as u64);
    }

    #[test]
    fn oversized_chunk_total_is_rejected_and_assembler_survives() {
        let mut assembler = PayloadAssembler::new();
        let err = InboundUpdate::classify(json!({
            "phoneNumber": "555", "chunked": true, "sessionId": "s1",
            "chunkIndex": 0, "totalChunks": u64::MAX, "data": "x",
        }))
        .and_then(|u| assembler.ingest(u, "555"))
        .unwrap_err();
        assert!(matches!(err, CoreError::MessageParse { .. }));
        assert_eq!(assembler.pending_chunks(), 0);

        let update = InboundUpdate::classify(json!({
            "phoneNumber": "555", "chunked": true, "sessionId": "s1",
            "chunkIndex": 0, "totalChunks": 1, "data": r#"{"phoneNumber":"555"}"#,
        }))
        .unwrap();
        complete(assembler.ingest(update, "555").unwrap());
    }

    #[test]
    fn undecodable_compressed_is_dropped() {
        let update = InboundUpdate::classify(json!({
            "phoneNumber": "555", "compressed": true, "data": "%%%",
        }))
        .unwrap();
        let err = PayloadAssembler::new().ingest(update, "555").unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));
    }
}
