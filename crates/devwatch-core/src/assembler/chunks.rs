// ── Chunk buffers ──
//
// Per-session reassembly slots. Only the assembler touches these. A buffer
// lives from its first chunk until it completes, is superseded by a chunk
// for another session, or is reset by a retarget.

use std::collections::HashMap;

use super::envelope::ChunkPart;
use crate::error::CoreError;

/// Outcome of storing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkProgress {
    Partial { received: usize, total: usize },
    /// All slots filled; the joined text. The buffer is already gone.
    Complete { text: String, total: usize },
}

#[derive(Debug)]
struct ChunkBuffer {
    slots: Vec<Option<String>>,
    received: usize,
}

impl ChunkBuffer {
    fn new(total: usize) -> Self {
        Self {
            slots: vec![None; total],
            received: 0,
        }
    }
}

/// Chunk buffers keyed by session id.
#[derive(Debug, Default)]
pub struct ChunkBuffers {
    buffers: HashMap<String, ChunkBuffer>,
}

impl ChunkBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a chunk. Duplicate indices overwrite their slot without
    /// counting twice.
    pub fn insert(&mut self, part: ChunkPart) -> Result<ChunkProgress, CoreError> {
        let ChunkPart {
            session_id,
            index,
            total,
            data,
        } = part;

        if !self.buffers.contains_key(&session_id) {
            if !self.buffers.is_empty() {
                tracing::debug!(
                    session_id,
                    stale = self.buffers.len(),
                    "new chunk session supersedes buffered sessions"
                );
                self.buffers.clear();
            }
            self.buffers
                .insert(session_id.clone(), ChunkBuffer::new(total));
        }

        let Some(buffer) = self.buffers.get_mut(&session_id) else {
            return Err(CoreError::Internal("chunk buffer vanished".into()));
        };

        if buffer.slots.len() != total {
            let expected = buffer.slots.len();
            self.buffers.remove(&session_id);
            return Err(CoreError::parse(format!(
                "totalChunks changed from {expected} to {total} in session {session_id}"
            )));
        }

        let Some(slot) = buffer.slots.get_mut(index) else {
            return Err(CoreError::parse(format!(
                "chunkIndex {index} out of range for totalChunks {total}"
            )));
        };
        if slot.is_none() {
            buffer.received += 1;
        }
        *slot = Some(data);

        if buffer.received < total {
            return Ok(ChunkProgress::Partial {
                received: buffer.received,
                total,
            });
        }

        let text = self
            .buffers
            .remove(&session_id)
            .map(|done| done.slots.into_iter().flatten().collect::<String>())
            .unwrap_or_default();
        Ok(ChunkProgress::Complete { text, total })
    }

    /// Drop every buffer.
    pub fn clear(&mut self) {
        if !self.buffers.is_empty() {
            tracing::debug!(discarded = self.buffers.len(), "discarding chunk buffers");
        }
        self.buffers.clear();
    }

    /// Number of sessions with a partial buffer.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}
