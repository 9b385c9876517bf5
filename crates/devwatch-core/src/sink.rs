// ── Update sink ──
//
// Single point of truth for what the tracker shows. Both delivery paths
// commit here; every mutation goes through the `watch` sender so readers
// see whole states, and the entity/session checks run under the same lock
// as the write they guard.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::model::{DeviceSnapshot, PayloadInfo, TrackerState, TrackerStatus};
use crate::poll::PollHandle;

/// Owns the observable [`TrackerState`] and the running poll loop.
pub struct UpdateSink {
    state: watch::Sender<TrackerState>,
    poll: Mutex<Option<PollHandle>>,
    /// Bumped on every retarget; a search only writes while it is current.
    search: AtomicU64,
}

impl Default for UpdateSink {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateSink {
    pub fn new() -> Self {
        let (state, _) = watch::channel(TrackerState::default());
        Self {
            state,
            poll: Mutex::new(None),
            search: AtomicU64::new(0),
        }
    }

    // ── Commit ───────────────────────────────────────────────────────

    /// Make `snapshot` the current state.
    ///
    /// Applies only while `entity` is still tracked, its session has not
    /// been ended and, when given, `session_id` is still the current
    /// session. Returns whether it applied. A later commit for the same search overwrites an earlier
    /// one.
    pub fn commit(
        &self,
        entity: &str,
        session_id: Option<&str>,
        snapshot: DeviceSnapshot,
        info: PayloadInfo,
    ) -> bool {
        let source = snapshot.source;
        let mut snapshot = Some(snapshot);

        let applied = self.state.send_if_modified(|state| {
            if state.entity.as_deref() != Some(entity) {
                return false;
            }
            if session_id.is_some() && state.session_id.as_deref() != session_id {
                return false;
            }
            if state.status == TrackerStatus::Ended {
                return false;
            }

            state.snapshot = snapshot.take();
            state.payload = Some(info);
            state.last_update = Some(Utc::now());
            state.status = TrackerStatus::Received { source };
            self.stop_poll();
            true
        });

        if applied {
            info!(
                entity,
                %source,
                compressed = info.compressed,
                bytes = info.byte_size,
                chunks = info.chunk_count,
                "device data committed"
            );
        } else {
            debug!(entity, ?session_id, %source, "discarding snapshot for a stale search");
        }
        applied
    }

    // ── Search lifecycle ─────────────────────────────────────────────

    /// Start tracking `entity`: stop the previous poll loop and forget the
    /// previous session and snapshot. Returns the new search token.
    pub fn retarget(&self, entity: &str) -> u64 {
        let mut search = 0;
        self.state.send_modify(|state| {
            search = self.search.fetch_add(1, Ordering::AcqRel) + 1;
            *state = TrackerState {
                entity: Some(entity.to_owned()),
                status: TrackerStatus::Sending,
                ..TrackerState::default()
            };
        });
        self.stop_poll();
        search
    }

    /// Record the backend session of search `search`. Refused once a newer
    /// search started.
    pub fn set_session(&self, search: u64, session_id: &str) -> bool {
        self.state.send_if_modified(|state| {
            if self.search.load(Ordering::Acquire) != search {
                return false;
            }
            state.session_id = Some(session_id.to_owned());
            // Chunk progress or a result may already have arrived.
            if state.status == TrackerStatus::Sending {
                state.status = TrackerStatus::AwaitingDevice;
            }
            true
        })
    }

    /// Whether `search` is still the current search.
    pub fn is_current_search(&self, search: u64) -> bool {
        self.search.load(Ordering::Acquire) == search
    }

    /// Session ended on the backend: clear it and its data.
    pub fn end(&self, session_id: &str) -> bool {
        let ended = self.state.send_if_modified(|state| {
            if state.session_id.as_deref() != Some(session_id) {
                return false;
            }
            state.session_id = None;
            state.snapshot = None;
            state.payload = None;
            state.status = TrackerStatus::Ended;
            true
        });
        if ended {
            self.stop_poll();
        }
        ended
    }

    // ── Status ───────────────────────────────────────────────────────

    pub fn set_status(&self, status: TrackerStatus) {
        self.state.send_if_modified(|state| {
            if state.status == status {
                return false;
            }
            state.status = status;
            true
        });
    }

    /// Set the status line only while `entity` is tracked.
    pub fn set_status_for_entity(&self, entity: &str, status: TrackerStatus) -> bool {
        self.state.send_if_modified(|state| {
            if state.entity.as_deref() != Some(entity) || state.status == status {
                return false;
            }
            state.status = status;
            true
        })
    }

    /// Set the status line only while `session_id` is current and no
    /// result has landed yet.
    pub fn set_status_for_session(&self, session_id: &str, status: TrackerStatus) -> bool {
        self.state.send_if_modified(|state| {
            if state.session_id.as_deref() != Some(session_id) || state.status.is_terminal() {
                return false;
            }
            state.status = status;
            true
        })
    }

    /// Whether a poll loop for `session_id` still has work to do.
    pub fn awaiting(&self, session_id: &str) -> bool {
        let state = self.state.borrow();
        state.session_id.as_deref() == Some(session_id) && !state.status.is_terminal()
    }

    // ── Poll loop ownership ──────────────────────────────────────────

    /// Take ownership of a running poll loop, stopping any previous one.
    pub fn attach_poll(&self, handle: PollHandle) {
        if let Some(previous) = self.lock_poll().replace(handle) {
            previous.stop();
        }
    }

    /// Stop the poll loop, if any. Safe to call repeatedly.
    pub fn stop_poll(&self) {
        if let Some(handle) = self.lock_poll().take() {
            handle.stop();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.lock_poll().as_ref().is_some_and(|h| !h.is_stopped())
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> TrackerState {
        self.state.borrow().clone()
    }

    pub fn entity(&self) -> Option<String> {
        self.state.borrow().entity.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.borrow().session_id.clone()
    }

    pub fn snapshot(&self) -> Option<DeviceSnapshot> {
        self.state.borrow().snapshot.clone()
    }

    fn lock_poll(&self) -> MutexGuard<'_, Option<PollHandle>> {
        self.poll.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
