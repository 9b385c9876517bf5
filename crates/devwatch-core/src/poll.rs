// ── Session poll coordinator ──
//
// Fallback path racing the live topic: poll the session status on a fixed
// cadence, fetch the device record once the device responded, and commit
// through the sink. The loop ends on the first terminal answer, on any
// transport error, on cancellation, or as soon as its session is no
// longer the one being waited on. Its failures are reported as
// `PollFailed`, which leaves the live path open.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use devwatch_api::{BackendClient, SessionPhase};

use crate::error::CoreError;
use crate::model::{DeviceSnapshot, PayloadInfo, TrackerStatus};
use crate::sink::UpdateSink;

/// Handle to a running poll loop. Dropping it does not stop the loop.
#[derive(Debug, Clone)]
pub struct PollHandle {
    session_id: String,
    cancel: CancellationToken,
}

impl PollHandle {
    /// Stop the loop. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(session_id = %self.session_id, "stopping status poll");
            self.cancel.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// How one poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Committed,
    Failed(String),
    /// Stopped, superseded, or the other path already delivered.
    Abandoned,
}

/// Spawn a poll loop for `session_id` of `entity`.
///
/// The first request goes out one `interval` after the spawn.
pub fn spawn_poll(
    backend: Arc<BackendClient>,
    sink: Arc<UpdateSink>,
    entity: String,
    session_id: String,
    interval: Duration,
) -> PollHandle {
    let cancel = CancellationToken::new();
    let handle = PollHandle {
        session_id: session_id.clone(),
        cancel: cancel.clone(),
    };

    tokio::spawn(async move {
        let outcome = poll_loop(&backend, &sink, &entity, &session_id, interval, &cancel).await;
        debug!(session_id, ?outcome, "status poll finished");
        cancel.cancel();
    });

    handle
}

async fn poll_loop(
    backend: &BackendClient,
    sink: &UpdateSink,
    entity: &str,
    session_id: &str,
    interval: Duration,
    cancel: &CancellationToken,
) -> PollOutcome {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return PollOutcome::Abandoned,
            _ = ticker.tick() => {}
        }

        if !sink.awaiting(session_id) {
            return PollOutcome::Abandoned;
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return PollOutcome::Abandoned,
            response = backend.session_status(session_id) => response,
        };

        // The answer may belong to a search that was replaced meanwhile.
        if !sink.awaiting(session_id) {
            debug!(session_id, "ignoring status for a stale session");
            return PollOutcome::Abandoned;
        }

        let status = match response {
            Ok(status) => status,
            Err(e) => {
                let err = CoreError::poll(&e);
                warn!(session_id, error = %e, "status poll failed, stopping");
                sink.set_status_for_session(
                    session_id,
                    TrackerStatus::PollFailed {
                        message: err.to_string(),
                    },
                );
                return PollOutcome::Failed(err.to_string());
            }
        };

        match status.phase() {
            SessionPhase::Responded => {
                return fetch_and_commit(backend, sink, entity, session_id, cancel).await;
            }
            SessionPhase::Failed { message } => {
                warn!(session_id, %message, "backend reports request failed");
                let message = format!("Request failed: {message}");
                sink.set_status_for_session(
                    session_id,
                    TrackerStatus::PollFailed {
                        message: message.clone(),
                    },
                );
                return PollOutcome::Failed(message);
            }
            SessionPhase::Pending { status, detail } => {
                debug!(session_id, %status, %detail, "session still pending");
                sink.set_status_for_session(session_id, TrackerStatus::Polling { status, detail });
            }
        }
    }
}

/// Device responded: pull its record from the device list and commit.
async fn fetch_and_commit(
    backend: &BackendClient,
    sink: &UpdateSink,
    entity: &str,
    session_id: &str,
    cancel: &CancellationToken,
) -> PollOutcome {
    sink.set_status_for_session(session_id, TrackerStatus::FetchingDevice);

    let found = tokio::select! {
        biased;
        () = cancel.cancelled() => return PollOutcome::Abandoned,
        found = backend.find_device(entity) => found,
    };

    let fail = |message: String| {
        sink.set_status_for_session(
            session_id,
            TrackerStatus::PollFailed {
                message: message.clone(),
            },
        );
        PollOutcome::Failed(message)
    };

    match found {
        Ok(Some(record)) => {
            let byte_size = serde_json::to_string(&record)
                .map(|s| u64::try_from(s.len()).unwrap_or(u64::MAX))
                .unwrap_or(0);
            let snapshot = DeviceSnapshot::from_record(record, Some(session_id.to_owned()));
            let info = PayloadInfo {
                compressed: false,
                byte_size,
                chunk_count: 0,
            };
            if sink.commit(entity, Some(session_id), snapshot, info) {
                info!(session_id, "device data received via status poll");
                PollOutcome::Committed
            } else {
                PollOutcome::Abandoned
            }
        }
        Ok(None) => {
            warn!(session_id, entity, "device responded but has no record");
            fail(format!("No device data found for {entity}"))
        }
        Err(e) => {
            warn!(session_id, error = %e, "device fetch failed");
            fail(CoreError::poll(&e).to_string())
        }
    }
}
