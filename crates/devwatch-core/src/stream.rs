// ── Reactive state stream ──
//
// Subscription type for consuming tracker state changes.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{DeviceSnapshot, TrackerState};

/// A subscription to the tracker state.
///
/// Provides both point-in-time access and change notification via
/// [`changed()`](Self::changed), or convert it into a `Stream`.
pub struct StateStream {
    receiver: watch::Receiver<TrackerState>,
}

impl StateStream {
    pub(crate) fn new(receiver: watch::Receiver<TrackerState>) -> Self {
        Self { receiver }
    }

    /// Get the latest state.
    pub fn latest(&self) -> TrackerState {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new state.
    /// Returns `None` once the tracker has been dropped.
    pub async fn changed(&mut self) -> Option<TrackerState> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until a snapshot lands (or the tracker goes away).
    pub async fn next_snapshot(&mut self) -> Option<DeviceSnapshot> {
        let state = self
            .receiver
            .wait_for(|state| state.snapshot.is_some())
            .await
            .ok()?;
        state.snapshot.clone()
    }

    /// Convert into a `Stream` yielding the current state first, then
    /// every change.
    pub fn into_stream(self) -> StateWatchStream {
        StateWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct StateWatchStream {
    inner: WatchStream<TrackerState>,
}

impl Stream for StateWatchStream {
    type Item = TrackerState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
