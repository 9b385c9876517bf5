// ── Tracker session controller ──
//
// Owns the whole pipeline for one tracked phone number: connector,
// subscription manager, payload assembler, update sink, poll coordinator.
// All shared pipeline state lives here; nothing is global.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use devwatch_api::{
    BackendClient, PushRequest, StompClient, StompConfig, StompMessage, TransportConfig,
};

use crate::assembler::{Assembly, InboundUpdate, PayloadAssembler};
use crate::config::TrackerConfig;
use crate::connector::Connector;
use crate::error::CoreError;
use crate::model::{DeviceSnapshot, LinkState, TrackerState, TrackerStatus};
use crate::poll::spawn_poll;
use crate::sink::UpdateSink;
use crate::stream::StateStream;
use crate::subscription::SubscriptionManager;

// ── Tracker ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<TrackerInner>`. Call [`start()`](Self::start)
/// once inside a Tokio runtime, then [`track()`](Self::track) for each
/// search.
pub struct Tracker<C: Connector = StompClient> {
    inner: Arc<TrackerInner<C>>,
}

impl<C: Connector> Clone for Tracker<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct TrackerInner<C: Connector> {
    config: TrackerConfig,
    backend: Arc<BackendClient>,
    connector: Arc<C>,
    subscriptions: Arc<SubscriptionManager<C>>,
    assembler: Mutex<PayloadAssembler>,
    sink: Arc<UpdateSink>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Tracker<StompClient> {
    /// Build a tracker talking to the configured backend and broker.
    /// Does NOT connect; see [`start()`](Self::start).
    pub fn new(config: TrackerConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
            ..TransportConfig::default()
        };
        let backend = BackendClient::new(config.backend_url.clone(), &transport)?;
        let connector = StompClient::new(StompConfig {
            url: config.websocket_url.clone(),
            ..StompConfig::default()
        });
        Ok(Self::with_parts(config, backend, connector))
    }
}

impl<C: Connector> Tracker<C> {
    /// Build a tracker from pre-made parts.
    pub fn with_parts(config: TrackerConfig, backend: BackendClient, connector: C) -> Self {
        let connector = Arc::new(connector);
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&connector),
            config.topic.clone(),
            config.retry.clone(),
        ));

        Self {
            inner: Arc::new(TrackerInner {
                config,
                backend: Arc::new(backend),
                connector,
                subscriptions,
                assembler: Mutex::new(PayloadAssembler::new()),
                sink: Arc::new(UpdateSink::new()),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &BackendClient {
        &self.inner.backend
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the message pump and the health check, and make one
    /// best-effort connection attempt in the background.
    pub fn start(&self) {
        let mut handles = self.lock_handles();

        // Subscribe before connecting so nothing is missed.
        let messages = self.inner.connector.messages();
        handles.push(tokio::spawn(message_pump(self.clone(), messages)));

        let every = self.inner.config.health_check_interval;
        if !every.is_zero() {
            handles.push(tokio::spawn(health_check_task(self.clone(), every)));
        }

        let connector = Arc::clone(&self.inner.connector);
        let cancel = self.inner.cancel.clone();
        handles.push(tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                result = connector.connect() => match result {
                    Ok(()) => info!("connected to update broker"),
                    Err(e) => warn!(error = %e, "initial broker connection failed; will retry on next search"),
                },
            }
        }));
        debug!("tracker started");
    }

    /// Cancel background tasks, stop polling, drop the connection.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.sink.stop_poll();

        let handles: Vec<JoinHandle<()>> = self.lock_handles().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.inner.subscriptions.release();
        self.inner.connector.disconnect();
        self.inner.subscriptions.mark_disconnected();
        debug!("tracker shut down");
    }

    // ── Searches ─────────────────────────────────────────────────────

    /// Start tracking `msisdn`. Returns the backend session id.
    ///
    /// Replaces any previous search: its subscription, chunk buffers,
    /// poll loop and snapshot are all dropped. Live updates are
    /// (re)subscribed in the background while the push request is sent.
    pub async fn track(&self, msisdn: &str) -> Result<String, CoreError> {
        let msisdn = msisdn.trim();
        if msisdn.is_empty() {
            self.inner.sink.set_status(TrackerStatus::Failed {
                message: "Please enter a phone number".into(),
            });
            return Err(CoreError::Validation {
                message: "phone number is empty".into(),
            });
        }

        let action_id = Uuid::new_v4();
        let span = tracing::info_span!("track", %action_id, msisdn);
        self.run_search(msisdn).instrument(span).await
    }

    async fn run_search(&self, msisdn: &str) -> Result<String, CoreError> {
        let search = self.retarget(msisdn);
        info!("search started");

        self.spawn_subscribe();

        let request = PushRequest {
            agent_id: self.inner.config.agent_id.clone(),
            msisdn: msisdn.to_owned(),
            user_agent: self.inner.config.user_agent.clone(),
        };

        let accepted = match self.inner.backend.send_push(&request).await {
            Ok(accepted) => accepted,
            Err(e) => {
                let err = CoreError::from(e);
                warn!(error = %err, "push request rejected");
                if self.inner.sink.is_current_search(search) {
                    self.inner.sink.set_status(TrackerStatus::Failed {
                        message: err.to_string(),
                    });
                }
                return Err(err);
            }
        };

        let session_id = accepted.session_id;
        if !self.inner.sink.set_session(search, &session_id) {
            debug!(%session_id, "search superseded before the push was accepted");
            return Ok(session_id);
        }
        info!(%session_id, "push sent, waiting for device");

        let handle = spawn_poll(
            Arc::clone(&self.inner.backend),
            Arc::clone(&self.inner.sink),
            msisdn.to_owned(),
            session_id.clone(),
            self.inner.config.poll_interval,
        );
        self.inner.sink.attach_poll(handle);

        Ok(session_id)
    }

    /// Trigger the legacy direct search: no session, no poll fallback,
    /// results arrive on the topic only.
    pub async fn track_direct(&self, msisdn: &str) -> Result<Option<String>, CoreError> {
        let msisdn = msisdn.trim();
        if msisdn.is_empty() {
            return Err(CoreError::Validation {
                message: "phone number is empty".into(),
            });
        }

        let search = self.retarget(msisdn);
        self.spawn_subscribe();

        match self.inner.backend.search_device(msisdn).await {
            Ok(ack) => {
                if self.inner.sink.is_current_search(search) {
                    self.inner.sink.set_status(TrackerStatus::AwaitingDevice);
                }
                Ok(ack.message)
            }
            Err(e) => {
                let err = CoreError::from(e);
                if self.inner.sink.is_current_search(search) {
                    self.inner.sink.set_status(TrackerStatus::Failed {
                        message: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    /// End the current backend session. Best effort: failures are
    /// logged and returned, never retried, and leave the session (and its
    /// poll loop) running.
    pub async fn end_session(&self) -> Result<(), CoreError> {
        let Some(session_id) = self.inner.sink.session_id() else {
            return Err(CoreError::Validation {
                message: "no active session".into(),
            });
        };

        match self.inner.backend.end_session(&session_id).await {
            Ok(()) => {
                // Also stops the poll loop.
                self.inner.sink.end(&session_id);
                info!(%session_id, "session ended");
                Ok(())
            }
            Err(e) => {
                warn!(%session_id, error = %e, "failed to end session");
                Err(e.into())
            }
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<TrackerState> {
        self.inner.sink.subscribe()
    }

    pub fn state_stream(&self) -> StateStream {
        StateStream::new(self.inner.sink.subscribe())
    }

    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.inner.subscriptions.link()
    }

    pub fn current_snapshot(&self) -> Option<DeviceSnapshot> {
        self.inner.sink.snapshot()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.sink.is_polling()
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Switch the tracked entity and drop all chunk state, atomically with
    /// respect to the message pump.
    fn retarget(&self, msisdn: &str) -> u64 {
        let mut assembler = self.lock_assembler();
        let search = self.inner.sink.retarget(msisdn);
        assembler.reset();
        search
    }

    fn spawn_subscribe(&self) {
        let subscriptions = Arc::clone(&self.inner.subscriptions);
        let cancel = self.inner.cancel.clone();
        let task = tokio::spawn(
            async move {
                if let Err(e) = subscriptions.ensure_subscribed(&cancel).await {
                    warn!(error = %e, "live updates unavailable; relying on status polling");
                }
            }
            .in_current_span(),
        );

        let mut handles = self.lock_handles();
        handles.retain(|h| !h.is_finished());
        handles.push(task);
    }

    /// Route, classify, assemble and commit one topic message.
    fn handle_message(&self, message: &StompMessage) {
        let mut assembler = self.lock_assembler();

        let Some(entity) = self.inner.sink.entity() else {
            return;
        };
        let Some(value) = self.inner.subscriptions.route(message, &entity) else {
            return;
        };

        let result = InboundUpdate::classify(value).and_then(|u| assembler.ingest(u, &entity));
        match result {
            Ok(Assembly::Progress { received, total }) => {
                debug!(received, total, "chunk stored");
                self.inner
                    .sink
                    .set_status_for_entity(&entity, TrackerStatus::ReceivingChunks { received, total });
            }
            Ok(Assembly::Complete(done)) => {
                if self.inner.sink.commit(&entity, None, done.snapshot, done.info) {
                    info!(entity, "device data received via live update");
                }
            }
            Ok(Assembly::Ignored) => {}
            Err(e) => warn!(error = %e, "dropping update"),
        }
    }

    fn lock_assembler(&self) -> MutexGuard<'_, PayloadAssembler> {
        self.inner
            .assembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Feed every broker message through the pipeline, one at a time.
async fn message_pump<C: Connector>(
    tracker: Tracker<C>,
    mut messages: broadcast::Receiver<Arc<StompMessage>>,
) {
    let cancel = tracker.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = messages.recv() => match message {
                Ok(message) => tracker.handle_message(&message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "message pump lagged; updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("message pump exiting");
}

/// Advisory connection check: logs degradation, never reconnects.
async fn health_check_task<C: Connector>(tracker: Tracker<C>, every: Duration) {
    let cancel = tracker.inner.cancel.clone();
    let mut interval = tokio::time::interval(every);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let link = tracker.inner.subscriptions.link_state();
                if tracker.inner.connector.is_connected() {
                    debug!(%link, "broker connection healthy");
                } else if matches!(link, LinkState::Subscribed | LinkState::ConnectedUnsubscribed) {
                    tracker.inner.subscriptions.mark_disconnected();
                    warn!("broker connection lost; reconnecting on next search");
                }
            }
        }
    }
}
