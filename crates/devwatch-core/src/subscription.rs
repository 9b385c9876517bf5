// ── Topic subscription manager ──
//
// Keeps one subscription to the update topic on behalf of the tracked
// entity. Connecting (with retry) happens only here and only when a search
// asks for it; the connector itself never retries.
//
// Link states: Disconnected -> Connecting -> ConnectedUnsubscribed ->
// Subscribed. A new search while connected swaps the subscription in
// place without reconnecting.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use devwatch_api::{StompMessage, SubscriptionId};

use crate::config::RetryPolicy;
use crate::connector::Connector;
use crate::error::CoreError;
use crate::model::LinkState;

pub struct SubscriptionManager<C> {
    connector: Arc<C>,
    topic: String,
    retry: RetryPolicy,
    link: watch::Sender<LinkState>,
    current: Mutex<Option<SubscriptionId>>,
    /// Serializes `ensure_subscribed` callers.
    gate: tokio::sync::Mutex<()>,
}

impl<C: Connector> SubscriptionManager<C> {
    pub fn new(connector: Arc<C>, topic: impl Into<String>, retry: RetryPolicy) -> Self {
        let (link, _) = watch::channel(LinkState::Disconnected);
        Self {
            connector,
            topic: topic.into(),
            retry,
            link,
            current: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Make sure a fresh subscription to the topic exists.
    ///
    /// Connects first (retrying per policy) when there is no live
    /// connection. Any previous subscription is released before the new
    /// one is created.
    pub async fn ensure_subscribed(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SubscriptionId, CoreError> {
        let _gate = self.gate.lock().await;

        if self.connector.is_connected() {
            debug!("broker already connected, replacing subscription");
        } else {
            self.connect_with_retry(cancel).await?;
        }
        self.resubscribe()
    }

    async fn connect_with_retry(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        // The old handle died with its connection.
        self.lock_current().take();
        self.link.send_replace(LinkState::Connecting);

        let mut failed: u32 = 0;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.link.send_replace(LinkState::Disconnected);
                    return Err(CoreError::Cancelled);
                }
                result = self.connector.connect() => result,
            };

            let err = match result {
                Ok(()) => {
                    info!(attempts = failed + 1, "connected to update broker");
                    self.link.send_replace(LinkState::ConnectedUnsubscribed);
                    return Ok(());
                }
                Err(e) => e,
            };

            failed += 1;
            warn!(error = %err, attempt = failed, "broker connect failed");

            if !self.retry.allows(failed) {
                self.link.send_replace(LinkState::Disconnected);
                return Err(CoreError::TransportConnect {
                    attempts: failed,
                    reason: err.to_string(),
                });
            }

            let delay = self.retry.backoff(failed - 1);
            info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = failed,
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.link.send_replace(LinkState::Disconnected);
                    return Err(CoreError::Cancelled);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn resubscribe(&self) -> Result<SubscriptionId, CoreError> {
        let mut current = self.lock_current();

        if let Some(previous) = current.take() {
            if let Err(e) = self.connector.unsubscribe(&previous) {
                debug!(subscription = %previous, error = %e, "unsubscribe failed");
            }
        }

        match self.connector.subscribe(&self.topic) {
            Ok(id) => {
                info!(subscription = %id, topic = %self.topic, "subscribed to device updates");
                *current = Some(id.clone());
                self.link.send_replace(LinkState::Subscribed);
                Ok(id)
            }
            Err(e) => {
                warn!(error = %e, topic = %self.topic, "subscribe failed");
                self.link.send_replace(if self.connector.is_connected() {
                    LinkState::ConnectedUnsubscribed
                } else {
                    LinkState::Disconnected
                });
                Err(e.into())
            }
        }
    }

    /// Release the current subscription, if any.
    pub fn release(&self) {
        if let Some(id) = self.lock_current().take() {
            if let Err(e) = self.connector.unsubscribe(&id) {
                debug!(subscription = %id, error = %e, "unsubscribe failed");
            }
            if self.connector.is_connected() {
                self.link.send_replace(LinkState::ConnectedUnsubscribed);
            }
        }
    }

    /// Record that the connection is gone. Does not reconnect.
    pub fn mark_disconnected(&self) -> bool {
        self.lock_current().take();
        self.link.send_if_modified(|link| {
            if *link == LinkState::Disconnected {
                return false;
            }
            *link = LinkState::Disconnected;
            true
        })
    }

    /// Filter an inbound message: current subscription, parsable JSON,
    /// addressed to `entity` (top level or under `data`).
    pub fn route(&self, message: &StompMessage, entity: &str) -> Option<Value> {
        if let Some(sub) = message.subscription.as_deref() {
            let current = self.lock_current();
            if current.as_ref().map(SubscriptionId::as_str) != Some(sub) {
                debug!(subscription = sub, "dropping message for a released subscription");
                return None;
            }
        }

        let value: Value = match serde_json::from_str(&message.body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "dropping unparsable update");
                return None;
            }
        };

        if matches_entity(&value, entity) {
            Some(value)
        } else {
            debug!(entity, "dropping update for another entity");
            None
        }
    }

    pub fn link(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    pub fn current(&self) -> Option<SubscriptionId> {
        self.lock_current().clone()
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<SubscriptionId>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `phoneNumber` at the top level or under `data` equals `entity`.
pub fn matches_entity(update: &Value, entity: &str) -> bool {
    let top = update.get("phoneNumber").and_then(Value::as_str);
    let nested = update
        .get("data")
        .and_then(|d| d.get("phoneNumber"))
        .and_then(Value::as_str);
    top == Some(entity) || nested == Some(entity)
}
