// Shared test fixtures: a scripted connector standing in for the broker.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;

use devwatch_api::{Error, StompMessage, SubscriptionId};
use devwatch_core::Connector;

struct FakeInner {
    /// Outcome of each upcoming `connect`; empty means success.
    script: Mutex<VecDeque<bool>>,
    connected: AtomicBool,
    events: Mutex<Vec<String>>,
    next_sub: AtomicU64,
    current_sub: Mutex<Option<String>>,
    tx: broadcast::Sender<Arc<StompMessage>>,
}

/// Scripted in-memory connector. Clones share state.
#[derive(Clone)]
pub struct FakeConnector {
    inner: Arc<FakeInner>,
}

impl FakeConnector {
    pub fn new(outcomes: impl IntoIterator<Item = bool>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(FakeInner {
                script: Mutex::new(outcomes.into_iter().collect()),
                connected: AtomicBool::new(false),
                events: Mutex::new(Vec::new()),
                next_sub: AtomicU64::new(0),
                current_sub: Mutex::new(None),
                tx,
            }),
        }
    }

    pub fn always_up() -> Self {
        Self::new([])
    }

    /// Calls seen so far, e.g. `connect:err`, `subscribe:/topic/x`.
    pub fn events(&self) -> Vec<String> {
        self.inner.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Deliver `body` as if the broker sent it on the live subscription.
    pub fn publish(&self, body: &Value) {
        let subscription = self.inner.current_sub.lock().unwrap().clone();
        self.publish_raw(subscription, body.to_string());
    }

    pub fn publish_raw(&self, subscription: Option<String>, body: String) {
        let _ = self.inner.tx.send(Arc::new(StompMessage {
            subscription,
            destination: Some(devwatch_core::DEFAULT_TOPIC.into()),
            message_id: None,
            body,
        }));
    }

    /// Simulate the broker going away.
    pub fn drop_connection(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    fn record(&self, event: String) {
        self.inner.events.lock().unwrap().push(event);
    }
}

impl Connector for FakeConnector {
    fn connect(&self) -> impl Future<Output = Result<(), Error>> + Send {
        async move {
            tokio::task::yield_now().await;
            if self.inner.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
            let ok = self.inner.script.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                self.record("connect:ok".into());
                self.inner.connected.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                self.record("connect:err".into());
                Err(Error::WebSocketConnect("connection refused".into()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.record("disconnect".into());
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    fn subscribe(&self, destination: &str) -> Result<SubscriptionId, Error> {
        if !self.is_connected() {
            self.record("subscribe:rejected".into());
            return Err(Error::NotConnected);
        }
        let n = self.inner.next_sub.fetch_add(1, Ordering::SeqCst);
        let id = format!("sub-{n}");
        *self.inner.current_sub.lock().unwrap() = Some(id.clone());
        self.record(format!("subscribe:{destination}"));
        Ok(SubscriptionId::new(id))
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.record(format!("unsubscribe:{id}"));
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<Arc<StompMessage>> {
        self.inner.tx.subscribe()
    }
}
