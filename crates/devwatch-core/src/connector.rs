// ── Transport connector seam ──
//
// The subscription manager talks to the broker through this trait so the
// state machine can be driven by a scripted connector in tests. The
// production implementation is `devwatch_api::StompClient`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;

use devwatch_api::{StompClient, StompMessage, SubscriptionId};

/// A single publish/subscribe connection.
///
/// `connect` must be safe to call concurrently and keep at most one live
/// physical connection. Implementations never retry on their own.
pub trait Connector: Send + Sync + 'static {
    /// Open the connection unless one is live. Resolves with the outcome.
    fn connect(&self) -> impl Future<Output = Result<(), devwatch_api::Error>> + Send;

    fn is_connected(&self) -> bool;

    fn disconnect(&self);

    /// Subscribe without waiting for an acknowledgement.
    fn subscribe(&self, destination: &str) -> Result<SubscriptionId, devwatch_api::Error>;

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), devwatch_api::Error>;

    /// Inbound messages, across reconnects.
    fn messages(&self) -> broadcast::Receiver<Arc<StompMessage>>;
}

impl Connector for StompClient {
    fn connect(&self) -> impl Future<Output = Result<(), devwatch_api::Error>> + Send {
        StompClient::connect(self)
    }

    fn is_connected(&self) -> bool {
        StompClient::is_connected(self)
    }

    fn disconnect(&self) {
        StompClient::disconnect(self);
    }

    fn subscribe(&self, destination: &str) -> Result<SubscriptionId, devwatch_api::Error> {
        StompClient::subscribe(self, destination)
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), devwatch_api::Error> {
        StompClient::unsubscribe(self, id)
    }

    fn messages(&self) -> broadcast::Receiver<Arc<StompMessage>> {
        StompClient::messages(self)
    }
}
