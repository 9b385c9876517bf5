// Subscription manager state machine against a scripted connector.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use devwatch_api::StompMessage;
use devwatch_core::{CoreError, DEFAULT_TOPIC, LinkState, RetryPolicy, SubscriptionManager};

use common::FakeConnector;

fn manager(connector: &FakeConnector, retry: RetryPolicy) -> SubscriptionManager<FakeConnector> {
    SubscriptionManager::new(Arc::new(connector.clone()), DEFAULT_TOPIC, retry)
}

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_success_subscribes_once() {
    let connector = FakeConnector::new([false, false, true]);
    let subs = manager(&connector, RetryPolicy::default());
    let started = tokio::time::Instant::now();

    let id = subs
        .ensure_subscribed(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        connector.events(),
        vec![
            "connect:err".to_owned(),
            "connect:err".to_owned(),
            "connect:ok".to_owned(),
            format!("subscribe:{DEFAULT_TOPIC}"),
        ]
    );
    assert_eq!(id.as_str(), "sub-0");
    assert_eq!(subs.link_state(), LinkState::Subscribed);

    // Two backoff waits happened before the third attempt.
    let policy = RetryPolicy::default();
    assert!(started.elapsed() >= policy.backoff(0) + policy.backoff(1));
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_cap() {
    let connector = FakeConnector::new([false; 8]);
    let subs = manager(
        &connector,
        RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        },
    );

    let err = subs
        .ensure_subscribed(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, CoreError::TransportConnect { attempts: 3, .. }),
        "got {err:?}"
    );
    assert_eq!(connector.count("connect:err"), 3);
    assert_eq!(connector.count("subscribe"), 0);
    assert_eq!(subs.link_state(), LinkState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_backoff() {
    let connector = FakeConnector::new([false; 8]);
    let subs = manager(&connector, RetryPolicy::default());
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let err = subs.ensure_subscribed(&cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert_eq!(connector.count("connect:err"), 1);
    assert_eq!(subs.link_state(), LinkState::Disconnected);
}

#[tokio::test]
async fn test_new_search_replaces_subscription_without_reconnect() {
    let connector = FakeConnector::always_up();
    let subs = manager(&connector, RetryPolicy::default());
    let cancel = CancellationToken::new();

    let first = subs.ensure_subscribed(&cancel).await.unwrap();
    let second = subs.ensure_subscribed(&cancel).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(connector.count("connect"), 1);
    assert_eq!(
        connector.events(),
        vec![
            "connect:ok".to_owned(),
            format!("subscribe:{DEFAULT_TOPIC}"),
            format!("unsubscribe:{first}"),
            format!("subscribe:{DEFAULT_TOPIC}"),
        ]
    );
    assert_eq!(subs.current(), Some(second));
}

#[tokio::test]
async fn test_lost_connection_reconnects_on_next_request() {
    let connector = FakeConnector::always_up();
    let subs = manager(&connector, RetryPolicy::default());
    let cancel = CancellationToken::new();

    subs.ensure_subscribed(&cancel).await.unwrap();
    connector.drop_connection();
    assert!(subs.mark_disconnected());
    assert_eq!(subs.link_state(), LinkState::Disconnected);
    assert!(subs.current().is_none());

    subs.ensure_subscribed(&cancel).await.unwrap();
    assert_eq!(connector.count("connect:ok"), 2);
    // The dead subscription is not unsubscribed on the new connection.
    assert_eq!(connector.count("unsubscribe"), 0);
    assert_eq!(subs.link_state(), LinkState::Subscribed);
}

#[tokio::test]
async fn test_route_filters_messages() {
    let connector = FakeConnector::always_up();
    let subs = manager(&connector, RetryPolicy::default());
    let id = subs
        .ensure_subscribed(&CancellationToken::new())
        .await
        .unwrap();

    let message = |subscription: Option<&str>, body: &str| StompMessage {
        subscription: subscription.map(String::from),
        destination: Some(DEFAULT_TOPIC.into()),
        message_id: None,
        body: body.into(),
    };

    let ok = message(Some(id.as_str()), r#"{"phoneNumber":"555","data":{}}"#);
    assert_eq!(subs.route(&ok, "555"), Some(json!({ "phoneNumber": "555", "data": {} })));

    let nested = message(None, r#"{"data":{"phoneNumber":"555"}}"#);
    assert!(subs.route(&nested, "555").is_some());

    let other_entity = message(Some(id.as_str()), r#"{"phoneNumber":"777"}"#);
    assert!(subs.route(&other_entity, "555").is_none());

    let old_subscription = message(Some("sub-99"), r#"{"phoneNumber":"555"}"#);
    assert!(subs.route(&old_subscription, "555").is_none());

    let garbage = message(Some(id.as_str()), "{not json");
    assert!(subs.route(&garbage, "555").is_none());
}
