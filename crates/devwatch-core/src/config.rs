// ── Runtime tracker configuration ──
//
// These types describe *where* the backend lives and how the pipeline
// paces itself. They never touch disk: devwatch-config (or a test) builds
// a `TrackerConfig` and hands it in.

use std::time::Duration;

use url::Url;

/// Destination every device update is published on.
pub const DEFAULT_TOPIC: &str = "/topic/device-updates";

/// Reconnect policy for the update broker.
///
/// Exponential backoff with deterministic jitter:
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt. Default: 2s.
    pub initial_delay: Duration,
    /// Ceiling for the exponential growth. Default: 30s.
    pub max_delay: Duration,
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.min(31)).unwrap_or(31);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exp);
        let capped = base.min(self.max_delay.as_secs_f64());

        // Deterministic jitter seeded from the attempt number.
        let jitter = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }

    /// Whether another attempt is allowed after `failed` failures.
    pub fn allows(&self, failed: u32) -> bool {
        self.max_attempts.is_none_or(|max| failed < max)
    }
}

/// Configuration for one tracker.
///
/// Built by the CLI from a profile, passed to `Tracker`.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Push backend root (e.g. `http://localhost:8080`).
    pub backend_url: Url,
    /// STOMP-over-WebSocket endpoint (e.g. `ws://localhost:8080/socket/websocket`).
    pub websocket_url: Url,
    /// Destination carrying device updates.
    pub topic: String,
    /// Agent id sent with every push request.
    pub agent_id: String,
    /// User agent sent with every push request and HTTP call.
    pub user_agent: String,
    /// Status poll cadence.
    pub poll_interval: Duration,
    /// Advisory connection health check cadence.
    pub health_check_interval: Duration,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Broker reconnect policy.
    pub retry: RetryPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            backend_url: Url::parse("http://localhost:8080")
                .unwrap_or_else(|_| unreachable!("static URL")),
            websocket_url: Url::parse(devwatch_api::websocket::DEFAULT_BROKER_URL)
                .unwrap_or_else(|_| unreachable!("static URL")),
            topic: DEFAULT_TOPIC.into(),
            agent_id: "devwatch".into(),
            user_agent: concat!("devwatch/", env!("CARGO_PKG_VERSION")).into(),
            poll_interval: Duration::from_secs(2),
            health_check_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Derive the broker endpoint for a backend: same host, `ws`/`wss`
/// scheme, the raw WebSocket path of the SockJS endpoint. Backends that
/// mount STOMP elsewhere need an explicit `websocket` URL.
pub fn derive_websocket_url(backend: &Url) -> Result<Url, crate::CoreError> {
    let scheme = if backend.scheme() == "https" { "wss" } else { "ws" };
    let host = backend.host_str().ok_or_else(|| crate::CoreError::Config {
        message: format!("backend URL has no host: {backend}"),
    })?;
    let authority = match backend.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    let path = devwatch_api::websocket::DEFAULT_BROKER_PATH;
    Url::parse(&format!("{scheme}://{authority}{path}")).map_err(|e| crate::CoreError::Config {
        message: format!("cannot derive WebSocket URL: {e}"),
    })
}
