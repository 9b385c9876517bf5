// Push backend HTTP client
//
// Wraps `reqwest::Client` with URL construction and error-body decoding
// for the session endpoints the tracker consumes. Responses are plain
// JSON (no envelope); non-2xx responses become `Error::Backend`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::backend::models::{
    BackendMessage, DeviceRecord, ErrorBody, PushAccepted, PushRequest, SearchDeviceRequest,
    SessionStatus,
};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Raw HTTP client for the push backend.
///
/// Cheap to share behind an `Arc`; `reqwest::Client` pools connections
/// internally.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
}

impl BackendClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the backend root (e.g. `http://localhost:8080`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
        }
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `POST /api/push/send` -- ask the backend to push a telemetry request
    /// to the device behind `msisdn`. Returns the server-assigned session id.
    pub async fn send_push(&self, request: &PushRequest) -> Result<PushAccepted, Error> {
        let url = self.api_url(&["push", "send"])?;
        self.post(url, request).await
    }

    /// `GET /api/push/status/{sessionId}`.
    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatus, Error> {
        let url = self.api_url(&["push", "status", session_id])?;
        self.get(url).await
    }

    /// `GET /api/debug/devices` -- the full device list.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, Error> {
        let url = self.api_url(&["debug", "devices"])?;
        self.get(url).await
    }

    /// Fetch the device list and pick the record for `msisdn`.
    pub async fn find_device(&self, msisdn: &str) -> Result<Option<DeviceRecord>, Error> {
        let devices = self.list_devices().await?;
        let found = devices.into_iter().find(|d| d.phone_number == msisdn);
        if found.is_none() {
            debug!(msisdn, "no device record for phone number");
        }
        Ok(found)
    }

    /// `POST /api/session/end?sessionId=...`.
    pub async fn end_session(&self, session_id: &str) -> Result<(), Error> {
        let mut url = self.api_url(&["session", "end"])?;
        url.query_pairs_mut().append_pair("sessionId", session_id);
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(Error::Transport)?;
        check_status(resp).await.map(|_| ())
    }

    /// Legacy direct trigger: `POST /api/search-device {phoneNumber}`.
    ///
    /// Does not create a session; updates arrive on the topic only.
    pub async fn search_device(&self, msisdn: &str) -> Result<BackendMessage, Error> {
        let url = self.api_url(&["search-device"])?;
        self.post(url, &SearchDeviceRequest { phone_number: msisdn })
            .await
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/api/{segments...}` with each segment percent-encoded.
    pub(crate) fn api_url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.join("api/")?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        parse_json(resp).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;
        parse_json(resp).await
    }
}

/// Ensure the base URL ends in `/` so `join` appends instead of replacing.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Map non-2xx responses into `Error::Backend`, passing the response
/// through otherwise.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| {
            if body.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_owned()
            } else {
                preview(&body).to_owned()
            }
        });

    Err(Error::Backend {
        status: status.as_u16(),
        message,
    })
}

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let resp = check_status(resp).await?;
    let body = resp.text().await.map_err(Error::Transport)?;

    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(&body)),
        body: body.clone(),
    })
}

/// First 200 bytes of a body, cut on a char boundary.
fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
