//! Signed HTTP calls that manage the platform "application session".
//!
//! Three POST endpoints: `/v2/app/start` returns the streaming connection
//! address and an opaque auth payload, `/v2/app/heartbeat` keeps the session
//! alive, `/v2/app/end` closes it. Every call is signed via [`Signer`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::sign::Signer;
use crate::error::{Result, SceneVoteError};

/// Retry bound for session start while the response shape is transient.
const START_RETRY_MAX: u32 = 5;

/// Fixed backoff between session start retries.
const START_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// An opened application session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Server-assigned session identifier, echoed on heartbeat/end.
    pub session_id: String,
    /// Address of the streaming connection to open.
    pub connect_url: String,
    /// Opaque payload to send in the AUTH frame.
    pub auth_body: String,
}

/// Client for the signed session API.
pub struct SessionApi {
    http: reqwest::Client,
    host: String,
    signer: Signer,
    id_code: String,
    app_id: i64,
}

impl SessionApi {
    /// Create a session API client. No network side effects.
    pub fn new(
        host: impl Into<String>,
        signer: Signer,
        id_code: impl Into<String>,
        app_id: i64,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
            signer,
            id_code: id_code.into(),
            app_id,
        }
    }

    /// Start an application session.
    ///
    /// Retries up to 5 times with a 1 s backoff while the response carries a
    /// null or missing session block (the platform's transient not-ready
    /// shape). Any other failure is returned immediately; exhausting the
    /// retries yields `SessionUnavailable`.
    pub async fn start(&self) -> Result<Session> {
        let body = json!({ "code": self.id_code, "app_id": self.app_id }).to_string();

        for attempt in 1..=START_RETRY_MAX {
            let data = self.post("/v2/app/start", &body).await?;

            if let Some(session) = parse_session(&data) {
                info!(session_id = %session.session_id, "application session started");
                return Ok(session);
            }
            debug!(attempt, "session not ready yet, retrying");
            tokio::time::sleep(START_RETRY_INTERVAL).await;
        }

        Err(SceneVoteError::SessionUnavailable(format!(
            "no session id within {START_RETRY_MAX} retries"
        )))
    }

    /// Send a session heartbeat. A non-success response is an error for
    /// this call; the caller decides how fatal that is.
    pub async fn heartbeat(&self, session_id: &str) -> Result<()> {
        let body = json!({ "game_id": session_id }).to_string();
        let data = self.post("/v2/app/heartbeat", &body).await?;
        debug!(?data, "session heartbeat ok");
        Ok(())
    }

    /// End the session. Errors are returned for the caller to log;
    /// teardown treats them as best-effort.
    pub async fn end(&self, session_id: &str) -> Result<()> {
        let body = json!({ "game_id": session_id, "app_id": self.app_id }).to_string();
        self.post("/v2/app/end", &body).await?;
        debug!(session_id, "application session ended");
        Ok(())
    }

    async fn post(&self, path: &str, body: &str) -> Result<Value> {
        let url = format!("{}{}", self.host, path);
        let headers = header_map(self.signer.signed_headers(body));

        let response = self
            .http
            .post(&url)
            .headers(headers)
            .body(body.to_string())
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<Value>().await?)
    }
}

/// Extract the session fields from a start response, or `None` when the
/// response carries the transient not-ready shape.
fn parse_session(data: &Value) -> Option<Session> {
    let inner = data.get("data")?;
    let session_id = inner.get("game_info")?.get("game_id")?;
    // The id may arrive as a number or a string.
    let session_id = match session_id {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let ws_info = inner.get("websocket_info")?;
    let connect_url = ws_info.get("wss_link")?.get(0)?.as_str()?.to_string();
    let auth_body = ws_info.get("auth_body")?.as_str()?.to_string();
    Some(Session {
        session_id,
        connect_url,
        auth_body,
    })
}

fn header_map(headers: std::collections::BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            map.insert(name, value);
        }
    }
    map
}
