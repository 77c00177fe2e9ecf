//! Mixer control.
//!
//! The orchestration loop talks to the video mixer through the
//! [`MixerControl`] capability: get/set the current scene, read a named
//! source's settings, and update a text source. The shipped
//! implementation is [`ObsMixer`], an obs-websocket protocol v5 client.
//!
//! Each call opens a fresh connection, identifies (with challenge/salt
//! auth when the server requires it), performs one request, and closes.
//! Calls are infrequent (a few per loop tick) and a per-call connection
//! keeps no state to resynchronize after mixer restarts.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{Result, SceneVoteError};

/// Capability: request/response control of the video mixer.
///
/// Every operation is fallible; callers decide whether a failure is
/// fatal (startup validation) or tolerable (a missed label update).
#[async_trait]
pub trait MixerControl: Send + Sync {
    /// Name of the currently visible scene.
    async fn get_current_scene(&self) -> Result<String>;

    /// Switch the visible scene by name.
    async fn set_current_scene(&self, scene_name: &str) -> Result<()>;

    /// Settings of a named input source. The capture address lives at
    /// `inputSettings.input` for media sources.
    async fn get_source_settings(&self, source_name: &str) -> Result<Value>;

    /// Replace the content of a named text source.
    async fn set_source_text(&self, source_name: &str, text: &str) -> Result<()>;
}

/// Pull the capture address out of a source-settings document.
pub fn capture_address(settings: &Value) -> Option<&str> {
    settings.get("inputSettings")?.get("input")?.as_str()
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// obs-websocket v5 client. Construction performs no I/O; call
/// [`ObsMixer::validate`] once at startup to fail fast on a bad
/// address or password.
pub struct ObsMixer {
    url: String,
    password: String,
}

impl ObsMixer {
    pub fn new(url: String, password: String) -> Self {
        Self { url, password }
    }

    /// Connect and identify once, proving the address and password are
    /// usable. Intended for startup, where failure is fatal.
    pub async fn validate(&self) -> Result<()> {
        let mut ws = self.connect_identified().await?;
        if let Err(e) = ws.close(None).await {
            warn!(error = %e, "mixer validation close failed");
        }
        debug!(url = %self.url, "mixer connection validated");
        Ok(())
    }

    /// Open a connection and complete the Hello/Identify/Identified
    /// handshake.
    async fn connect_identified(&self) -> Result<WsStream> {
        let (mut ws, _) = connect_async(&self.url).await?;

        let hello = read_json(&mut ws).await?;
        if hello["op"] != 0 {
            return Err(SceneVoteError::MixerCall(format!(
                "expected Hello, got op {}",
                hello["op"]
            )));
        }
        let identify = identify_message(&hello, &self.password);
        ws.send(Message::Text(identify.to_string())).await?;

        loop {
            let msg = read_json(&mut ws).await?;
            match msg["op"].as_i64() {
                Some(2) => break,
                Some(op) => {
                    debug!(op, "skipping pre-identify message");
                }
                None => {
                    return Err(SceneVoteError::MixerCall(
                        "malformed message during identify".to_string(),
                    ));
                }
            }
        }
        Ok(ws)
    }

    /// Perform one request over a fresh connection and return its
    /// `responseData` (an empty object for data-less responses).
    async fn call(&self, request_type: &str, request_data: Value) -> Result<Value> {
        let mut ws = self.connect_identified().await?;
        let request_id = format!("{:016x}", rand::random::<u64>());
        let request = json!({
            "op": 6,
            "d": {
                "requestType": request_type,
                "requestId": request_id,
                "requestData": request_data,
            }
        });
        ws.send(Message::Text(request.to_string())).await?;

        let response = loop {
            let msg = read_json(&mut ws).await?;
            if msg["op"] == 7 && msg["d"]["requestId"] == request_id.as_str() {
                break msg;
            }
            debug!(op = ?msg["op"], "skipping unrelated mixer message");
        };
        if let Err(e) = ws.close(None).await {
            warn!(error = %e, "mixer call close failed");
        }

        let status = &response["d"]["requestStatus"];
        if status["result"] != true {
            return Err(SceneVoteError::MixerCall(format!(
                "{request_type} failed: code {} ({})",
                status["code"],
                status["comment"].as_str().unwrap_or("no comment")
            )));
        }
        Ok(response["d"]
            .get("responseData")
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

#[async_trait]
impl MixerControl for ObsMixer {
    async fn get_current_scene(&self) -> Result<String> {
        let data = self.call("GetCurrentProgramScene", json!({})).await?;
        data["currentProgramSceneName"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                SceneVoteError::MixerCall("scene name missing from response".to_string())
            })
    }

    async fn set_current_scene(&self, scene_name: &str) -> Result<()> {
        self.call(
            "SetCurrentProgramScene",
            json!({ "sceneName": scene_name }),
        )
        .await?;
        Ok(())
    }

    async fn get_source_settings(&self, source_name: &str) -> Result<Value> {
        self.call("GetInputSettings", json!({ "inputName": source_name }))
            .await
    }

    async fn set_source_text(&self, source_name: &str, text: &str) -> Result<()> {
        self.call(
            "SetInputSettings",
            json!({
                "inputName": source_name,
                "inputSettings": { "text": text },
            }),
        )
        .await?;
        Ok(())
    }
}

/// Read the next text frame and parse it as JSON. Control frames are
/// handled by the websocket layer and skipped here.
async fn read_json(ws: &mut WsStream) -> Result<Value> {
    loop {
        let msg = ws
            .next()
            .await
            .ok_or_else(|| SceneVoteError::ConnectionClosed)??;
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).map_err(|e| {
                    SceneVoteError::MixerCall(format!("invalid mixer message: {e}"))
                });
            }
            Message::Close(_) => return Err(SceneVoteError::ConnectionClosed),
            _ => continue,
        }
    }
}

/// Build the Identify message answering a Hello, including the auth
/// string when the server sent a challenge.
fn identify_message(hello: &Value, password: &str) -> Value {
    let mut d = json!({ "rpcVersion": 1 });
    if let Some(auth) = hello["d"].get("authentication") {
        let challenge = auth["challenge"].as_str().unwrap_or_default();
        let salt = auth["salt"].as_str().unwrap_or_default();
        d["authentication"] = Value::String(auth_token(password, salt, challenge));
    }
    json!({ "op": 1, "d": d })
}

/// obs-websocket v5 auth: base64(sha256(base64(sha256(password + salt))
/// + challenge)).
fn auth_token(password: &str, salt: &str, challenge: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    let secret = BASE64.encode(hasher.finalize());

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(challenge.as_bytes());
    BASE64.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_token_is_deterministic() {
        let a = auth_token("hunter2", "salt", "challenge");
        let b = auth_token("hunter2", "salt", "challenge");
        assert_eq!(a, b);
        // base64 of a 32-byte digest.
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_auth_token_depends_on_all_inputs() {
        let base = auth_token("pwd", "salt", "challenge");
        assert_ne!(base, auth_token("other", "salt", "challenge"));
        assert_ne!(base, auth_token("pwd", "other", "challenge"));
        assert_ne!(base, auth_token("pwd", "salt", "other"));
    }

    #[test]
    fn test_identify_answers_challenge() {
        let hello = json!({
            "op": 0,
            "d": {
                "rpcVersion": 1,
                "authentication": { "challenge": "c", "salt": "s" }
            }
        });
        let identify = identify_message(&hello, "pwd");
        assert_eq!(identify["op"], 1);
        assert_eq!(identify["d"]["rpcVersion"], 1);
        assert_eq!(
            identify["d"]["authentication"].as_str().unwrap(),
            auth_token("pwd", "s", "c")
        );
    }

    #[test]
    fn test_identify_without_auth_requirement() {
        let hello = json!({ "op": 0, "d": { "rpcVersion": 1 } });
        let identify = identify_message(&hello, "pwd");
        assert_eq!(identify["op"], 1);
        assert!(identify["d"].get("authentication").is_none());
    }

    #[test]
    fn test_capture_address_extraction() {
        let settings = json!({
            "inputKind": "ffmpeg_source",
            "inputSettings": { "input": "rtsp://cam/1" }
        });
        assert_eq!(capture_address(&settings), Some("rtsp://cam/1"));
        assert_eq!(capture_address(&json!({})), None);
    }
}
