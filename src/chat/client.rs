//! Long-lived client for the chat platform's streaming connection.
//!
//! Lifecycle: obtain a session over the signed HTTP API, open the
//! websocket, send the AUTH frame, then run three concurrent loops until
//! stopped or the connection drops:
//!
//! - receive loop: decodes frames, parses chat envelopes, pushes
//!   [`ChatEvent`]s into the bounded event queue (drop-on-full)
//! - connection heartbeat: HEARTBEAT frame every 20 s
//! - session heartbeat: signed HTTP heartbeat every 20 s
//!
//! The loops share nothing but the connection halves; the client owns the
//! frame sequence counter exclusively. Construction is side-effect free;
//! all work starts in [`ChatClient::start`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event::{parse_chat_event, ChatEvent};
use super::session::{Session, SessionApi};
use crate::error::Result;
use crate::protocol::{Frame, FrameBuffer, Opcode};
use crate::queue::EventSender;

/// Interval for both the connection and the session heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// How long to wait for the AUTH reply before proceeding unauthenticated.
const AUTH_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// An inert chat client. Call [`ChatClient::start`] to go live.
pub struct ChatClient {
    api: Arc<SessionApi>,
    max_frame_len: u32,
}

/// Handle to a running chat client.
pub struct ChatClientHandle {
    api: Arc<SessionApi>,
    session_id: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    authenticated: Arc<AtomicBool>,
}

impl ChatClient {
    /// Create a client over a session API. No network side effects.
    pub fn new(api: SessionApi, max_frame_len: u32) -> Self {
        Self {
            api: Arc::new(api),
            max_frame_len,
        }
    }

    /// Obtain a session, connect, authenticate, and spawn the three loops.
    ///
    /// Fails with `SessionUnavailable` if the session bootstrap exhausts its
    /// retries, or with a websocket error if the connection cannot open.
    /// An AUTH rejection is logged and surfaced via
    /// [`ChatClientHandle::authenticated`], not returned as an error.
    pub async fn start(self, events: EventSender<ChatEvent>) -> Result<ChatClientHandle> {
        let session = self.api.start().await?;
        self.start_with_session(session, events).await
    }

    /// Connect and run against an already-obtained session.
    pub async fn start_with_session(
        self,
        session: Session,
        events: EventSender<ChatEvent>,
    ) -> Result<ChatClientHandle> {
        let (ws, _) = tokio_tungstenite::connect_async(&session.connect_url).await?;
        info!(url = %session.connect_url, "streaming connection open");
        let (mut sink, mut stream) = ws.split();

        // AUTH must be the first frame on the wire. Sequence 1; the
        // heartbeat task continues the counter from there.
        let mut sequence = 1u32;
        let auth = Frame::new(Opcode::Auth, sequence, Bytes::from(session.auth_body.clone()));
        sink.send(Message::Binary(auth.encode())).await?;

        let authenticated = Arc::new(AtomicBool::new(false));
        match tokio::time::timeout(AUTH_REPLY_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => {
                if auth_reply_ok(&data, self.max_frame_len) {
                    info!("auth success");
                    authenticated.store(true, Ordering::Release);
                } else {
                    warn!("auth failed, continuing unauthenticated");
                }
            }
            Ok(Some(Ok(other))) => warn!(?other, "unexpected auth reply message"),
            Ok(Some(Err(e))) => warn!(error = %e, "auth reply receive error"),
            Ok(None) => warn!("connection closed before auth reply"),
            Err(_) => warn!("auth reply timed out, continuing unauthenticated"),
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(3);

        // Receive loop: read half only.
        {
            let cancel = cancel.clone();
            let max_frame_len = self.max_frame_len;
            tasks.push(tokio::spawn(async move {
                recv_loop(&mut stream, events, cancel, max_frame_len).await;
            }));
        }

        // Connection heartbeat: write half only.
        {
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
                    }
                    sequence = sequence.wrapping_add(1);
                    let frame = Frame::empty(Opcode::Heartbeat, sequence);
                    if let Err(e) = sink.send(Message::Binary(frame.encode())).await {
                        error!(error = %e, "connection heartbeat failed, stopping");
                        break;
                    }
                    debug!(sequence, "connection heartbeat sent");
                }
            }));
        }

        // Session heartbeat: signed HTTP, independent of the socket.
        {
            let cancel = cancel.clone();
            let api = self.api.clone();
            let session_id = session.session_id.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
                    }
                    if let Err(e) = api.heartbeat(&session_id).await {
                        // Fatal for this task only; the socket loops keep going.
                        error!(error = %e, "session heartbeat failed, stopping");
                        break;
                    }
                }
            }));
        }

        Ok(ChatClientHandle {
            api: self.api,
            session_id: session.session_id,
            cancel,
            tasks,
            authenticated,
        })
    }
}

impl ChatClientHandle {
    /// Whether the AUTH handshake was acknowledged by the platform.
    ///
    /// The client keeps running after a rejected AUTH; callers that care
    /// can observe the state here.
    pub fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Stop all loops and end the session. The end call is best-effort;
    /// its errors are logged, not returned.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        if let Err(e) = self.api.end(&self.session_id).await {
            warn!(error = %e, "failed to end application session");
        }
        info!("chat client stopped");
    }
}

/// Read frames until cancellation or connection error.
async fn recv_loop<S>(
    stream: &mut S,
    events: EventSender<ChatEvent>,
    cancel: CancellationToken,
    max_frame_len: u32,
) where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    debug!("receive loop start");
    let mut buffer = FrameBuffer::new(max_frame_len);
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = stream.next() => msg,
        };
        let data = match message {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => {
                info!("streaming connection closed");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!(error = %e, "streaming connection error");
                break;
            }
        };
        let frames = match buffer.push(&data) {
            Ok(frames) => frames,
            Err(e) => {
                // Malformed frame: drop buffered bytes, keep the connection.
                warn!(error = %e, "dropping malformed frame");
                buffer.clear();
                continue;
            }
        };
        for frame in frames {
            dispatch_frame(&frame, &events);
        }
    }
}

/// Route one decoded frame; only MESSAGE_REPLY chat envelopes produce events.
fn dispatch_frame(frame: &Frame, events: &EventSender<ChatEvent>) {
    match frame.opcode {
        Opcode::MessageReply => {
            if let Some(event) = parse_chat_event(&frame.body) {
                if !events.try_push(event.clone()) {
                    warn!(
                        voter = %event.voter_id,
                        "event queue full, dropping chat event"
                    );
                }
            }
            // Non-chat envelopes (gifts etc.) are silently ignored.
        }
        Opcode::HeartbeatReply => debug!("heartbeat reply"),
        _ => {}
    }
}

/// An AUTH reply is accepted iff its JSON body carries `"code": 0`.
fn auth_reply_ok(data: &[u8], max_frame_len: u32) -> bool {
    let mut buffer = FrameBuffer::new(max_frame_len);
    let frames = match buffer.push(data) {
        Ok(frames) => frames,
        Err(_) => return false,
    };
    frames
        .iter()
        .find(|f| f.opcode == Opcode::AuthReply)
        .and_then(|f| serde_json::from_slice::<serde_json::Value>(&f.body).ok())
        .and_then(|v| v.get("code").and_then(|c| c.as_i64()))
        == Some(0)
}
