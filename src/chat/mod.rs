//! Chat platform integration: signed session API, streaming client, and
//! chat-event parsing.

mod client;
mod event;
mod session;
mod sign;

pub use client::{ChatClient, ChatClientHandle};
pub use event::{parse_chat_event, ChatEvent};
pub use session::{Session, SessionApi};
pub use sign::Signer;
