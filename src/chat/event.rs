//! Chat events and the message-envelope shapes they are parsed from.

use serde::Deserialize;

/// Envelope command for a plain chat message. Other commands (gifts,
/// guard purchases, ...) are ignored.
const CHAT_MESSAGE_CMD: &str = "LIVE_OPEN_PLATFORM_DM";

/// A single chat message, as delivered to the vote aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Stable id of the sender, used for one-vote-per-round dedup.
    pub voter_id: String,
    /// Display name, only used for logging.
    pub display_name: String,
    /// Raw message text.
    pub message: String,
    /// Fan-medal name, when the sender wears one.
    pub medal_name: Option<String>,
    /// Fan-medal level, when the sender wears one.
    pub medal_level: Option<i64>,
}

/// Wire shape of a MESSAGE_REPLY body.
#[derive(Debug, Deserialize)]
struct Envelope {
    cmd: String,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    uid: serde_json::Value,
    uname: String,
    msg: String,
    #[serde(default)]
    fans_medal_name: Option<String>,
    #[serde(default)]
    fans_medal_level: Option<i64>,
}

/// Parse a MESSAGE_REPLY body into a [`ChatEvent`].
///
/// Returns `None` for envelopes that are not chat messages or do not parse;
/// the receive loop drops those silently.
pub fn parse_chat_event(body: &[u8]) -> Option<ChatEvent> {
    let envelope: Envelope = serde_json::from_slice(body).ok()?;
    if envelope.cmd != CHAT_MESSAGE_CMD {
        return None;
    }
    let data = envelope.data?;
    // uid arrives as a number on the wire; keep it as a string key.
    let voter_id = match data.uid {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(ChatEvent {
        voter_id,
        display_name: data.uname,
        message: data.msg,
        medal_name: data.fans_medal_name.filter(|s| !s.is_empty()),
        medal_level: data.fans_medal_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_message() {
        let body = br#"{
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": {
                "uid": 4378037,
                "uname": "viewer1",
                "msg": "a",
                "fans_medal_name": "club",
                "fans_medal_level": 5
            }
        }"#;
        let event = parse_chat_event(body).unwrap();
        assert_eq!(event.voter_id, "4378037");
        assert_eq!(event.display_name, "viewer1");
        assert_eq!(event.message, "a");
        assert_eq!(event.medal_name.as_deref(), Some("club"));
        assert_eq!(event.medal_level, Some(5));
    }

    #[test]
    fn test_parse_without_medal() {
        let body = br#"{
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": { "uid": "u1", "uname": "n", "msg": "b" }
        }"#;
        let event = parse_chat_event(body).unwrap();
        assert_eq!(event.medal_name, None);
        assert_eq!(event.medal_level, None);
    }

    #[test]
    fn test_empty_medal_name_treated_as_absent() {
        let body = br#"{
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": { "uid": 1, "uname": "n", "msg": "b", "fans_medal_name": "" }
        }"#;
        assert_eq!(parse_chat_event(body).unwrap().medal_name, None);
    }

    #[test]
    fn test_gift_envelope_ignored() {
        let body = br#"{
            "cmd": "LIVE_OPEN_PLATFORM_SEND_GIFT",
            "data": { "uid": 1, "uname": "n", "msg": "", "gift_id": 31036 }
        }"#;
        assert!(parse_chat_event(body).is_none());
    }

    #[test]
    fn test_malformed_body_ignored() {
        assert!(parse_chat_event(b"not json").is_none());
        assert!(parse_chat_event(b"{\"cmd\":\"LIVE_OPEN_PLATFORM_DM\"}").is_none());
        assert!(parse_chat_event(b"{}").is_none());
    }
}
