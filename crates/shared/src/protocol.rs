//! Wire protocol: frame codec, reserved event names and close-code interpretation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::models::deserialize_optional_id;

/// Protocol revision announced in the socket URL.
pub const PROTOCOL_VERSION: u8 = 7;

/// Prefix of events reserved for the backend.
pub const EVENT_PREFIX: &str = "webpubsub:";
/// Prefix of events consumed by the client and never shown to applications.
pub const INTERNAL_PREFIX: &str = "webpubsub_internal:";
/// Prefix required for events triggered by clients.
pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// Reserved event names.
pub mod events {
    pub const CONNECTION_ESTABLISHED: &str = "webpubsub:connection_established";
    pub const ERROR: &str = "webpubsub:error";
    pub const PING: &str = "webpubsub:ping";
    pub const PONG: &str = "webpubsub:pong";
    pub const SUBSCRIBE: &str = "webpubsub:subscribe";
    pub const UNSUBSCRIBE: &str = "webpubsub:unsubscribe";
    pub const SIGNIN: &str = "webpubsub:signin";
    pub const SIGNIN_SUCCESS: &str = "webpubsub:signin_success";

    pub const SUBSCRIPTION_SUCCEEDED: &str = "webpubsub:subscription_succeeded";
    pub const SUBSCRIPTION_ERROR: &str = "webpubsub:subscription_error";
    pub const MEMBER_ADDED: &str = "webpubsub:member_added";
    pub const MEMBER_REMOVED: &str = "webpubsub:member_removed";

    pub const INTERNAL_SUBSCRIPTION_SUCCEEDED: &str = "webpubsub_internal:subscription_succeeded";
    pub const INTERNAL_MEMBER_ADDED: &str = "webpubsub_internal:member_added";
    pub const INTERNAL_MEMBER_REMOVED: &str = "webpubsub_internal:member_removed";
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
}

impl WireMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            channel: None,
            data,
            user_id: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn is_internal(&self) -> bool {
        self.event.starts_with(INTERNAL_PREFIX)
    }
}

/// Decodes one text frame.
///
/// A string `data` field holding JSON is replaced by the parsed value; if the
/// inner string is not JSON it stays a string.
pub fn decode_message(raw: &str) -> Result<WireMessage, ProtocolError> {
    let mut message: WireMessage =
        serde_json::from_str(raw).map_err(|e| ProtocolError::MessageParse {
            raw: raw.to_string(),
            reason: e.to_string(),
        })?;

    if let Value::String(inner) = &message.data {
        if let Ok(parsed) = serde_json::from_str::<Value>(inner) {
            message.data = parsed;
        }
    }

    Ok(message)
}

/// Encodes a frame as `{event, data, channel?, user_id?}`.
pub fn encode_message(message: &WireMessage) -> String {
    let mut frame = Map::new();
    frame.insert("event".into(), Value::String(message.event.clone()));
    frame.insert("data".into(), message.data.clone());
    if let Some(channel) = &message.channel {
        frame.insert("channel".into(), Value::String(channel.clone()));
    }
    if let Some(user_id) = &message.user_id {
        frame.insert("user_id".into(), Value::String(user_id.clone()));
    }
    Value::Object(frame).to_string()
}

// --- Close codes ---

/// What the connection manager should do after a close code or protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseAction {
    /// Reconnect immediately, forcing TLS.
    TlsOnly,
    /// Do not reconnect.
    Refused,
    /// Reconnect after a pause.
    Backoff,
    /// Reconnect immediately.
    Retry,
}

impl CloseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseAction::TlsOnly => "tls_only",
            CloseAction::Refused => "refused",
            CloseAction::Backoff => "backoff",
            CloseAction::Retry => "retry",
        }
    }
}

impl std::fmt::Display for CloseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a close code onto the action the client takes.
pub fn close_action(code: u16) -> Option<CloseAction> {
    match code {
        1002..=1004 => Some(CloseAction::Backoff),
        0..=3999 => None,
        4000 => Some(CloseAction::TlsOnly),
        4001..=4099 => Some(CloseAction::Refused),
        4100..=4199 => Some(CloseAction::Backoff),
        4200..=4299 => Some(CloseAction::Retry),
        _ => Some(CloseAction::Refused),
    }
}

/// Server-reported error attached to a close or a `webpubsub:error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub message: String,
}

/// Normal closures (1000, 1001) carry no error.
pub fn close_error(code: u16, reason: &str) -> Option<CloseError> {
    match code {
        1000 | 1001 => None,
        _ => Some(CloseError {
            code: Some(code),
            message: reason.to_string(),
        }),
    }
}

// --- Handshake ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Connected {
        socket_id: String,
        activity_timeout: Duration,
    },
    Failed {
        action: Option<CloseAction>,
        error: Option<CloseError>,
    },
}

/// Interprets the first frame received on a fresh socket.
pub fn process_handshake(raw: &str) -> Result<Handshake, ProtocolError> {
    let message = decode_message(raw)?;

    match message.event.as_str() {
        events::CONNECTION_ESTABLISHED => {
            let activity_timeout = message
                .data
                .get("activity_timeout")
                .and_then(Value::as_f64)
                .filter(|secs| *secs > 0.0)
                .ok_or(ProtocolError::MissingActivityTimeout)?;
            let socket_id = message
                .data
                .get("socket_id")
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::InvalidHandshake("missing socket_id".into()))?;

            Ok(Handshake::Connected {
                socket_id: socket_id.to_string(),
                activity_timeout: Duration::from_millis((activity_timeout * 1000.0) as u64),
            })
        }
        events::ERROR => {
            let code = message
                .data
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok());
            let text = message
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();

            Ok(match code {
                Some(code) => Handshake::Failed {
                    action: close_action(code),
                    error: close_error(code, text),
                },
                None => Handshake::Failed {
                    action: Some(CloseAction::Refused),
                    error: Some(CloseError {
                        code: None,
                        message: text.to_string(),
                    }),
                },
            })
        }
        other => Err(ProtocolError::InvalidHandshake(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_parses_inner_json_strings() {
        let raw = json!({
            "event": "integration_event",
            "channel": "integration",
            "data": "{\"x\":1,\"y\":\"z\"}",
        })
        .to_string();

        let message = decode_message(&raw).unwrap();
        assert_eq!(message.channel.as_deref(), Some("integration"));
        assert_eq!(message.data, json!({"x": 1, "y": "z"}));
    }

    #[test]
    fn decode_keeps_non_json_strings() {
        let raw = json!({"event": "e", "data": "plain text"}).to_string();
        assert_eq!(decode_message(&raw).unwrap().data, json!("plain text"));
    }

    #[test]
    fn decode_copies_user_id() {
        let raw = json!({"event": "client-x", "data": {}, "user_id": 7}).to_string();
        assert_eq!(decode_message(&raw).unwrap().user_id.as_deref(), Some("7"));
    }

    #[test]
    fn decode_ignores_malformed_user_id() {
        for user_id in [json!({}), json!(true), json!(null), json!([1])] {
            let raw = json!({"event": "client-x", "channel": "presence-room", "data": {}, "user_id": user_id})
                .to_string();
            let message = decode_message(&raw).unwrap();
            assert_eq!(message.event, "client-x");
            assert_eq!(message.user_id, None);
        }
    }

    #[test]
    fn decode_rejects_non_frames() {
        assert!(matches!(
            decode_message("not json"),
            Err(ProtocolError::MessageParse { .. })
        ));
        assert!(decode_message("[1,2]").is_err());
    }

    #[test]
    fn encoded_frames_decode_to_the_same_message() {
        let message = WireMessage::new("client-typing", json!({"who": "ada"})).with_channel("private-room");
        assert_eq!(decode_message(&encode_message(&message)).unwrap(), message);
    }

    #[test]
    fn close_action_boundaries() {
        let table = [
            (1000, None),
            (1001, None),
            (1002, Some(CloseAction::Backoff)),
            (1004, Some(CloseAction::Backoff)),
            (1005, None),
            (3999, None),
            (4000, Some(CloseAction::TlsOnly)),
            (4001, Some(CloseAction::Refused)),
            (4099, Some(CloseAction::Refused)),
            (4100, Some(CloseAction::Backoff)),
            (4199, Some(CloseAction::Backoff)),
            (4200, Some(CloseAction::Retry)),
            (4299, Some(CloseAction::Retry)),
            (4300, Some(CloseAction::Refused)),
        ];
        for (code, expected) in table {
            assert_eq!(close_action(code), expected, "code {code}");
        }
    }

    #[test]
    fn normal_closures_have_no_error() {
        assert_eq!(close_error(1000, "bye"), None);
        assert_eq!(close_error(1001, "away"), None);
        assert_eq!(
            close_error(4001, "over quota"),
            Some(CloseError {
                code: Some(4001),
                message: "over quota".into()
            })
        );
    }

    #[test]
    fn handshake_established_converts_seconds() {
        let raw = json!({
            "event": events::CONNECTION_ESTABLISHED,
            "data": "{\"socket_id\":\"123.456\",\"activity_timeout\":120}",
        })
        .to_string();

        assert_eq!(
            process_handshake(&raw).unwrap(),
            Handshake::Connected {
                socket_id: "123.456".into(),
                activity_timeout: Duration::from_millis(120_000),
            }
        );
    }

    #[test]
    fn handshake_requires_activity_timeout() {
        let raw = json!({
            "event": events::CONNECTION_ESTABLISHED,
            "data": {"socket_id": "1.2"},
        })
        .to_string();
        assert_eq!(
            process_handshake(&raw),
            Err(ProtocolError::MissingActivityTimeout)
        );
    }

    #[test]
    fn handshake_error_maps_code() {
        let raw = json!({
            "event": events::ERROR,
            "data": {"code": 4001, "message": "app disabled"},
        })
        .to_string();

        match process_handshake(&raw).unwrap() {
            Handshake::Failed { action, error } => {
                assert_eq!(action, Some(CloseAction::Refused));
                assert_eq!(error.map(|e| e.message), Some("app disabled".to_string()));
            }
            other => panic!("unexpected handshake {other:?}"),
        }
    }

    #[test]
    fn handshake_rejects_other_events() {
        let raw = json!({"event": "something_else", "data": {}}).to_string();
        assert!(matches!(
            process_handshake(&raw),
            Err(ProtocolError::InvalidHandshake(_))
        ));
    }
}
