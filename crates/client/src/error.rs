//! Client error types.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use webpubsub_shared::{AuthError, CloseError, ProtocolError};

/// Errors returned synchronously from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    BadEventName(String),
    #[error("{0}")]
    BadChannelName(String),
    #[error("{0}")]
    UnsupportedFeature(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("connection is closed")]
    ConnectionClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Outcome of a failed transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no supported transport available")]
    Unsupported,
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("connection attempt timed out")]
    Timeout,
    #[error("connection attempt abandoned")]
    Abandoned,
}

/// Payload of the connection manager's `error` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ConnectionError {
    MessageParseError { error: String, data: String },
    HandshakeError { error: String },
    WebpubsubError { data: Value },
    TransportError { error: String },
}

impl ConnectionError {
    pub fn server(error: &CloseError) -> Self {
        ConnectionError::WebpubsubError {
            data: serde_json::to_value(error).unwrap_or(Value::Null),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MessageParse { raw, reason } => ConnectionError::MessageParseError {
                error: reason,
                data: raw,
            },
            other => ConnectionError::HandshakeError {
                error: other.to_string(),
            },
        }
    }
}

impl From<TransportError> for ConnectionError {
    fn from(err: TransportError) -> Self {
        ConnectionError::TransportError {
            error: err.to_string(),
        }
    }
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
