//! Shared error types for the wire protocol and authorization callbacks.

use thiserror::Error;

/// Errors produced while decoding frames or interpreting the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A frame that is not a JSON object with an `event` field.
    #[error("unable to parse message: {reason}")]
    MessageParse { raw: String, reason: String },
    #[error("no activity timeout specified in handshake")]
    MissingActivityTimeout,
    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),
}

/// Failure reported by a channel authorizer or user authenticator.
///
/// `Http` carries the status of the authorization endpoint; everything else is
/// a plain `Rejected`. Both are retryable by subscribing again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("{message}")]
    Rejected { message: String },
    #[error("{message}")]
    Http { status: u16, message: String },
}

impl AuthError {
    pub fn rejected(message: impl Into<String>) -> Self {
        AuthError::Rejected {
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        AuthError::Http {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of the failed request, if the failure came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Rejected { .. } => None,
            AuthError::Http { status, .. } => Some(*status),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AuthError::Rejected { message } | AuthError::Http { message, .. } => message,
        }
    }
}
