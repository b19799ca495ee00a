//! The transport-facing socket abstraction.

use std::time::Duration;

use crate::inbox::{Input, InboxSender};

/// An open, bidirectional text channel produced by a transport.
///
/// Inbound traffic is reported through the [`SocketEventSink`] handed to the
/// strategy that opened the socket.
pub trait Socket {
    /// Queues a text frame. Returns false if the socket can no longer send.
    fn send(&mut self, data: &str) -> bool;

    fn close(&mut self);

    /// Sends a transport-level ping, when [`Socket::supports_ping`] is true.
    fn ping(&mut self) {}

    fn supports_ping(&self) -> bool {
        false
    }

    /// Transports that detect dead peers themselves disable the activity timer.
    fn handles_activity_checks(&self) -> bool {
        false
    }

    /// Upper bound the transport places on the activity timeout.
    fn activity_timeout(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(String),
    /// Inbound traffic that is not a message, such as a transport pong.
    Activity,
    Error(String),
    /// The socket closed; `None` when no close frame was received.
    Closed(Option<CloseEvent>),
}

/// Where a socket reports its events. Cloneable so read and write halves can share it.
#[derive(Clone)]
pub struct SocketEventSink {
    sender: InboxSender,
    attempt: u64,
}

impl SocketEventSink {
    pub(crate) fn new(sender: InboxSender, attempt: u64) -> Self {
        Self { sender, attempt }
    }

    pub fn emit(&self, event: SocketEvent) {
        self.sender.post(Input::Socket {
            attempt: self.attempt,
            event,
        });
    }
}

impl std::fmt::Debug for SocketEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketEventSink")
            .field("attempt", &self.attempt)
            .finish()
    }
}
