//! A single established connection and the manager that keeps one alive.
//!
//! [`Connection`] wraps one open socket after a successful handshake and turns
//! raw socket events into protocol events. [`ConnectionManager`] owns the
//! lifecycle: strategy runs, handshakes, liveness checks and retries.

mod manager;
mod strategy;

pub use manager::{ConnectionManager, ConnectionState, ManagerEvent};
pub use strategy::{AbortHandle, ConnectRequest, Strategy};

use std::time::Duration;

use serde_json::{json, Value};
use webpubsub_shared::{close_action, close_error, decode_message, encode_message, events, CloseAction, WireMessage};

use crate::error::{ClientError, ConnectionError};
use crate::socket::{Socket, SocketEvent};

/// Anything frames can be sent through.
pub trait EventSender {
    fn send_event(&mut self, name: &str, data: Value, channel: Option<&str>) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Message(WireMessage),
    Error(ConnectionError),
    Ping,
    Pong,
    Activity,
    Action(CloseAction),
    Closed,
}

pub struct Connection {
    id: String,
    socket: Option<Box<dyn Socket>>,
}

impl Connection {
    pub fn new(id: impl Into<String>, socket: Box<dyn Socket>) -> Self {
        Self {
            id: id.into(),
            socket: Some(socket),
        }
    }

    /// The socket id assigned by the server.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    pub fn handles_activity_checks(&self) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|socket| socket.handles_activity_checks())
    }

    pub fn activity_timeout(&self) -> Option<Duration> {
        self.socket.as_ref().and_then(|socket| socket.activity_timeout())
    }

    pub fn send(&mut self, data: &str) -> Result<bool, ClientError> {
        let socket = self.socket.as_mut().ok_or(ClientError::ConnectionClosed)?;
        Ok(socket.send(data))
    }

    pub fn send_event(&mut self, name: &str, data: Value, channel: Option<&str>) -> Result<bool, ClientError> {
        let mut message = WireMessage::new(name, data);
        message.channel = channel.map(str::to_string);
        crate::log_debug!("Event sent: {}", encode_message(&message));
        self.send(&encode_message(&message))
    }

    /// Pings using the transport when it can, otherwise with a protocol frame.
    pub fn ping(&mut self) -> Result<bool, ClientError> {
        let socket = self.socket.as_mut().ok_or(ClientError::ConnectionClosed)?;
        if socket.supports_ping() {
            socket.ping();
            Ok(true)
        } else {
            self.send_event(events::PING, json!({}), None)
        }
    }

    pub fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }

    /// Translates one socket event, specific events first.
    pub fn handle_socket_event(&mut self, event: SocketEvent) -> Vec<ConnectionEvent> {
        match event {
            SocketEvent::Message(raw) => match decode_message(&raw) {
                Ok(message) => {
                    crate::log_debug!("Event recd: {}", raw);
                    let mut out = Vec::with_capacity(2);
                    match message.event.as_str() {
                        events::ERROR => out.push(ConnectionEvent::Error(
                            ConnectionError::WebpubsubError {
                                data: message.data.clone(),
                            },
                        )),
                        events::PING => out.push(ConnectionEvent::Ping),
                        events::PONG => out.push(ConnectionEvent::Pong),
                        _ => {}
                    }
                    out.push(ConnectionEvent::Message(message));
                    out
                }
                Err(err) => vec![ConnectionEvent::Error(err.into())],
            },
            SocketEvent::Activity => vec![ConnectionEvent::Activity],
            SocketEvent::Error(error) => {
                vec![ConnectionEvent::Error(ConnectionError::TransportError { error })]
            }
            SocketEvent::Closed(close) => {
                self.socket = None;
                let mut out = Vec::with_capacity(3);
                if let Some(close) = close {
                    if let Some(error) = close_error(close.code, &close.reason) {
                        out.push(ConnectionEvent::Error(ConnectionError::server(&error)));
                    }
                    if let Some(action) = close_action(close.code) {
                        out.push(ConnectionEvent::Action(action));
                    }
                }
                out.push(ConnectionEvent::Closed);
                out
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
