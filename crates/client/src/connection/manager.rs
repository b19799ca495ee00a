//! Connection lifecycle state machine.
//!
//! The manager runs the strategy, performs the handshake, supervises the live
//! connection with activity/pong timers and decides when to reconnect. It is
//! the only place frames are sent from.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use webpubsub_shared::{close_action, close_error, events, process_handshake, CloseAction, Handshake, WireMessage};

use super::{AbortHandle, ConnectRequest, Connection, ConnectionEvent, EventSender, Strategy};
use crate::config::{ConnectionTimeouts, ReconnectConfig};
use crate::error::{ConnectionError, TransportError};
use crate::events::{Dispatcher, ListenerId};
use crate::inbox::{transport_callback, InboxSender};
use crate::socket::{Socket, SocketEvent, SocketEventSink};
use crate::timers::{earliest, Clock, Timer};

/// Pause before reconnecting after a backoff close or a dropped connection.
const BACKOFF_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Unavailable,
    Disconnected,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Unavailable => "unavailable",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the manager reports to its owner after handling an input.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    StateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },
    Message(WireMessage),
    Error(ConnectionError),
}

pub struct ConnectionManager {
    strategy: Box<dyn Strategy>,
    inbox: InboxSender,
    clock: Rc<dyn Clock>,
    timeouts: ConnectionTimeouts,
    reconnect: ReconnectConfig,
    state: ConnectionState,
    using_tls: bool,
    /// Id of the current attempt; results and socket events of older attempts are ignored.
    attempt: u64,
    failures: u32,
    runner: Option<Box<dyn AbortHandle>>,
    handshake: Option<Box<dyn Socket>>,
    connection: Option<Connection>,
    activity_timeout: Duration,
    activity_timer: Timer,
    pong_timer: Timer,
    unavailable_timer: Timer,
    retry_timer: Timer,
    emitter: Dispatcher<Value>,
    pending: VecDeque<ManagerEvent>,
}

impl ConnectionManager {
    pub fn new(
        strategy: Box<dyn Strategy>,
        inbox: InboxSender,
        clock: Rc<dyn Clock>,
        timeouts: ConnectionTimeouts,
        reconnect: ReconnectConfig,
        use_tls: bool,
    ) -> Self {
        let activity_timeout = timeouts.activity_timeout;
        Self {
            strategy,
            inbox,
            clock,
            timeouts,
            reconnect,
            state: ConnectionState::Initialized,
            using_tls: use_tls,
            attempt: 0,
            failures: 0,
            runner: None,
            handshake: None,
            connection: None,
            activity_timeout,
            activity_timer: Timer::default(),
            pong_timer: Timer::default(),
            unavailable_timer: Timer::default(),
            retry_timer: Timer::default(),
            emitter: Dispatcher::new("connection"),
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn socket_id(&self) -> Option<&str> {
        self.connection.as_ref().map(Connection::id)
    }

    pub fn is_using_tls(&self) -> bool {
        self.using_tls
    }

    /// Activity timeout negotiated for the current connection.
    pub fn activity_timeout(&self) -> Duration {
        self.activity_timeout
    }

    // --- Listeners ---

    pub fn bind(&mut self, event: impl Into<String>, callback: impl FnMut(&Value) + 'static) -> ListenerId {
        self.emitter.bind(event, callback)
    }

    pub fn bind_global(&mut self, callback: impl FnMut(&str, &Value) + 'static) -> ListenerId {
        self.emitter.bind_global(callback)
    }

    pub fn unbind(&mut self, event: Option<&str>, id: Option<ListenerId>) {
        self.emitter.unbind(event, id);
    }

    pub fn unbind_global(&mut self, id: Option<ListenerId>) {
        self.emitter.unbind_global(id);
    }

    pub fn unbind_all(&mut self) {
        self.emitter.unbind_all();
    }

    // --- Lifecycle ---

    /// Starts connecting unless a connection exists or an attempt is in flight.
    pub fn connect(&mut self) {
        if self.connection.is_some() || self.runner.is_some() || self.handshake.is_some() {
            return;
        }
        if !self.strategy.is_supported() {
            self.update_state(ConnectionState::Failed, Value::Null);
            return;
        }

        self.retry_timer.stop();
        self.update_state(ConnectionState::Connecting, Value::Null);
        self.start_connecting();
        self.unavailable_timer
            .start(self.clock.now(), self.timeouts.unavailable_timeout);
    }

    /// Tears everything down and stays disconnected until `connect` is called.
    pub fn disconnect(&mut self) {
        self.disconnect_internals();
        self.update_state(ConnectionState::Disconnected, Value::Null);
    }

    /// Sends an event on the live connection. False when not connected.
    pub fn send_event(&mut self, name: &str, data: Value, channel: Option<&str>) -> bool {
        match self.connection.as_mut() {
            Some(connection) => connection.send_event(name, data, channel).unwrap_or(false),
            None => false,
        }
    }

    /// Earliest pending timer deadline.
    pub fn poll_timeout(&self) -> Option<Instant> {
        earliest([
            self.unavailable_timer.deadline(),
            self.activity_timer.deadline(),
            self.pong_timer.deadline(),
            self.retry_timer.deadline(),
        ])
    }

    /// Fires every timer whose deadline has passed.
    pub fn handle_timeout(&mut self) {
        loop {
            let now = self.clock.now();
            if self.unavailable_timer.fire(now) {
                self.update_state(ConnectionState::Unavailable, Value::Null);
            } else if self.activity_timer.fire(now) {
                if let Some(connection) = self.connection.as_mut() {
                    if let Err(err) = connection.ping() {
                        crate::log_debug!("Ping failed: {}", err);
                    }
                    self.pong_timer.start(now, self.timeouts.pong_timeout);
                }
            } else if self.pong_timer.fire(now) {
                crate::log_info!("No pong received within {:?}, reconnecting", self.timeouts.pong_timeout);
                self.retry_in(Duration::ZERO);
            } else if self.retry_timer.fire(now) {
                self.disconnect_internals();
                self.connect();
            } else {
                break;
            }
        }
    }

    pub fn next_event(&mut self) -> Option<ManagerEvent> {
        self.pending.pop_front()
    }

    // --- Inputs ---

    pub fn handle_transport(&mut self, attempt: u64, result: Result<Box<dyn Socket>, TransportError>) {
        if attempt != self.attempt || self.runner.is_none() {
            if let Ok(mut socket) = result {
                socket.close();
            }
            return;
        }
        self.runner = None;

        match result {
            Ok(socket) => {
                crate::log_debug!("Transport open, waiting for handshake");
                self.handshake = Some(socket);
            }
            Err(err) => {
                crate::log_warn!("Connection attempt failed: {}", err);
                self.push_error(err.into());
                self.retry_after_failure();
            }
        }
    }

    pub fn handle_socket_event(&mut self, attempt: u64, event: SocketEvent) {
        if attempt != self.attempt {
            return;
        }
        if self.handshake.is_some() {
            self.handle_handshake_event(event);
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        for event in connection.handle_socket_event(event) {
            self.handle_connection_event(event);
        }
    }

    fn handle_handshake_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Message(raw) => match process_handshake(&raw) {
                Ok(Handshake::Connected {
                    socket_id,
                    activity_timeout,
                }) => {
                    if let Some(socket) = self.handshake.take() {
                        self.on_connected(Connection::new(socket_id, socket), activity_timeout);
                    }
                }
                Ok(Handshake::Failed { action, error }) => {
                    self.close_handshake();
                    if let Some(error) = error {
                        self.push_error(ConnectionError::server(&error));
                    }
                    match action {
                        Some(action) => self.apply_action(action),
                        None => self.retry_after_failure(),
                    }
                }
                Err(err) => {
                    crate::log_warn!("Handshake failed: {}", err);
                    self.close_handshake();
                    self.push_error(err.into());
                    self.retry_after_failure();
                }
            },
            SocketEvent::Activity => {}
            SocketEvent::Error(error) => self.push_error(ConnectionError::TransportError { error }),
            SocketEvent::Closed(close) => {
                self.handshake = None;
                let action = close.and_then(|close| {
                    if let Some(error) = close_error(close.code, &close.reason) {
                        self.push_error(ConnectionError::server(&error));
                    }
                    close_action(close.code)
                });
                match action {
                    Some(action) => self.apply_action(action),
                    None => self.retry_after_failure(),
                }
            }
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(message) => {
                self.reset_activity_check();
                if let Ok(value) = serde_json::to_value(&message) {
                    self.emitter.emit("message", &value);
                }
                self.pending.push_back(ManagerEvent::Message(message));
            }
            ConnectionEvent::Ping => {
                self.send_event(events::PONG, json!({}), None);
            }
            // the accompanying message resets the activity check
            ConnectionEvent::Pong => {}
            ConnectionEvent::Activity => self.reset_activity_check(),
            ConnectionEvent::Error(err) => self.push_error(err),
            ConnectionEvent::Action(action) => self.apply_action(action),
            ConnectionEvent::Closed => {
                self.abandon_connection();
                if self.should_retry() && !self.retry_timer.is_running() {
                    self.retry_in(BACKOFF_DELAY);
                }
            }
        }
    }

    fn on_connected(&mut self, connection: Connection, handshake_timeout: Duration) {
        self.failures = 0;
        self.unavailable_timer.stop();

        let mut timeout = self.timeouts.activity_timeout.min(handshake_timeout);
        if let Some(transport_timeout) = connection.activity_timeout() {
            timeout = timeout.min(transport_timeout);
        }
        self.activity_timeout = timeout;

        let socket_id = connection.id().to_string();
        self.connection = Some(connection);
        self.reset_activity_check();
        self.update_state(ConnectionState::Connected, json!({ "socket_id": socket_id }));
    }

    fn apply_action(&mut self, action: CloseAction) {
        crate::log_debug!("Applying close action {}", action);
        self.emitter.emit(action.as_str(), &Value::Null);
        match action {
            CloseAction::TlsOnly => {
                self.using_tls = true;
                self.retry_in(Duration::ZERO);
            }
            CloseAction::Refused => self.disconnect(),
            CloseAction::Backoff => self.retry_in(BACKOFF_DELAY),
            CloseAction::Retry => self.retry_in(Duration::ZERO),
        }
    }

    fn retry_after_failure(&mut self) {
        self.failures += 1;
        if self.reconnect.is_exhausted(self.failures) {
            crate::log_error!("Giving up after {} failed connection attempts", self.failures);
            self.disconnect_internals();
            self.update_state(
                ConnectionState::Failed,
                json!({ "reason": format!("max reconnect attempts ({}) exceeded", self.reconnect.max_attempts) }),
            );
            return;
        }
        let delay = self.reconnect.delay_for_attempt(self.failures - 1);
        self.retry_in(delay);
    }

    fn retry_in(&mut self, delay: Duration) {
        if delay > Duration::ZERO {
            self.emitter
                .emit("connecting_in", &json!(delay.as_secs_f64().round() as u64));
        }
        self.retry_timer.start(self.clock.now(), delay);
    }

    fn start_connecting(&mut self) {
        self.attempt += 1;
        let request = ConnectRequest {
            min_priority: 0,
            use_tls: self.using_tls,
            events: SocketEventSink::new(self.inbox.clone(), self.attempt),
        };
        let callback = transport_callback(&self.inbox, self.attempt);
        self.runner = Some(self.strategy.connect(request, callback));
    }

    fn disconnect_internals(&mut self) {
        if let Some(mut runner) = self.runner.take() {
            runner.abort();
        }
        self.close_handshake();
        // late results of the aborted run are now stale
        self.attempt += 1;
        self.retry_timer.stop();
        self.unavailable_timer.stop();
        if let Some(mut connection) = self.abandon_connection() {
            connection.close();
        }
    }

    fn close_handshake(&mut self) {
        if let Some(mut socket) = self.handshake.take() {
            socket.close();
        }
    }

    fn abandon_connection(&mut self) -> Option<Connection> {
        self.stop_activity_check();
        self.connection.take()
    }

    fn should_retry(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
    }

    fn reset_activity_check(&mut self) {
        self.stop_activity_check();
        if let Some(connection) = &self.connection {
            if !connection.handles_activity_checks() {
                self.activity_timer.start(self.clock.now(), self.activity_timeout);
            }
        }
    }

    fn stop_activity_check(&mut self) {
        self.activity_timer.stop();
        self.pong_timer.stop();
    }

    fn push_error(&mut self, err: ConnectionError) {
        self.emitter.emit("error", &err.to_value());
        self.pending.push_back(ManagerEvent::Error(err));
    }

    fn update_state(&mut self, new_state: ConnectionState, data: Value) {
        let previous = self.state;
        if previous == new_state {
            return;
        }
        self.state = new_state;
        crate::log_debug!("State changed: {} -> {}", previous, new_state);

        self.emitter.emit(
            "state_change",
            &json!({ "previous": previous, "current": new_state }),
        );
        self.emitter.emit(new_state.as_str(), &data);
        self.pending.push_back(ManagerEvent::StateChanged {
            previous,
            current: new_state,
        });
    }
}

impl EventSender for ConnectionManager {
    fn send_event(&mut self, name: &str, data: Value, channel: Option<&str>) -> bool {
        ConnectionManager::send_event(self, name, data, channel)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("attempt", &self.attempt)
            .field("using_tls", &self.using_tls)
            .field("connection", &self.connection)
            .finish()
    }
}
