//! Shared harness: a client wired to an in-memory transport, recording
//! authorizers and a manual clock.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde_json::{json, Value};
use webpubsub::auth::{ChannelAuthorizationRequest, ChannelAuthorizer, UserAuthenticationRequest, UserAuthenticator};
use webpubsub::connection::{AbortHandle, ConnectRequest, Strategy};
use webpubsub::inbox::{ChannelAuthorizationCallback, TransportCallback, UserAuthenticationCallback};
use webpubsub::shared::{events, AuthError, ChannelAuthorizationData, UserAuthenticationData};
use webpubsub::socket::{CloseEvent, Socket, SocketEvent};
use webpubsub::timers::ManualClock;
use webpubsub::{ClientConfig, TransportError, WebPubSub};

// --- Transport ---

#[derive(Clone, Default)]
pub struct SocketLog {
    pub sent: Rc<RefCell<Vec<String>>>,
    pub closed: Rc<Cell<usize>>,
    pub pings: Rc<Cell<usize>>,
}

pub struct MockSocket {
    log: SocketLog,
    open: bool,
    native_ping: bool,
}

impl Socket for MockSocket {
    fn send(&mut self, data: &str) -> bool {
        if !self.open {
            return false;
        }
        self.log.sent.borrow_mut().push(data.to_string());
        true
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.closed.set(self.log.closed.get() + 1);
        }
    }

    fn ping(&mut self) {
        self.log.pings.set(self.log.pings.get() + 1);
    }

    fn supports_ping(&self) -> bool {
        self.native_ping
    }
}

pub struct Run {
    pub request: ConnectRequest,
    pub callback: Option<TransportCallback>,
}

#[derive(Clone, Default)]
pub struct StrategyLog {
    pub runs: Rc<RefCell<Vec<Run>>>,
    pub aborted: Rc<Cell<usize>>,
}

pub struct MockStrategy {
    log: StrategyLog,
    supported: bool,
}

impl MockStrategy {
    pub fn new(log: StrategyLog) -> Self {
        Self { log, supported: true }
    }

    pub fn unsupported(log: StrategyLog) -> Self {
        Self { log, supported: false }
    }
}

struct MockAbort(Rc<Cell<usize>>);

impl AbortHandle for MockAbort {
    fn abort(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

impl Strategy for MockStrategy {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn connect(&mut self, request: ConnectRequest, callback: TransportCallback) -> Box<dyn AbortHandle> {
        self.log.runs.borrow_mut().push(Run {
            request,
            callback: Some(callback),
        });
        Box::new(MockAbort(self.log.aborted.clone()))
    }
}

// --- Authorizers ---

#[derive(Clone, Default)]
pub struct RecordingChannelAuthorizer {
    pub requests: Rc<RefCell<Vec<(ChannelAuthorizationRequest, Option<ChannelAuthorizationCallback>)>>>,
}

impl ChannelAuthorizer for RecordingChannelAuthorizer {
    fn authorize(&self, request: ChannelAuthorizationRequest, callback: ChannelAuthorizationCallback) {
        self.requests.borrow_mut().push((request, Some(callback)));
    }
}

impl RecordingChannelAuthorizer {
    /// Resolves the oldest outstanding request for `channel`.
    pub fn resolve(&self, channel: &str, result: Result<ChannelAuthorizationData, AuthError>) -> bool {
        let callback = self
            .requests
            .borrow_mut()
            .iter_mut()
            .find(|(request, callback)| request.channel_name == channel && callback.is_some())
            .and_then(|(_, callback)| callback.take());
        match callback {
            Some(callback) => {
                callback.resolve(result);
                true
            }
            None => false,
        }
    }

    pub fn count(&self, channel: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|(request, _)| request.channel_name == channel)
            .count()
    }
}

#[derive(Clone, Default)]
pub struct RecordingUserAuthenticator {
    pub requests: Rc<RefCell<Vec<(UserAuthenticationRequest, Option<UserAuthenticationCallback>)>>>,
}

impl UserAuthenticator for RecordingUserAuthenticator {
    fn authenticate(&self, request: UserAuthenticationRequest, callback: UserAuthenticationCallback) {
        self.requests.borrow_mut().push((request, Some(callback)));
    }
}

impl RecordingUserAuthenticator {
    pub fn resolve_latest(&self, result: Result<UserAuthenticationData, AuthError>) -> bool {
        let callback = self
            .requests
            .borrow_mut()
            .last_mut()
            .and_then(|(_, callback)| callback.take());
        match callback {
            Some(callback) => {
                callback.resolve(result);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.requests.borrow().len()
    }
}

// --- Harness ---

pub struct Harness {
    pub client: WebPubSub,
    pub clock: Rc<ManualClock>,
    pub strategy: StrategyLog,
    pub socket: SocketLog,
    pub channel_auth: RecordingChannelAuthorizer,
    pub user_auth: RecordingUserAuthenticator,
    pub native_ping: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let strategy = StrategyLog::default();
        Self::build(config, MockStrategy::new(strategy.clone()), strategy)
    }

    pub fn unsupported() -> Self {
        let strategy = StrategyLog::default();
        Self::build(ClientConfig::default(), MockStrategy::unsupported(strategy.clone()), strategy)
    }

    fn build(config: ClientConfig, mock: MockStrategy, strategy: StrategyLog) -> Self {
        let clock = Rc::new(ManualClock::new());
        let channel_auth = RecordingChannelAuthorizer::default();
        let user_auth = RecordingUserAuthenticator::default();
        let client = WebPubSub::builder("foobar")
            .config(config)
            .strategy(mock)
            .channel_authorizer(channel_auth.clone())
            .user_authenticator(user_auth.clone())
            .clock(clock.clone())
            .build()
            .expect("client");
        Self {
            client,
            clock,
            strategy,
            socket: SocketLog::default(),
            channel_auth,
            user_auth,
            native_ping: false,
        }
    }

    pub fn runs(&self) -> usize {
        self.strategy.runs.borrow().len()
    }

    /// Resolves the latest strategy run with an open socket.
    pub fn open_transport(&mut self) {
        let callback = self
            .strategy
            .runs
            .borrow_mut()
            .last_mut()
            .and_then(|run| run.callback.take())
            .expect("an unresolved strategy run");
        callback.resolve(Ok(Box::new(MockSocket {
            log: self.socket.clone(),
            open: true,
            native_ping: self.native_ping,
        })));
        self.client.process_pending();
    }

    pub fn fail_transport(&mut self, error: TransportError) {
        let callback = self
            .strategy
            .runs
            .borrow_mut()
            .last_mut()
            .and_then(|run| run.callback.take())
            .expect("an unresolved strategy run");
        callback.resolve(Err(error));
        self.client.process_pending();
    }

    pub fn socket_event(&mut self, event: SocketEvent) {
        let events = self
            .strategy
            .runs
            .borrow()
            .last()
            .map(|run| run.request.events.clone())
            .expect("a strategy run");
        events.emit(event);
        self.client.process_pending();
    }

    pub fn server_send(&mut self, frame: Value) {
        self.socket_event(SocketEvent::Message(frame.to_string()));
    }

    pub fn establish(&mut self, socket_id: &str, activity_timeout_secs: u64) {
        self.server_send(json!({
            "event": events::CONNECTION_ESTABLISHED,
            "data": json!({ "socket_id": socket_id, "activity_timeout": activity_timeout_secs }).to_string(),
        }));
    }

    pub fn connect_and_establish(&mut self) {
        self.client.connect();
        self.open_transport();
        self.establish("123.456", 120);
    }

    pub fn close_socket(&mut self, code: u16, reason: &str) {
        self.socket_event(SocketEvent::Closed(Some(CloseEvent {
            code,
            reason: reason.to_string(),
        })));
    }

    pub fn advance(&mut self, by: Duration) {
        self.clock.advance(by);
        self.client.handle_timeout();
        self.client.process_pending();
    }

    pub fn authorize(&mut self, channel: &str, result: Result<ChannelAuthorizationData, AuthError>) {
        assert!(self.channel_auth.resolve(channel, result), "no authorization pending for {channel}");
        self.client.process_pending();
    }

    pub fn subscription_succeeded(&mut self, channel: &str, data: Value) {
        self.server_send(json!({
            "event": events::INTERNAL_SUBSCRIPTION_SUCCEEDED,
            "channel": channel,
            "data": data,
        }));
    }

    pub fn sent_frames(&self) -> Vec<Value> {
        self.socket
            .sent
            .borrow()
            .iter()
            .map(|raw| serde_json::from_str(raw).expect("sent frames are JSON"))
            .collect()
    }

    pub fn frames_with_event(&self, event: &str) -> Vec<Value> {
        self.sent_frames()
            .into_iter()
            .filter(|frame| frame["event"] == event)
            .collect()
    }

    pub fn clear_sent(&self) {
        self.socket.sent.borrow_mut().clear();
    }
}

/// Collects `(event, payload)` pairs from listeners.
#[derive(Clone)]
pub struct Recorder<T: Clone> {
    pub seen: Rc<RefCell<Vec<(String, T)>>>,
}

impl<T: Clone> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            seen: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<T: Clone + 'static> Recorder<T> {
    pub fn named(&self, event: &str) -> impl FnMut(&T) + 'static {
        let seen = self.seen.clone();
        let event = event.to_string();
        move |payload: &T| seen.borrow_mut().push((event.clone(), payload.clone()))
    }

    pub fn global(&self) -> impl FnMut(&str, &T) + 'static {
        let seen = self.seen.clone();
        move |event: &str, payload: &T| seen.borrow_mut().push((event.to_string(), payload.clone()))
    }

    pub fn events(&self) -> Vec<String> {
        self.seen.borrow().iter().map(|(event, _)| event.clone()).collect()
    }

    pub fn payloads(&self, event: &str) -> Vec<T> {
        self.seen
            .borrow()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.borrow().len()
    }
}
