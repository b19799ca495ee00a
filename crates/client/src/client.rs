//! The top-level client: owns the connection, the channels and the user
//! session, and routes every inbound message between them.

use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use serde_json::Value;
use webpubsub_shared::WireMessage;

use crate::auth::{ChannelAuthorizer, HttpAuthorizer, UserAuthenticator};
use crate::channels::{AuthorizationOutcome, Channel, ChannelContext, Channels, EventOutcome};
use crate::config::{AuthEndpoint, ClientConfig};
use crate::connection::{ConnectionManager, ConnectionState, ManagerEvent, Strategy};
use crate::error::ClientError;
use crate::events::{Dispatcher, ListenerId};
use crate::inbox::{Inbox, Input};
use crate::timers::{Clock, SystemClock};
use crate::transports::WebSocketStrategy;
use crate::user::{UserContext, UserFacade};

pub struct WebPubSubBuilder {
    key: String,
    config: ClientConfig,
    strategy: Option<Box<dyn Strategy>>,
    channel_authorizer: Option<Box<dyn ChannelAuthorizer>>,
    user_authenticator: Option<Box<dyn UserAuthenticator>>,
    clock: Option<Rc<dyn Clock>>,
}

impl WebPubSubBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default WebSocket strategy.
    pub fn strategy(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategy = Some(Box::new(strategy));
        self
    }

    /// Replaces the default HTTP channel authorizer.
    pub fn channel_authorizer(mut self, authorizer: impl ChannelAuthorizer + 'static) -> Self {
        self.channel_authorizer = Some(Box::new(authorizer));
        self
    }

    /// Replaces the default HTTP user authenticator.
    pub fn user_authenticator(mut self, authenticator: impl UserAuthenticator + 'static) -> Self {
        self.user_authenticator = Some(Box::new(authenticator));
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<WebPubSub, ClientError> {
        if self.key.is_empty() {
            return Err(ClientError::Config(
                "You must pass your app key when you instantiate WebPubSub.".into(),
            ));
        }
        if self.config.cluster.is_none() && self.config.ws_host.is_none() {
            crate::log_warn!(
                "You should always specify a cluster when connecting; falling back to '{}'",
                self.config.cluster()
            );
        }

        let config = self.config;
        let inbox = Inbox::new();
        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => Box::new(WebSocketStrategy::new(&self.key, &config)),
        };
        let channel_authorizer = match self.channel_authorizer {
            Some(authorizer) => authorizer,
            None => {
                warn_if_relative("channel authorization", &config.channel_authorization);
                Box::new(HttpAuthorizer::new(config.channel_authorization.clone()))
            }
        };
        let user_authenticator = match self.user_authenticator {
            Some(authenticator) => authenticator,
            None => {
                warn_if_relative("user authentication", &config.user_authentication);
                Box::new(HttpAuthorizer::new(config.user_authentication.clone()))
            }
        };
        let clock = self.clock.unwrap_or_else(|| Rc::new(SystemClock));

        let connection = ConnectionManager::new(
            strategy,
            inbox.sender().clone(),
            clock,
            config.timeouts.clone(),
            config.reconnect.clone(),
            config.force_tls,
        );

        Ok(WebPubSub {
            key: self.key,
            config,
            inbox,
            connection,
            channels: Channels::new(),
            user: UserFacade::new(),
            channel_authorizer,
            user_authenticator,
            global_emitter: Dispatcher::new("global"),
            waker: None,
        })
    }
}

pub struct WebPubSub {
    key: String,
    config: ClientConfig,
    inbox: Inbox,
    connection: ConnectionManager,
    channels: Channels,
    user: UserFacade,
    channel_authorizer: Box<dyn ChannelAuthorizer>,
    user_authenticator: Box<dyn UserAuthenticator>,
    global_emitter: Dispatcher<Value>,
    waker: Option<Waker>,
}

impl WebPubSub {
    pub fn builder(key: impl Into<String>) -> WebPubSubBuilder {
        WebPubSubBuilder {
            key: key.into(),
            config: ClientConfig::default(),
            strategy: None,
            channel_authorizer: None,
            user_authenticator: None,
            clock: None,
        }
    }

    pub fn new(key: impl Into<String>, config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder(key).config(config).build()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// For binding connection listeners.
    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connection
    }

    pub fn user(&self) -> &UserFacade {
        &self.user
    }

    /// For binding user listeners.
    pub fn user_mut(&mut self) -> &mut UserFacade {
        &mut self.user
    }

    // --- Connection ---

    pub fn connect(&mut self) {
        self.connection.connect();
        self.flush();
        self.wake();
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.flush();
        self.wake();
    }

    pub fn send_event(&mut self, name: &str, data: Value, channel: Option<&str>) -> bool {
        self.connection.send_event(name, data, channel)
    }

    // --- Channels ---

    /// Subscribes to `name`, or keeps an in-flight subscription that was about to be cancelled.
    pub fn subscribe(&mut self, name: &str) -> Result<&mut Channel, ClientError> {
        let connected = self.connection.state().is_connected();
        let socket_id = self.connection.socket_id().map(str::to_string);
        let channel = self.channels.add(name)?;

        if channel.is_subscription_cancelled() {
            channel.reinstate_subscription();
        }
        if !channel.is_subscription_pending() && connected {
            let mut ctx = ChannelContext {
                sender: &mut self.connection,
                socket_id,
                authorizer: &*self.channel_authorizer,
                inbox: self.inbox.sender(),
            };
            channel.subscribe(&mut ctx);
        }
        Ok(channel)
    }

    /// Unsubscribes from `name`. A subscription still in flight is cancelled instead.
    pub fn unsubscribe(&mut self, name: &str) {
        match self.channels.find_mut(name) {
            Some(channel) if channel.is_subscription_pending() => channel.cancel_subscription(),
            Some(_) => {
                if let Some(mut channel) = self.channels.remove(name) {
                    if channel.is_subscribed() {
                        channel.unsubscribe(&mut self.connection);
                    }
                }
            }
            None => {}
        }
    }

    /// Looks up a channel. Channels whose subscription was cancelled are hidden.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.find(name).filter(|channel| is_visible(channel))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.find_mut(name).filter(|channel| is_visible(channel))
    }

    pub fn all_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|channel| is_visible(channel))
    }

    /// Sends a client event on a known channel.
    pub fn trigger(&mut self, channel: &str, event: &str, data: Value) -> Result<bool, ClientError> {
        let target = self
            .channels
            .find(channel)
            .filter(|target| is_visible(target))
            .ok_or_else(|| ClientError::BadChannelName(format!("Not subscribed to '{channel}'")))?;
        target.trigger(event, data, &mut self.connection)
    }

    // --- User ---

    pub fn signin(&mut self) {
        let mut ctx = UserContext {
            connection: &mut self.connection,
            authenticator: &*self.user_authenticator,
            channel_authorizer: &*self.channel_authorizer,
            inbox: self.inbox.sender(),
        };
        self.user.signin(&mut ctx);
    }

    // --- Global listeners ---

    pub fn bind(&mut self, event: impl Into<String>, callback: impl FnMut(&Value) + 'static) -> ListenerId {
        self.global_emitter.bind(event, callback)
    }

    pub fn bind_global(&mut self, callback: impl FnMut(&str, &Value) + 'static) -> ListenerId {
        self.global_emitter.bind_global(callback)
    }

    pub fn unbind(&mut self, event: Option<&str>, id: Option<ListenerId>) {
        self.global_emitter.unbind(event, id);
    }

    pub fn unbind_global(&mut self, id: Option<ListenerId>) {
        self.global_emitter.unbind_global(id);
    }

    pub fn unbind_all(&mut self) {
        self.global_emitter.unbind_all();
    }

    // --- Driving ---

    /// Applies one queued input.
    pub fn handle_input(&mut self, input: Input) {
        match input {
            Input::Transport { attempt, result } => self.connection.handle_transport(attempt, result),
            Input::Socket { attempt, event } => self.connection.handle_socket_event(attempt, event),
            Input::ChannelAuthorization {
                channel,
                generation,
                result,
            } => self.handle_channel_authorization(&channel, generation, result),
            Input::UserAuthentication { generation, result } => {
                self.user
                    .handle_authentication(generation, result, &mut self.connection)
            }
        }
        self.flush();
    }

    /// Applies every input queued so far; returns how many were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(input) = self.inbox.try_next() {
            self.handle_input(input);
            handled += 1;
        }
        handled
    }

    pub fn poll_input(&mut self, cx: &mut Context<'_>) -> Poll<Option<Input>> {
        self.inbox.poll_next(cx)
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.connection.poll_timeout()
    }

    pub fn handle_timeout(&mut self) {
        self.connection.handle_timeout();
        self.flush();
    }

    /// Woken when a call from outside the driver moves a timer.
    pub fn register_waker(&mut self, waker: &Waker) {
        self.waker = Some(waker.clone());
    }

    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    fn handle_channel_authorization(
        &mut self,
        name: &str,
        generation: u64,
        result: Result<webpubsub_shared::ChannelAuthorizationData, webpubsub_shared::AuthError>,
    ) {
        let Some(channel) = self.channels.find_mut(name) else {
            crate::log_debug!("Authorization for unknown channel {}", name);
            return;
        };
        let outcome = channel.handle_authorization(generation, result, &mut self.connection);
        if outcome == AuthorizationOutcome::Rejected && channel.is_subscription_cancelled() {
            self.channels.remove(name);
        }
    }

    fn flush(&mut self) {
        while let Some(event) = self.connection.next_event() {
            match event {
                ManagerEvent::StateChanged { current, .. } => match current {
                    ConnectionState::Connected => {
                        self.subscribe_all();
                        let mut ctx = UserContext {
                            connection: &mut self.connection,
                            authenticator: &*self.user_authenticator,
                            channel_authorizer: &*self.channel_authorizer,
                            inbox: self.inbox.sender(),
                        };
                        self.user.on_connected(&mut ctx);
                    }
                    ConnectionState::Connecting | ConnectionState::Disconnected => {
                        self.channels.disconnect();
                        self.user.teardown();
                    }
                    _ => {}
                },
                ManagerEvent::Message(message) => self.route_message(message),
                ManagerEvent::Error(err) => crate::log_warn!("{}", err),
            }
        }
    }

    fn subscribe_all(&mut self) {
        for name in self.channels.names() {
            let cancelled = self
                .channels
                .find(&name)
                .is_some_and(|channel| channel.is_subscription_cancelled());
            if cancelled {
                self.channels.remove(&name);
                continue;
            }
            if let Err(err) = self.subscribe(&name) {
                crate::log_warn!("Unable to resubscribe to {}: {}", name, err);
            }
        }
    }

    fn route_message(&mut self, message: WireMessage) {
        if let Some(name) = message.channel.as_deref() {
            if let Some(channel) = self.channels.find_mut(name) {
                if channel.handle_event(&message) == EventOutcome::SubscriptionCancelled {
                    self.unsubscribe(name);
                }
            }
        }

        if !message.is_internal() {
            self.global_emitter.emit(&message.event, &message.data);
        }

        let mut ctx = UserContext {
            connection: &mut self.connection,
            authenticator: &*self.user_authenticator,
            channel_authorizer: &*self.channel_authorizer,
            inbox: self.inbox.sender(),
        };
        self.user.handle_message(&message, &mut ctx);
    }
}

fn is_visible(channel: &Channel) -> bool {
    !channel.is_subscription_cancelled()
}

fn warn_if_relative(kind: &str, endpoint: &AuthEndpoint) {
    if !endpoint.is_absolute() {
        crate::log_warn!(
            "The {} endpoint '{}' is not an absolute URL; requests to it will fail",
            kind,
            endpoint.endpoint
        );
    }
}

impl std::fmt::Debug for WebPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebPubSub")
            .field("key", &self.key)
            .field("connection", &self.connection)
            .field("channels", &self.channels)
            .field("user", &self.user)
            .finish()
    }
}
