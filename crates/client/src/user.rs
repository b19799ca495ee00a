//! Signed-in user session layered over the connection.
//!
//! After `signin()` the session authenticates on every (re)connection. A
//! successful sign-in subscribes the per-user channel `#server-to-user-{id}`;
//! its application events are relayed to the user's own listeners.

use serde_json::{json, Value};
use webpubsub_shared::{events, AuthError, UserAuthenticationData, WireMessage, EVENT_PREFIX, INTERNAL_PREFIX};

use crate::auth::{ChannelAuthorizer, UserAuthenticationRequest, UserAuthenticator};
use crate::channels::{Channel, ChannelContext, ChannelEvent, ChannelKind};
use crate::connection::{ConnectionManager, EventSender};
use crate::events::{Dispatcher, ListenerId};
use crate::inbox::{user_authentication_callback, InboxSender};

const SERVER_TO_USER_PREFIX: &str = "#server-to-user-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigninState {
    NotSignedIn,
    SigninRequested,
    SignedIn,
}

pub(crate) struct UserContext<'a> {
    pub connection: &'a mut ConnectionManager,
    pub authenticator: &'a dyn UserAuthenticator,
    pub channel_authorizer: &'a dyn ChannelAuthorizer,
    pub inbox: &'a InboxSender,
}

pub struct UserFacade {
    signin_requested: bool,
    user_data: Option<Value>,
    server_to_user_channel: Option<Channel>,
    /// Bumped on every attempt and teardown so late authentication results are dropped.
    generation: u64,
    emitter: Dispatcher<ChannelEvent>,
}

impl Default for UserFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl UserFacade {
    pub fn new() -> Self {
        Self {
            signin_requested: false,
            user_data: None,
            server_to_user_channel: None,
            generation: 0,
            emitter: Dispatcher::new("user"),
        }
    }

    pub fn state(&self) -> SigninState {
        if self.user_data.is_some() {
            SigninState::SignedIn
        } else if self.signin_requested {
            SigninState::SigninRequested
        } else {
            SigninState::NotSignedIn
        }
    }

    pub fn is_signin_requested(&self) -> bool {
        self.signin_requested
    }

    /// The server-confirmed user document, once signed in.
    pub fn user_data(&self) -> Option<&Value> {
        self.user_data.as_ref()
    }

    pub fn server_to_user_channel(&self) -> Option<&Channel> {
        self.server_to_user_channel.as_ref()
    }

    pub fn bind(&mut self, event: impl Into<String>, callback: impl FnMut(&ChannelEvent) + 'static) -> ListenerId {
        self.emitter.bind(event, callback)
    }

    pub fn bind_global(&mut self, callback: impl FnMut(&str, &ChannelEvent) + 'static) -> ListenerId {
        self.emitter.bind_global(callback)
    }

    pub fn unbind(&mut self, event: Option<&str>, id: Option<ListenerId>) {
        self.emitter.unbind(event, id);
    }

    pub fn unbind_all(&mut self) {
        self.emitter.unbind_all();
    }

    // --- Flow ---

    pub(crate) fn signin(&mut self, ctx: &mut UserContext<'_>) {
        if self.signin_requested {
            return;
        }
        self.signin_requested = true;
        self.attempt_signin(ctx);
    }

    pub(crate) fn on_connected(&mut self, ctx: &mut UserContext<'_>) {
        self.attempt_signin(ctx);
    }

    fn attempt_signin(&mut self, ctx: &mut UserContext<'_>) {
        if !self.signin_requested || !ctx.connection.state().is_connected() {
            return;
        }
        let Some(socket_id) = ctx.connection.socket_id().map(str::to_string) else {
            return;
        };
        self.generation += 1;
        ctx.authenticator.authenticate(
            UserAuthenticationRequest { socket_id },
            user_authentication_callback(ctx.inbox, self.generation),
        );
    }

    pub(crate) fn handle_authentication(
        &mut self,
        generation: u64,
        result: Result<UserAuthenticationData, AuthError>,
        sender: &mut dyn EventSender,
    ) {
        if generation != self.generation {
            crate::log_debug!("Ignoring stale user authentication");
            return;
        }
        match result {
            Ok(data) => {
                sender.send_event(
                    events::SIGNIN,
                    json!({ "auth": data.auth, "user_data": data.user_data }),
                    None,
                );
            }
            Err(err) => crate::log_warn!("Error during signin: {}", err),
        }
    }

    pub(crate) fn handle_message(&mut self, message: &WireMessage, ctx: &mut UserContext<'_>) {
        if message.event == events::SIGNIN_SUCCESS {
            self.on_signin_success(&message.data, ctx);
            return;
        }

        let Some(channel) = self.server_to_user_channel.as_mut() else {
            return;
        };
        if message.channel.as_deref() != Some(channel.name()) {
            return;
        }
        channel.handle_event(message);

        if !message.event.starts_with(INTERNAL_PREFIX) && !message.event.starts_with(EVENT_PREFIX) {
            self.emitter.emit(&message.event, &ChannelEvent::new(message.data.clone()));
        }
    }

    fn on_signin_success(&mut self, data: &Value, ctx: &mut UserContext<'_>) {
        let raw = data.get("user_data").and_then(Value::as_str).unwrap_or_default();
        let user_data: Value = match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(_) => {
                crate::log_error!("Failed parsing user data after signin: {}", raw);
                return;
            }
        };

        let id = match user_data.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                crate::log_error!("user_data doesn't contain an id. user_data: {}", user_data);
                return;
            }
        };

        self.user_data = Some(user_data);
        self.subscribe_channel(&id, ctx);
    }

    fn subscribe_channel(&mut self, id: &str, ctx: &mut UserContext<'_>) {
        let name = format!("{SERVER_TO_USER_PREFIX}{id}");
        if self.server_to_user_channel.as_ref().map(Channel::name) != Some(name.as_str()) {
            if let Some(mut previous) = self.server_to_user_channel.take() {
                previous.unbind_all();
                previous.disconnect();
            }
            self.server_to_user_channel = Some(Channel::new(name, ChannelKind::Public));
        }

        let Some(channel) = self.server_to_user_channel.as_mut() else {
            return;
        };
        if channel.is_subscription_pending() && channel.is_subscription_cancelled() {
            channel.reinstate_subscription();
        } else if !channel.is_subscription_pending() && ctx.connection.state().is_connected() {
            let socket_id = ctx.connection.socket_id().map(str::to_string);
            let mut channel_ctx = ChannelContext {
                sender: &mut *ctx.connection,
                socket_id,
                authorizer: ctx.channel_authorizer,
                inbox: ctx.inbox,
            };
            channel.subscribe(&mut channel_ctx);
        }
    }

    /// Drops the session after the connection went away. Sign-in is retried on reconnect.
    pub(crate) fn teardown(&mut self) {
        self.user_data = None;
        self.generation += 1;
        if let Some(mut channel) = self.server_to_user_channel.take() {
            channel.unbind_all();
            channel.disconnect();
        }
    }
}

impl std::fmt::Debug for UserFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserFacade")
            .field("state", &self.state())
            .field("server_to_user_channel", &self.server_to_user_channel)
            .finish()
    }
}
