use serde_json::{json, Value};
use webpubsub_shared::{
    events, AuthError, ChannelAuthorizationData, Member, MemberAddedData, MemberRemovedData,
    PresenceChannelData, PresenceSubscriptionData, WireMessage, CLIENT_EVENT_PREFIX, INTERNAL_PREFIX,
};

use super::Members;
use crate::auth::{ChannelAuthorizationRequest, ChannelAuthorizer};
use crate::connection::EventSender;
use crate::error::ClientError;
use crate::events::{Dispatcher, ListenerId};
use crate::inbox::{channel_authorization_callback, InboxSender};

const ENCRYPTED_PREFIX: &str = "private-encrypted-";
const PRIVATE_PREFIX: &str = "private-";
const PRESENCE_PREFIX: &str = "presence-";

/// Channel type, derived from the name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Public,
    Private,
    Presence,
    PrivateEncrypted,
}

impl ChannelKind {
    pub fn from_name(name: &str) -> Result<Self, ClientError> {
        if name.starts_with(ENCRYPTED_PREFIX) {
            Ok(ChannelKind::PrivateEncrypted)
        } else if name.starts_with(PRIVATE_PREFIX) {
            Ok(ChannelKind::Private)
        } else if name.starts_with(PRESENCE_PREFIX) {
            Ok(ChannelKind::Presence)
        } else if name.starts_with('#') {
            Err(ClientError::BadChannelName(format!(
                "Cannot create a channel with name '{name}'."
            )))
        } else {
            Ok(ChannelKind::Public)
        }
    }

    pub fn requires_authorization(&self) -> bool {
        !matches!(self, ChannelKind::Public)
    }
}

/// Payload handed to channel listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub data: Value,
    /// Sender of a client event on a presence channel.
    pub user_id: Option<String>,
}

impl ChannelEvent {
    pub fn new(data: Value) -> Self {
        Self { data, user_id: None }
    }
}

/// Services a channel needs while (re)subscribing.
pub(crate) struct ChannelContext<'a> {
    pub sender: &'a mut dyn EventSender,
    pub socket_id: Option<String>,
    pub authorizer: &'a dyn ChannelAuthorizer,
    pub inbox: &'a InboxSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthorizationOutcome {
    /// A result for an attempt that is no longer current.
    Stale,
    Sent,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventOutcome {
    Handled,
    /// The subscription was confirmed after being cancelled; the owner must unsubscribe.
    SubscriptionCancelled,
}

#[derive(Debug)]
enum Variant {
    Public,
    Private,
    Presence(Members),
}

pub struct Channel {
    name: String,
    kind: ChannelKind,
    variant: Variant,
    subscribed: bool,
    subscription_pending: bool,
    subscription_cancelled: bool,
    auth_generation: u64,
    emitter: Dispatcher<ChannelEvent>,
}

impl Channel {
    pub(crate) fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        let variant = match kind {
            ChannelKind::Presence => Variant::Presence(Members::new()),
            ChannelKind::Private | ChannelKind::PrivateEncrypted => Variant::Private,
            ChannelKind::Public => Variant::Public,
        };
        Self {
            name: name.into(),
            kind,
            variant,
            subscribed: false,
            subscription_pending: false,
            subscription_cancelled: false,
            auth_generation: 0,
            emitter: Dispatcher::new("channel"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn is_subscription_pending(&self) -> bool {
        self.subscription_pending
    }

    pub fn is_subscription_cancelled(&self) -> bool {
        self.subscription_cancelled
    }

    /// Membership of a presence channel; `None` for other kinds.
    pub fn members(&self) -> Option<&Members> {
        match &self.variant {
            Variant::Presence(members) => Some(members),
            _ => None,
        }
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

    pub fn unbind_global(&mut self, id: Option<ListenerId>) {
        self.emitter.unbind_global(id);
    }

    pub fn unbind_all(&mut self) {
        self.emitter.unbind_all();
    }

    /// Sends a `client-` event on this channel.
    pub fn trigger(&self, event: &str, data: Value, sender: &mut dyn EventSender) -> Result<bool, ClientError> {
        if !event.starts_with(CLIENT_EVENT_PREFIX) {
            return Err(ClientError::BadEventName(format!(
                "Event '{event}' does not start with '{CLIENT_EVENT_PREFIX}'"
            )));
        }
        if !self.subscribed {
            crate::log_warn!(
                "Client event triggered before channel 'subscription_succeeded' event on {}",
                self.name
            );
        }
        Ok(sender.send_event(event, data, Some(&self.name)))
    }

    // --- Subscription ---

    pub(crate) fn subscribe(&mut self, ctx: &mut ChannelContext<'_>) {
        if self.subscribed {
            return;
        }
        self.subscription_pending = true;
        self.subscription_cancelled = false;
        self.auth_generation += 1;

        if !self.kind.requires_authorization() {
            self.complete_authorization(Ok(ChannelAuthorizationData::default()), ctx.sender);
            return;
        }

        let Some(socket_id) = ctx.socket_id.clone() else {
            self.complete_authorization(
                Err(AuthError::rejected("cannot authorize without a socket id")),
                ctx.sender,
            );
            return;
        };
        let callback = channel_authorization_callback(ctx.inbox, &self.name, self.auth_generation);
        ctx.authorizer.authorize(
            ChannelAuthorizationRequest {
                socket_id,
                channel_name: self.name.clone(),
            },
            callback,
        );
    }

    pub(crate) fn handle_authorization(
        &mut self,
        generation: u64,
        result: Result<ChannelAuthorizationData, AuthError>,
        sender: &mut dyn EventSender,
    ) -> AuthorizationOutcome {
        if generation != self.auth_generation || !self.subscription_pending {
            crate::log_debug!("Ignoring stale authorization for {}", self.name);
            return AuthorizationOutcome::Stale;
        }
        self.complete_authorization(result, sender)
    }

    fn complete_authorization(
        &mut self,
        result: Result<ChannelAuthorizationData, AuthError>,
        sender: &mut dyn EventSender,
    ) -> AuthorizationOutcome {
        match result.and_then(|data| self.accept_authorization(data)) {
            Ok(data) => {
                let mut payload = json!({ "auth": data.auth, "channel": self.name });
                if let Some(channel_data) = data.channel_data {
                    payload["channel_data"] = Value::String(channel_data);
                }
                sender.send_event(events::SUBSCRIBE, payload, None);
                AuthorizationOutcome::Sent
            }
            Err(err) => {
                self.subscription_pending = false;
                crate::log_error!("Unable to subscribe to {}: {}", self.name, err);
                let mut payload = json!({ "type": "AuthError", "error": err.message() });
                if let Some(status) = err.status() {
                    payload["status"] = json!(status);
                }
                self.emitter
                    .emit(events::SUBSCRIPTION_ERROR, &ChannelEvent::new(payload));
                AuthorizationOutcome::Rejected
            }
        }
    }

    /// Presence channels learn the local identity from `channel_data`.
    fn accept_authorization(
        &mut self,
        data: ChannelAuthorizationData,
    ) -> Result<ChannelAuthorizationData, AuthError> {
        let name = &self.name;
        if let Variant::Presence(members) = &mut self.variant {
            let Some(channel_data) = data.channel_data.as_deref() else {
                crate::log_error!(
                    "Invalid auth response for channel '{}', expected 'channel_data' field",
                    name
                );
                return Err(AuthError::rejected(format!(
                    "Invalid auth response for channel '{name}'"
                )));
            };
            let identity: PresenceChannelData = serde_json::from_str(channel_data).map_err(|e| {
                AuthError::rejected(format!("Invalid channel_data for channel '{name}': {e}"))
            })?;
            members.set_my_id(identity.user_id);
        }
        Ok(data)
    }

    /// Leaves the channel. The server is told immediately.
    pub(crate) fn unsubscribe(&mut self, sender: &mut dyn EventSender) {
        self.subscribed = false;
        sender.send_event(events::UNSUBSCRIBE, json!({ "channel": self.name }), None);
    }

    pub(crate) fn cancel_subscription(&mut self) {
        self.subscription_cancelled = true;
    }

    pub(crate) fn reinstate_subscription(&mut self) {
        self.subscription_cancelled = false;
    }

    /// Forgets the server-side subscription after the connection dropped.
    pub(crate) fn disconnect(&mut self) {
        self.subscribed = false;
        self.subscription_pending = false;
        self.auth_generation += 1;
        if let Variant::Presence(members) = &mut self.variant {
            members.reset();
        }
    }

    // --- Inbound events ---

    pub(crate) fn handle_event(&mut self, message: &WireMessage) -> EventOutcome {
        match message.event.as_str() {
            events::INTERNAL_SUBSCRIPTION_SUCCEEDED => return self.handle_subscription_succeeded(message),
            events::INTERNAL_MEMBER_ADDED => self.handle_member_added(&message.data),
            events::INTERNAL_MEMBER_REMOVED => self.handle_member_removed(&message.data),
            event if event.starts_with(INTERNAL_PREFIX) => {}
            event => {
                let user_id = match self.variant {
                    Variant::Presence(_) => message.user_id.clone(),
                    _ => None,
                };
                self.emitter.emit(
                    event,
                    &ChannelEvent {
                        data: message.data.clone(),
                        user_id,
                    },
                );
            }
        }
        EventOutcome::Handled
    }

    fn handle_subscription_succeeded(&mut self, message: &WireMessage) -> EventOutcome {
        self.subscription_pending = false;
        self.subscribed = true;
        if self.subscription_cancelled {
            return EventOutcome::SubscriptionCancelled;
        }

        let data = match &mut self.variant {
            Variant::Presence(members) => {
                let snapshot = serde_json::from_value::<PresenceSubscriptionData>(message.data.clone())
                    .unwrap_or_else(|e| {
                        crate::log_warn!("Invalid presence data for {}: {}", self.name, e);
                        PresenceSubscriptionData::default()
                    });
                members.on_subscription(snapshot);
                members.to_value()
            }
            _ => message.data.clone(),
        };
        self.emitter
            .emit(events::SUBSCRIPTION_SUCCEEDED, &ChannelEvent::new(data));
        EventOutcome::Handled
    }

    fn handle_member_added(&mut self, data: &Value) {
        let Variant::Presence(members) = &mut self.variant else {
            return;
        };
        match serde_json::from_value::<MemberAddedData>(data.clone()) {
            Ok(added) => {
                let member = members.add_member(Member::new(added.user_id, added.user_info));
                self.emitter
                    .emit(events::MEMBER_ADDED, &ChannelEvent::new(member_value(&member)));
            }
            Err(e) => crate::log_warn!("Invalid member_added payload on {}: {}", self.name, e),
        }
    }

    fn handle_member_removed(&mut self, data: &Value) {
        let Variant::Presence(members) = &mut self.variant else {
            return;
        };
        match serde_json::from_value::<MemberRemovedData>(data.clone()) {
            Ok(removed) => {
                if let Some(member) = members.remove_member(&removed.user_id) {
                    self.emitter
                        .emit(events::MEMBER_REMOVED, &ChannelEvent::new(member_value(&member)));
                }
            }
            Err(e) => crate::log_warn!("Invalid member_removed payload on {}: {}", self.name, e),
        }
    }
}

fn member_value(member: &Member) -> Value {
    json!({ "id": member.id, "info": member.info })
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("subscribed", &self.subscribed)
            .field("subscription_pending", &self.subscription_pending)
            .field("subscription_cancelled", &self.subscription_cancelled)
            .finish()
    }
}
