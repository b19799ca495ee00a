//! The client's single ordered input queue and the continuations that feed it.
//!
//! Transports, sockets and authorizers never touch client state directly.
//! They post an [`Input`] and the client applies it on its next pump.

use std::task::{Context, Poll};

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use webpubsub_shared::{AuthError, ChannelAuthorizationData, UserAuthenticationData};

use crate::error::TransportError;
use crate::socket::{Socket, SocketEvent};

pub enum Input {
    /// Outcome of the strategy run for connection attempt `attempt`.
    Transport {
        attempt: u64,
        result: Result<Box<dyn Socket>, TransportError>,
    },
    /// Event from the socket opened by attempt `attempt`.
    Socket { attempt: u64, event: SocketEvent },
    ChannelAuthorization {
        channel: String,
        generation: u64,
        result: Result<ChannelAuthorizationData, AuthError>,
    },
    UserAuthentication {
        generation: u64,
        result: Result<UserAuthenticationData, AuthError>,
    },
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Transport { attempt, result } => f
                .debug_struct("Transport")
                .field("attempt", attempt)
                .field("ok", &result.is_ok())
                .finish(),
            Input::Socket { attempt, event } => f
                .debug_struct("Socket")
                .field("attempt", attempt)
                .field("event", event)
                .finish(),
            Input::ChannelAuthorization {
                channel,
                generation,
                result,
            } => f
                .debug_struct("ChannelAuthorization")
                .field("channel", channel)
                .field("generation", generation)
                .field("result", result)
                .finish(),
            Input::UserAuthentication { generation, result } => f
                .debug_struct("UserAuthentication")
                .field("generation", generation)
                .field("result", result)
                .finish(),
        }
    }
}

#[derive(Clone)]
pub struct InboxSender(UnboundedSender<Input>);

impl InboxSender {
    /// Queues an input. Inputs posted after the client is gone are dropped.
    pub fn post(&self, input: Input) {
        if self.0.unbounded_send(input).is_err() {
            crate::log_debug!("Dropping input for a closed client");
        }
    }
}

pub struct Inbox {
    sender: InboxSender,
    receiver: UnboundedReceiver<Input>,
}

impl Inbox {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender: InboxSender(sender),
            receiver,
        }
    }

    pub fn sender(&self) -> &InboxSender {
        &self.sender
    }

    #[allow(deprecated)]
    pub fn try_next(&mut self) -> Option<Input> {
        self.receiver.try_next().ok().flatten()
    }

    pub fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<Input>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-shot completion handed to an asynchronous collaborator.
///
/// `resolve` consumes it, so it can complete at most once. Dropping it
/// unresolved posts the abandoned outcome instead, so the client never waits
/// on a callback that will not come.
pub struct Continuation<T> {
    sender: InboxSender,
    deliver: Option<Box<dyn FnOnce(T) -> Input>>,
    abandon: Option<Box<dyn FnOnce() -> Input>>,
}

impl<T> Continuation<T> {
    pub(crate) fn new(
        sender: InboxSender,
        deliver: impl FnOnce(T) -> Input + 'static,
        abandon: impl FnOnce() -> Input + 'static,
    ) -> Self {
        Self {
            sender,
            deliver: Some(Box::new(deliver)),
            abandon: Some(Box::new(abandon)),
        }
    }

    pub fn resolve(mut self, value: T) {
        self.abandon = None;
        if let Some(deliver) = self.deliver.take() {
            self.sender.post(deliver(value));
        }
    }
}

impl<T> Drop for Continuation<T> {
    fn drop(&mut self) {
        if self.deliver.take().is_some() {
            if let Some(abandon) = self.abandon.take() {
                self.sender.post(abandon());
            }
        }
    }
}

impl<T> std::fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("resolved", &self.deliver.is_none())
            .finish()
    }
}

pub type TransportCallback = Continuation<Result<Box<dyn Socket>, TransportError>>;
pub type ChannelAuthorizationCallback = Continuation<Result<ChannelAuthorizationData, AuthError>>;
pub type UserAuthenticationCallback = Continuation<Result<UserAuthenticationData, AuthError>>;

pub(crate) fn transport_callback(sender: &InboxSender, attempt: u64) -> TransportCallback {
    Continuation::new(
        sender.clone(),
        move |result| Input::Transport { attempt, result },
        move || Input::Transport {
            attempt,
            result: Err(TransportError::Abandoned),
        },
    )
}

pub(crate) fn channel_authorization_callback(
    sender: &InboxSender,
    channel: &str,
    generation: u64,
) -> ChannelAuthorizationCallback {
    let name = channel.to_string();
    let abandoned = channel.to_string();
    Continuation::new(
        sender.clone(),
        move |result| Input::ChannelAuthorization {
            channel: name,
            generation,
            result,
        },
        move || Input::ChannelAuthorization {
            channel: abandoned,
            generation,
            result: Err(AuthError::rejected("authorization abandoned")),
        },
    )
}

pub(crate) fn user_authentication_callback(
    sender: &InboxSender,
    generation: u64,
) -> UserAuthenticationCallback {
    Continuation::new(
        sender.clone(),
        move |result| Input::UserAuthentication { generation, result },
        move || Input::UserAuthentication {
            generation,
            result: Err(AuthError::rejected("authentication abandoned")),
        },
    )
}
