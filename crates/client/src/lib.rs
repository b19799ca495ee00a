//! WebPubSub client.
//!
//! A realtime publish/subscribe client: one supervised connection to the
//! service, channel subscriptions (public, private and presence), client
//! events and user sign-in.
//!
//! The client is single-threaded. Transports and authorizers report back
//! through an ordered inbox which [`runtime::run`] pumps on a tokio
//! `LocalSet`; tests drive the same client by hand with a
//! [`timers::ManualClock`] and [`WebPubSub::process_pending`].

pub mod logging;

pub mod auth;
pub mod channels;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod inbox;
pub mod registry;
pub mod runtime;
pub mod socket;
pub mod timers;
pub mod transports;
pub mod user;

pub use auth::{
    channel_authorizer_fn, user_authenticator_fn, ChannelAuthorizationRequest, ChannelAuthorizer,
    HttpAuthorizer, UserAuthenticationRequest, UserAuthenticator,
};
pub use channels::{Channel, ChannelEvent, ChannelKind, Members};
pub use client::{WebPubSub, WebPubSubBuilder};
pub use config::{AuthEndpoint, ClientConfig, ConnectionTimeouts, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState, ManagerEvent};
pub use error::{ClientError, ConnectionError, TransportError};
pub use events::ListenerId;
pub use registry::{ClientId, ClientRegistry};
pub use user::{SigninState, UserFacade};

pub use webpubsub_shared as shared;
