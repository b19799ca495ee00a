//! Channel authorization and user authentication.
//!
//! The client only depends on the [`ChannelAuthorizer`] and
//! [`UserAuthenticator`] traits. [`HttpAuthorizer`] is the stock
//! implementation that posts to an HTTP endpoint on the application's server.

use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;
use webpubsub_shared::AuthError;

use crate::config::AuthEndpoint;
use crate::inbox::{ChannelAuthorizationCallback, UserAuthenticationCallback};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAuthorizationRequest {
    pub socket_id: String,
    pub channel_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAuthenticationRequest {
    pub socket_id: String,
}

/// Signs subscriptions to private and presence channels.
pub trait ChannelAuthorizer {
    fn authorize(&self, request: ChannelAuthorizationRequest, callback: ChannelAuthorizationCallback);
}

/// Produces the signed identity used by `signin`.
pub trait UserAuthenticator {
    fn authenticate(&self, request: UserAuthenticationRequest, callback: UserAuthenticationCallback);
}

/// Adapts a closure into a [`ChannelAuthorizer`].
pub struct ChannelAuthorizerFn<F>(F);

impl<F> ChannelAuthorizer for ChannelAuthorizerFn<F>
where
    F: Fn(ChannelAuthorizationRequest, ChannelAuthorizationCallback),
{
    fn authorize(&self, request: ChannelAuthorizationRequest, callback: ChannelAuthorizationCallback) {
        (self.0)(request, callback)
    }
}

pub fn channel_authorizer_fn<F>(f: F) -> ChannelAuthorizerFn<F>
where
    F: Fn(ChannelAuthorizationRequest, ChannelAuthorizationCallback),
{
    ChannelAuthorizerFn(f)
}

/// Adapts a closure into a [`UserAuthenticator`].
pub struct UserAuthenticatorFn<F>(F);

impl<F> UserAuthenticator for UserAuthenticatorFn<F>
where
    F: Fn(UserAuthenticationRequest, UserAuthenticationCallback),
{
    fn authenticate(&self, request: UserAuthenticationRequest, callback: UserAuthenticationCallback) {
        (self.0)(request, callback)
    }
}

pub fn user_authenticator_fn<F>(f: F) -> UserAuthenticatorFn<F>
where
    F: Fn(UserAuthenticationRequest, UserAuthenticationCallback),
{
    UserAuthenticatorFn(f)
}

// --- HTTP ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthKind {
    ChannelAuthorization,
    UserAuthentication,
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuthKind::ChannelAuthorization => "channel-authorization",
            AuthKind::UserAuthentication => "user-authentication",
        })
    }
}

/// Posts `application/x-www-form-urlencoded` requests to an auth endpoint.
///
/// Requests run as local tasks, so the authorizer must be used from inside a
/// `tokio::task::LocalSet` (as [`crate::runtime::run`] is).
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    client: Client,
    endpoint: AuthEndpoint,
}

impl HttpAuthorizer {
    pub fn new(endpoint: AuthEndpoint) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    pub fn with_client(client: Client, endpoint: AuthEndpoint) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &AuthEndpoint {
        &self.endpoint
    }

    fn form_body(&self, fields: &[(&str, &str)]) -> String {
        fields
            .iter()
            .copied()
            .chain(self.endpoint.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn spawn<T, F>(&self, kind: AuthKind, body: String, resolve: F)
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(Result<T, AuthError>) + 'static,
    {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        tokio::task::spawn_local(async move {
            resolve(post_form(&client, &endpoint, kind, body).await);
        });
    }
}

async fn post_form<T: DeserializeOwned>(
    client: &Client,
    endpoint: &AuthEndpoint,
    kind: AuthKind,
    body: String,
) -> Result<T, AuthError> {
    let url = Url::parse(&endpoint.endpoint).map_err(|e| {
        AuthError::rejected(format!(
            "{kind} endpoint {} is not an absolute URL: {e}",
            endpoint.endpoint
        ))
    })?;

    let mut rb = client
        .post(url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body);
    for (name, value) in &endpoint.headers {
        rb = rb.header(name.as_str(), value.as_str());
    }

    let resp = rb
        .send()
        .await
        .map_err(|e| AuthError::rejected(format!("Error contacting {kind} endpoint: {e}")))?;

    let status = resp.status().as_u16();
    let is_success = resp.status().is_success();

    let text = resp
        .text()
        .await
        .map_err(|e| AuthError::rejected(format!("failed to read {kind} response: {e}")))?;

    if !is_success {
        return Err(AuthError::http(
            status,
            format!(
                "Unable to retrieve auth string from {kind} endpoint - received status: {status} from {}.",
                endpoint.endpoint
            ),
        ));
    }

    serde_json::from_str(&text).map_err(|_| {
        AuthError::rejected(format!(
            "JSON returned from {kind} endpoint was invalid, yet status code was {status}. Data was: {text}"
        ))
    })
}

impl ChannelAuthorizer for HttpAuthorizer {
    fn authorize(&self, request: ChannelAuthorizationRequest, callback: ChannelAuthorizationCallback) {
        let body = self.form_body(&[
            ("socket_id", request.socket_id.as_str()),
            ("channel_name", request.channel_name.as_str()),
        ]);
        self.spawn(AuthKind::ChannelAuthorization, body, move |result| callback.resolve(result));
    }
}

impl UserAuthenticator for HttpAuthorizer {
    fn authenticate(&self, request: UserAuthenticationRequest, callback: UserAuthenticationCallback) {
        let body = self.form_body(&[("socket_id", request.socket_id.as_str())]);
        self.spawn(AuthKind::UserAuthentication, body, move |result| callback.resolve(result));
    }
}
