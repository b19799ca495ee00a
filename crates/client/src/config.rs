//! Client configuration.
//!
//! Defaults match the hosted service. Every value can be overridden through
//! the setters or, for the binary, through environment variables (see
//! [`ClientConfig::from_env`]).

use std::time::Duration;

use url::Url;
use webpubsub_shared::PROTOCOL_VERSION;

use crate::error::ClientError;

pub const DEFAULT_CLUSTER: &str = "mt1";
pub const DEFAULT_CHANNEL_AUTH_ENDPOINT: &str = "/webpubsub/auth";
pub const DEFAULT_USER_AUTH_ENDPOINT: &str = "/webpubsub/user-auth";

/// Connection supervision timeouts.
///
/// ```rust
/// use std::time::Duration;
/// use webpubsub::ConnectionTimeouts;
///
/// let timeouts = ConnectionTimeouts::builder()
///     .activity_timeout(Duration::from_secs(60))
///     .pong_timeout(Duration::from_secs(10))
///     .build();
/// assert_eq!(timeouts.unavailable_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Idle time after which the client pings. The server may lower it during the handshake.
    /// Default: 120 seconds
    pub activity_timeout: Duration,

    /// Time to wait for a pong after pinging before reconnecting.
    /// Default: 30 seconds
    pub pong_timeout: Duration,

    /// Time spent connecting before the state becomes `unavailable`.
    /// Default: 10 seconds
    pub unavailable_timeout: Duration,

    /// Per-transport connect timeout used by the WebSocket strategy.
    /// Default: 10 seconds
    pub connect_timeout: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            activity_timeout: Duration::from_secs(120),
            pong_timeout: Duration::from_secs(30),
            unavailable_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionTimeouts {
    pub fn builder() -> ConnectionTimeoutsBuilder {
        ConnectionTimeoutsBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionTimeoutsBuilder {
    timeouts: ConnectionTimeouts,
}

impl ConnectionTimeoutsBuilder {
    pub fn activity_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.activity_timeout = timeout;
        self
    }

    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    pub fn unavailable_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.unavailable_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> ConnectionTimeouts {
        self.timeouts
    }
}

/// Backoff applied after consecutive failed connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retrying after `attempt` earlier failures (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay as u32).min(self.max_delay_ms) as u64)
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

/// Where and how an HTTP authorizer posts its requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoint {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
}

impl AuthEndpoint {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Whether the HTTP authorizer can post to this endpoint as given.
    pub fn is_absolute(&self) -> bool {
        Url::parse(&self.endpoint).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub cluster: Option<String>,
    pub ws_host: Option<String>,
    pub ws_port: u16,
    pub wss_port: u16,
    pub ws_path: String,
    pub force_tls: bool,
    pub timeouts: ConnectionTimeouts,
    pub reconnect: ReconnectConfig,
    pub channel_authorization: AuthEndpoint,
    pub user_authentication: AuthEndpoint,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cluster: None,
            ws_host: None,
            ws_port: 80,
            wss_port: 443,
            ws_path: String::new(),
            force_tls: true,
            timeouts: ConnectionTimeouts::default(),
            reconnect: ReconnectConfig::default(),
            channel_authorization: AuthEndpoint::new(DEFAULT_CHANNEL_AUTH_ENDPOINT),
            user_authentication: AuthEndpoint::new(DEFAULT_USER_AUTH_ENDPOINT),
        }
    }
}

impl ClientConfig {
    /// Build a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `WEBPUBSUB_CLUSTER`: cluster name (default: "mt1")
    /// - `WEBPUBSUB_WS_HOST`: socket host, overrides the cluster host
    /// - `WEBPUBSUB_WS_PORT` / `WEBPUBSUB_WSS_PORT`: plain and TLS ports (default: 80 / 443)
    /// - `WEBPUBSUB_FORCE_TLS`: "false" allows plain `ws://` (default: "true")
    /// - `WEBPUBSUB_AUTH_ENDPOINT`: channel authorization URL
    /// - `WEBPUBSUB_USER_AUTH_ENDPOINT`: user authentication URL
    /// - `WEBPUBSUB_ACTIVITY_TIMEOUT_MS`, `WEBPUBSUB_PONG_TIMEOUT_MS`,
    ///   `WEBPUBSUB_UNAVAILABLE_TIMEOUT_MS`: supervision timeouts
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let millis = |name: &str| {
            lookup(name)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        config.cluster = lookup("WEBPUBSUB_CLUSTER");
        config.ws_host = lookup("WEBPUBSUB_WS_HOST");
        if let Some(port) = lookup("WEBPUBSUB_WS_PORT").and_then(|v| v.parse().ok()) {
            config.ws_port = port;
        }
        if let Some(port) = lookup("WEBPUBSUB_WSS_PORT").and_then(|v| v.parse().ok()) {
            config.wss_port = port;
        }
        if let Some(force_tls) = lookup("WEBPUBSUB_FORCE_TLS") {
            config.force_tls = !matches!(force_tls.to_lowercase().as_str(), "false" | "0" | "no");
        }
        if let Some(endpoint) = lookup("WEBPUBSUB_AUTH_ENDPOINT") {
            config.channel_authorization.endpoint = endpoint;
        }
        if let Some(endpoint) = lookup("WEBPUBSUB_USER_AUTH_ENDPOINT") {
            config.user_authentication.endpoint = endpoint;
        }
        if let Some(timeout) = millis("WEBPUBSUB_ACTIVITY_TIMEOUT_MS") {
            config.timeouts.activity_timeout = timeout;
        }
        if let Some(timeout) = millis("WEBPUBSUB_PONG_TIMEOUT_MS") {
            config.timeouts.pong_timeout = timeout;
        }
        if let Some(timeout) = millis("WEBPUBSUB_UNAVAILABLE_TIMEOUT_MS") {
            config.timeouts.unavailable_timeout = timeout;
        }
        config
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn with_ws_host(mut self, host: impl Into<String>) -> Self {
        self.ws_host = Some(host.into());
        self
    }

    pub fn with_ports(mut self, ws_port: u16, wss_port: u16) -> Self {
        self.ws_port = ws_port;
        self.wss_port = wss_port;
        self
    }

    pub fn with_force_tls(mut self, force_tls: bool) -> Self {
        self.force_tls = force_tls;
        self
    }

    pub fn with_timeouts(mut self, timeouts: ConnectionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_channel_authorization(mut self, endpoint: AuthEndpoint) -> Self {
        self.channel_authorization = endpoint;
        self
    }

    pub fn with_user_authentication(mut self, endpoint: AuthEndpoint) -> Self {
        self.user_authentication = endpoint;
        self
    }

    pub fn cluster(&self) -> &str {
        self.cluster.as_deref().unwrap_or(DEFAULT_CLUSTER)
    }

    pub fn host(&self) -> String {
        match &self.ws_host {
            Some(host) => host.clone(),
            None => format!("ws-{}.webpubsub.com", self.cluster()),
        }
    }

    /// Socket URL for `key`, over TLS (`wss`) or plain (`ws`).
    pub fn socket_url(&self, key: &str, use_tls: bool) -> Result<Url, ClientError> {
        let (scheme, port) = if use_tls {
            ("wss", self.wss_port)
        } else {
            ("ws", self.ws_port)
        };
        let raw = format!(
            "{scheme}://{host}:{port}{path}/app/{key}?protocol={PROTOCOL_VERSION}&client=rust&version={version}&flash=false",
            host = self.host(),
            path = self.ws_path.trim_end_matches('/'),
            key = urlencoding::encode(key),
            version = env!("CARGO_PKG_VERSION"),
        );
        Url::parse(&raw).map_err(|e| ClientError::Config(format!("invalid socket url {raw}: {e}")))
    }
}
