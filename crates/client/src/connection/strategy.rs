use crate::inbox::TransportCallback;
use crate::socket::SocketEventSink;

/// Parameters of one strategy run.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Transports ranked below this are skipped.
    pub min_priority: i32,
    /// Only TLS transports may be used.
    pub use_tls: bool,
    /// Where the opened socket must report its events.
    pub events: SocketEventSink,
}

/// Cancels an in-flight strategy run. Aborting twice is harmless.
pub trait AbortHandle {
    fn abort(&mut self);
}

/// Chooses, orders and opens transports.
///
/// `connect` resolves the callback at most once, either with an open socket
/// or with the reason no transport could be opened.
pub trait Strategy {
    fn is_supported(&self) -> bool;

    fn connect(&mut self, request: ConnectRequest, callback: TransportCallback) -> Box<dyn AbortHandle>;
}
