//! Concrete transports.

mod websocket;

pub use websocket::{WebSocketSocket, WebSocketStrategy};
