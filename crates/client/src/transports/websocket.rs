//! WebSocket transport using tokio-tungstenite.
//!
//! Sockets run two local tasks: one forwards outgoing frames to the sink, the
//! other reports inbound traffic through the attempt's [`SocketEventSink`].
//! Both require a tokio `LocalSet`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::ClientConfig;
use crate::connection::{AbortHandle, ConnectRequest, Strategy};
use crate::error::TransportError;
use crate::inbox::TransportCallback;
use crate::socket::{CloseEvent, Socket, SocketEvent, SocketEventSink};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open WebSocket.
pub struct WebSocketSocket {
    outgoing: Option<UnboundedSender<Message>>,
}

impl WebSocketSocket {
    fn open(stream: Stream, events: SocketEventSink) -> Self {
        let (mut write, mut read) = stream.split();
        let (outgoing, mut receiver) = unbounded::<Message>();

        tokio::task::spawn_local(async move {
            while let Some(message) = receiver.next().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    crate::log_debug!("WebSocket send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        tokio::task::spawn_local(async move {
            let mut close = None;
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => events.emit(SocketEvent::Message(text.to_string())),
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => events.emit(SocketEvent::Activity),
                    Ok(Message::Close(frame)) => {
                        close = frame.map(|frame| CloseEvent {
                            code: frame.code.into(),
                            reason: frame.reason.to_string(),
                        });
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        events.emit(SocketEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            events.emit(SocketEvent::Closed(close));
        });

        Self {
            outgoing: Some(outgoing),
        }
    }

    fn queue(&mut self, message: Message) -> bool {
        match &self.outgoing {
            Some(outgoing) => outgoing.unbounded_send(message).is_ok(),
            None => false,
        }
    }
}

impl Socket for WebSocketSocket {
    fn send(&mut self, data: &str) -> bool {
        self.queue(Message::text(data.to_owned()))
    }

    fn close(&mut self) {
        self.queue(Message::Close(None));
        self.outgoing = None;
    }

    fn ping(&mut self) {
        self.queue(Message::Ping(Default::default()));
    }

    fn supports_ping(&self) -> bool {
        true
    }
}

struct TaskAbortHandle(Option<JoinHandle<()>>);

impl AbortHandle for TaskAbortHandle {
    fn abort(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

/// Tries `wss` then `ws`, or only `wss` when TLS is required.
///
/// The candidate that last connected is tried first on the next run.
pub struct WebSocketStrategy {
    key: String,
    config: ClientConfig,
    last_success: Rc<Cell<Option<bool>>>,
}

impl WebSocketStrategy {
    pub fn new(key: &str, config: &ClientConfig) -> Self {
        Self {
            key: key.to_string(),
            config: config.clone(),
            last_success: Rc::new(Cell::new(None)),
        }
    }

    /// Candidate `(use_tls, url)` pairs in the order they are tried.
    pub fn candidates(&self, use_tls: bool) -> Vec<(bool, Result<Url, String>)> {
        let mut order = if use_tls { vec![true] } else { vec![true, false] };
        if let Some(preferred) = self.last_success.get() {
            if let Some(index) = order.iter().position(|tls| *tls == preferred) {
                order.swap(0, index);
            }
        }
        order
            .into_iter()
            .map(|tls| {
                let url = self.config.socket_url(&self.key, tls).map_err(|e| e.to_string());
                (tls, url)
            })
            .collect()
    }
}

impl Strategy for WebSocketStrategy {
    fn is_supported(&self) -> bool {
        true
    }

    fn connect(&mut self, request: ConnectRequest, callback: TransportCallback) -> Box<dyn AbortHandle> {
        let candidates = self.candidates(request.use_tls);
        let connect_timeout: Duration = self.config.timeouts.connect_timeout;
        let last_success = self.last_success.clone();

        let task = tokio::task::spawn_local(async move {
            let mut last_error = TransportError::Unsupported;
            for (tls, url) in candidates {
                let url = match url {
                    Ok(url) => url,
                    Err(e) => {
                        last_error = TransportError::ConnectFailed(e);
                        continue;
                    }
                };
                crate::log_debug!("Connecting to {}", url);
                match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
                    Ok(Ok((stream, _response))) => {
                        last_success.set(Some(tls));
                        let socket = WebSocketSocket::open(stream, request.events);
                        callback.resolve(Ok(Box::new(socket)));
                        return;
                    }
                    Ok(Err(e)) => {
                        crate::log_debug!("WebSocket connect to {} failed: {}", url, e);
                        last_error = TransportError::ConnectFailed(e.to_string());
                    }
                    Err(_) => {
                        crate::log_debug!("WebSocket connect to {} timed out", url);
                        last_error = TransportError::Timeout;
                    }
                }
            }
            callback.resolve(Err(last_error));
        });

        Box::new(TaskAbortHandle(Some(task)))
    }
}
