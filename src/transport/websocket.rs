//! # WebSocket Transport
//!
//! [`Transport`] implementation on top of `tokio-tungstenite`.
//!
//! Each connection runs as a tokio task. The task and the synchronous
//! [`Transport`] API talk over bounded channels, so `connect`, `send` and
//! `poll_event` never block the caller.
//!
//! Inbound messages are capped at a few times the largest control frame the
//! decoder accepts, so an oversized message fails the connection instead of
//! being buffered whole.

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{Transport, TransportEvent};
use crate::codec::protocol::MAX_INBOUND_FRAME_SIZE;
use crate::error::{ForwarderError, Result};

/// Outbound frames buffered per connection
const OUTBOUND_QUEUE_DEPTH: usize = 8;

/// Events buffered between ticks
const EVENT_QUEUE_DEPTH: usize = 16;

/// Largest inbound message or frame tungstenite will read
pub const MAX_INBOUND_MESSAGE_SIZE: usize = MAX_INBOUND_FRAME_SIZE * 4;

fn session_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_INBOUND_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_INBOUND_MESSAGE_SIZE);
    config
}

struct Session {
    outbound: mpsc::Sender<Message>,
    events: mpsc::Receiver<TransportEvent>,
    task: JoinHandle<()>,
}

/// WebSocket client transport
pub struct WsTransport {
    runtime: Handle,
    session: Option<Session>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("active", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Create a transport that spawns connection tasks on `runtime`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ble_ws_forwarder::transport::WsTransport;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let transport = WsTransport::new(tokio::runtime::Handle::current());
    /// }
    /// ```
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            session: None,
        }
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.task.abort();
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, url: &str) -> Result<()> {
        self.teardown();

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let task = self
            .runtime
            .spawn(run_session(url.to_string(), outbound_rx, events_tx));

        self.session = Some(Session {
            outbound: outbound_tx,
            events: events_rx,
            task,
        });

        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ForwarderError::TransportSend("not connected".to_string()))?;

        let message = match std::str::from_utf8(frame) {
            Ok(text) => Message::Text(text.to_owned()),
            Err(_) => Message::Binary(frame.to_vec()),
        };

        session.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ForwarderError::TransportBusy,
            TrySendError::Closed(_) => ForwarderError::TransportSend("connection closed".to_string()),
        })
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.session.as_mut()?.events.try_recv().ok()
    }

    fn close(&mut self) {
        self.teardown();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Drive one WebSocket connection until it closes or fails
async fn run_session(
    url: String,
    mut outbound: mpsc::Receiver<Message>,
    events: mpsc::Sender<TransportEvent>,
) {
    let stream = match connect_async_with_config(url.as_str(), Some(session_config()), false).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!("WebSocket connect to {} failed: {}", url, e);
            let _ = events.send(TransportEvent::Error(e.to_string())).await;
            return;
        }
    };

    if events.send(TransportEvent::Connected).await.is_err() {
        return;
    }

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                }
                None => {
                    // Transport side dropped the session
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Message(text.into_bytes())).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if events.send(TransportEvent::Message(data)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed connection: {:?}", frame);
                    let _ = events.send(TransportEvent::Disconnected).await;
                    return;
                }
                // Ping/pong handled by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string())).await;
                    return;
                }
                None => {
                    let _ = events.send(TransportEvent::Disconnected).await;
                    return;
                }
            },
        }
    }
}
