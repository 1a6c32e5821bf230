//! Multiplexed WebSocket connection and event loop.
//!
//! A browser manager talks to its browser over a single WebSocket. Every
//! message is a JSON array that names the virtual channel it belongs to:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `[0, payload]` | Control message |
//! | `[id, payload]` | Message for virtual channel `id` |
//! | `[id]` | Virtual channel `id` closed |
//!
//! Channels created on this side use odd IDs starting at 1.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming frames (control messages, channel messages, channel closes)
//! - Outgoing frames from the Rust API
//! - Routing channel messages to their [`VirtualChannel`]

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;

// ============================================================================
// Types
// ============================================================================

/// Map of open virtual channels to their inbound queues.
type RouteMap = FxHashMap<ChannelId, mpsc::UnboundedSender<Value>>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a payload on a channel.
    Send { channel: ChannelId, payload: Value },
    /// Tell the remote end a channel is closed.
    Close(ChannelId),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Multiplexed WebSocket connection to a browser.
///
/// Cheap to clone; all clones drive the same event loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Open virtual channels (shared with event loop).
    routes: Arc<Mutex<RouteMap>>,
    /// Next locally allocated channel ID.
    next_channel: Arc<AtomicU64>,
    /// Set once the event loop terminates.
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Creates a new connection from a WebSocket stream.
    ///
    /// Spawns the event loop task internally. Returns the connection and the
    /// receiver for control-channel messages, which yields `None` once the
    /// socket ends.
    pub fn new<S>(ws_stream: WebSocketStream<S>) -> (Self, mpsc::UnboundedReceiver<Value>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let routes = Arc::new(Mutex::new(RouteMap::default()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            control_tx,
            Arc::clone(&routes),
            Arc::clone(&closed),
        ));

        let connection = Self {
            command_tx,
            routes,
            next_channel: Arc::new(AtomicU64::new(1)),
            closed,
        };

        (connection, control_rx)
    }

    /// Sends a message on the control channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop has stopped.
    pub fn send_control(&self, payload: Value) -> Result<()> {
        self.send(ChannelId::CONTROL, payload)
    }

    /// Opens a new locally numbered virtual channel.
    pub fn virtual_channel(&self) -> VirtualChannel {
        let id = ChannelId::new(self.next_channel.fetch_add(2, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(id, tx);

        trace!(channel = %id, "Virtual channel opened");

        VirtualChannel {
            id,
            connection: self.clone(),
            inbound: rx,
            open: true,
        }
    }

    /// Returns the number of open virtual channels.
    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Returns `true` once the socket has ended.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shuts down the connection gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Queues a payload for a channel.
    fn send(&self, channel: ChannelId, payload: Value) -> Result<()> {
        self.command_tx
            .send(ConnectionCommand::Send { channel, payload })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes a virtual channel locally and tells the remote end.
    fn close_channel(&self, channel: ChannelId) {
        self.routes.lock().remove(&channel);
        let _ = self.command_tx.send(ConnectionCommand::Close(channel));
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        control_tx: mpsc::UnboundedSender<Value>,
        routes: Arc<Mutex<RouteMap>>,
        closed: Arc<AtomicBool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming frames from the browser
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_frame(&text, &control_tx, &routes);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    let frame = match command {
                        Some(ConnectionCommand::Send { channel, payload }) => {
                            json!([channel, payload])
                        }

                        Some(ConnectionCommand::Close(channel)) => json!([channel]),

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    };

                    if let Err(e) = ws_write.send(Message::Text(frame.to_string().into())).await {
                        warn!(error = %e, "Failed to send frame");
                        break;
                    }
                }
            }
        }

        drop(command_rx);
        closed.store(true, Ordering::SeqCst);

        // Dropping the senders ends every channel's inbound stream
        let open = {
            let mut routes = routes.lock();
            let count = routes.len();
            routes.clear();
            count
        };

        debug!(open_channels = open, "Event loop terminated");
    }

    /// Routes one incoming frame.
    fn handle_incoming_frame(
        text: &str,
        control_tx: &mpsc::UnboundedSender<Value>,
        routes: &Arc<Mutex<RouteMap>>,
    ) {
        let frame: Vec<Value> = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse incoming frame");
                return;
            }
        };

        let mut parts = frame.into_iter();
        let Some(channel) = parts.next().and_then(|id| id.as_u64()).map(ChannelId::new) else {
            warn!(text = %text, "Frame without channel ID");
            return;
        };

        match parts.next() {
            Some(payload) if channel.is_control() => {
                let _ = control_tx.send(payload);
            }

            Some(payload) => {
                let routes = routes.lock();
                match routes.get(&channel) {
                    Some(tx) => {
                        let _ = tx.send(payload);
                    }
                    None => warn!(channel = %channel, "Message for unknown channel"),
                }
            }

            None => {
                trace!(channel = %channel, "Remote closed channel");
                routes.lock().remove(&channel);
            }
        }
    }
}

// ============================================================================
// VirtualChannel
// ============================================================================

/// One logical channel multiplexed over a [`Connection`].
///
/// Closing (or dropping) the channel notifies the remote end.
pub struct VirtualChannel {
    /// Channel ID.
    id: ChannelId,
    /// Owning connection.
    connection: Connection,
    /// Messages from the remote end.
    inbound: mpsc::UnboundedReceiver<Value>,
    /// Whether the close notice has not yet been sent.
    open: bool,
}

impl VirtualChannel {
    /// Returns the channel ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Sends a payload to the remote end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection has stopped.
    pub fn send(&self, payload: Value) -> Result<()> {
        self.connection.send(self.id, payload)
    }

    /// Receives the next payload, or `None` once either side closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    /// Closes the channel.
    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            self.connection.close_channel(self.id);
        }
    }
}

impl Drop for VirtualChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
