//! Downstream WebSocket Server
//!
//! Accepts subscriber connections, registers each one with the relay
//! context and forwards its text frames to the subscription controller.
//!
//! Every subscriber receives every quote; requests only change what is
//! subscribed upstream. A connection is removed from the registry on every
//! exit path: close frame, read error, or shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;

use crate::application::context::{RelayContext, SubscriberId};
use crate::application::ports::{DeliveryError, SubscriberSink};
use crate::application::services::SubscriptionController;
use crate::infrastructure::metrics;

type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReader = SplitStream<WebSocketStream<TcpStream>>;

// =============================================================================
// Errors
// =============================================================================

/// Downstream server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Listener address unavailable.
    #[error("listener address unavailable: {0}")]
    LocalAddr(#[source] std::io::Error),
}

// =============================================================================
// Subscriber Sink
// =============================================================================

/// Write half of one subscriber connection.
pub struct WsSubscriber {
    writer: Mutex<WsWriter>,
}

impl WsSubscriber {
    fn new(writer: WsWriter) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    async fn close(&self) {
        let _ = self.writer.lock().await.close().await;
    }
}

#[async_trait]
impl SubscriberSink for WsSubscriber {
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError> {
        self.writer
            .lock()
            .await
            .send(Message::Text(payload.to_owned().into()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    DeliveryError::Closed
                }
                other => DeliveryError::Transport(other.to_string()),
            })
    }
}

// =============================================================================
// Server
// =============================================================================

/// Accept loop for downstream subscribers.
pub struct DownstreamServer {
    listener: TcpListener,
    context: Arc<RelayContext>,
    controller: SubscriptionController,
}

impl DownstreamServer {
    /// Bind the listen address.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be bound.
    pub async fn bind(addr: &str, context: Arc<RelayContext>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let controller = SubscriptionController::new(Arc::clone(&context));
        Ok(Self {
            listener,
            context,
            controller,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Accept connections until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%addr, "Downstream WebSocket server listening");
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = Connection {
                            context: Arc::clone(&self.context),
                            controller: self.controller.clone(),
                            cancel: cancel.child_token(),
                        };
                        tokio::spawn(connection.serve(stream, peer));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        tracing::info!("Downstream WebSocket server stopped");
    }
}

// =============================================================================
// Connection
// =============================================================================

struct Connection {
    context: Arc<RelayContext>,
    controller: SubscriptionController,
    cancel: CancellationToken,
}

impl Connection {
    async fn serve(self, stream: TcpStream, peer: SocketAddr) {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let (writer, reader) = ws.split();
        let sink = Arc::new(WsSubscriber::new(writer));
        let id = self.context.subscribers.next_id();
        self.context
            .subscribers
            .add(id, Arc::clone(&sink) as Arc<dyn SubscriberSink>);
        metrics::set_subscribers(self.context.subscribers.len());
        tracing::info!(%peer, subscriber = %id, "Subscriber connected");

        self.read_frames(id, reader).await;

        self.context.subscribers.remove(id);
        metrics::set_subscribers(self.context.subscribers.len());
        sink.close().await;
        tracing::info!(%peer, subscriber = %id, "Subscriber disconnected");
    }

    async fn read_frames(&self, id: SubscriberId, mut reader: WsReader) {
        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => return,
                frame = reader.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => self.controller.handle_request(text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.controller.handle_request(text),
                    Err(_) => {
                        tracing::debug!(subscriber = %id, "Ignoring non-UTF-8 binary frame");
                    }
                },
                // tungstenite queues the pong and flushes it on the next read
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => return,
                Some(Err(e)) => {
                    tracing::debug!(subscriber = %id, error = %e, "Subscriber read failed");
                    return;
                }
            }
        }
    }
}
