//! WebSocket transport for the signaling bridge

use super::bridge::SignalingBridge;
use crate::shutdown::Shutdown;
use crate::Error;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket signaling client
///
/// Connects once to `url`, reports channel transitions to the bridge, feeds
/// it every inbound text frame and writes the bridge's outbound frames.
/// A Close frame is sent on shutdown.
pub struct SignalingClient {
    url: String,
    bridge: Arc<SignalingBridge>,
}

impl SignalingClient {
    /// # Arguments
    ///
    /// * `url` - WebSocket signaling server URL (ws:// or wss://)
    /// * `bridge` - Receiver of channel transitions and inbound frames
    pub fn new(url: impl Into<String>, bridge: Arc<SignalingBridge>) -> Self {
        Self {
            url: url.into(),
            bridge,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run the client on its own task
    pub fn spawn(
        self,
        outbound: mpsc::UnboundedReceiver<String>,
        shutdown: Shutdown,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(outbound, shutdown))
    }

    /// Connect and pump frames until the channel closes or shutdown
    pub async fn run(self, outbound: mpsc::UnboundedReceiver<String>, mut shutdown: Shutdown) {
        info!("Connecting to signaling server: {}", self.url);
        self.bridge.on_connecting();

        let connected = tokio::select! {
            result = connect_async(self.url.as_str()) => result,
            _ = shutdown.wait() => {
                debug!("Shutdown before signaling connected");
                self.bridge.on_closed();
                return;
            }
        };

        let ws_stream = match connected {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                let err =
                    Error::WebSocketError(format!("Failed to connect to {}: {}", self.url, e));
                debug!(retryable = err.is_retryable(), "Signaling connect failed");
                self.bridge.on_error(&err.to_string());
                return;
            }
        };

        info!("Connected to signaling server");
        self.bridge.on_open();

        self.pump(ws_stream, outbound, shutdown).await;

        self.bridge.on_closed();
        debug!("Signaling client terminated");
    }

    async fn pump(
        &self,
        ws_stream: WsStream,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut shutdown: Shutdown,
    ) {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        debug!("Outbound signaling queue closed");
                        break;
                    };

                    debug!("Sending signaling message: {}", frame);
                    if let Err(e) = write.send(Message::Text(frame)).await {
                        error!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.bridge.handle_text(&text).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("WebSocket connection closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            break;
                        }
                    }
                }
                _ = shutdown.wait() => {
                    info!("Closing signaling channel");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!("Failed to send close frame: {}", e);
                    }
                    break;
                }
            }
        }
    }
}
