//! WebSocket transport: one JSON-encoded event per text frame.
//!
//! ## Protocol Overview
//!
//! 1. **Connect** — WebSocket to the configured service URL, optional
//!    bearer token in the `Authorization` header
//! 2. **Stream** — each [`WireEvent`] is one JSON text message, in both
//!    directions; audio payloads are base64 within the JSON
//! 3. **Close** — gracefully close the WebSocket session
//!
//! Undecodable inbound frames are logged and dropped (malformed payloads
//! never terminate the stream); socket closure or failure ends the
//! inbound sequence, which the session surfaces as `TransportClosed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::Transport;
use crate::error::{Error, Result};
use crate::events::WireEvent;

/// Outbound message to the writer task.
#[derive(Debug)]
enum OutboundMessage {
    Event(WireEvent),
    Close,
}

/// WebSocket-backed [`Transport`].
///
/// Created by [`WsTransport::connect`]. Events are serialized by a
/// dedicated writer task and parsed by a dedicated reader task, so the
/// session only ever sees [`WireEvent`]s.
pub struct WsTransport {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    event_rx: Arc<Mutex<mpsc::Receiver<WireEvent>>>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Connect to the remote service and start the reader/writer tasks.
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self> {
        let request = build_request(url, token)?;

        tracing::info!(url = %url, "connecting to speech service");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::TransportClosed(format!("connect failed: {e}")))?;
        tracing::info!(url = %url, "transport established");

        let (ws_sender, ws_receiver) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(256);
        let (event_tx, event_rx) = mpsc::channel::<WireEvent>(256);

        tokio::spawn(writer_loop(outbound_rx, ws_sender));
        tokio::spawn(reader_loop(ws_receiver, event_tx));

        Ok(Self {
            outbound_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, event: WireEvent) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed("send after close".into()));
        }
        self.outbound_tx
            .send(OutboundMessage::Event(event))
            .await
            .map_err(|_| Error::TransportClosed("writer task gone".into()))
    }

    async fn recv(&self) -> Option<WireEvent> {
        self.event_rx.lock().await.recv().await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Writer may already be gone if the socket failed; that is fine.
        let _ = self.outbound_tx.try_send(OutboundMessage::Close);
        tracing::debug!("transport close requested");
    }
}

fn build_request(url: &str, token: Option<&str>) -> Result<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::TransportClosed(format!("bad service url: {e}")))?;
    if let Some(token) = token {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| Error::TransportClosed("invalid bearer token".into()))?;
        request.headers_mut().insert("Authorization", value);
    }
    Ok(request)
}

/// Writer: serialize events onto the socket in send order.
async fn writer_loop(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut ws_sender: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        WsMessage,
    >,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMessage::Event(event) => {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound event");
                        continue;
                    }
                };
                if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                    tracing::warn!("socket send failed, closing writer");
                    break;
                }
            }
            OutboundMessage::Close => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    tracing::debug!("transport writer stopped");
}

/// Reader: parse inbound text frames into events, in arrival order.
async fn reader_loop(
    mut ws_receiver: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
    event_tx: mpsc::Sender<WireEvent>,
) {
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<WireEvent>(text.as_str()) {
                Ok(event) => {
                    if event_tx.send(event).await.is_err() {
                        tracing::debug!("event receiver dropped, closing reader");
                        return;
                    }
                }
                Err(e) => {
                    // Contained: drop the frame, keep the stream alive.
                    tracing::warn!(error = %e, "dropping malformed inbound frame");
                }
            },
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(close_frame = ?frame, "peer closed the transport");
                break;
            }
            Ok(
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) | WsMessage::Frame(_),
            ) => {
                // Binary frames are not part of this protocol; ping/pong
                // are handled by tungstenite.
            }
            Err(e) => {
                tracing::error!(error = %e, "transport socket error");
                break;
            }
        }
    }
    tracing::debug!("transport reader stopped");
    // Dropping event_tx ends the inbound sequence for the session.
}
