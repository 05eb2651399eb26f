//! WebSocket Client Transport
//!
//! Connects a `GameSession` to the relay server. A writer task drains an
//! outgoing queue onto the socket; a reader task routes relayed events to
//! the session's subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug};

use crate::network::protocol::{
    ClientFrame, ErrorCode, JoinInfo, JoinRequest, PeerEvent, ServerFrame, Topic,
};
use crate::network::transport::{EventSink, TopicRouter, Transport, TransportError};

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Join handshake did not complete.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Frame could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Relay refused the join.
    #[error("Rejected by server ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
}

/// Transport backed by a relay server connection.
pub struct WsTransport {
    outgoing: mpsc::UnboundedSender<ClientFrame>,
    router: Arc<TopicRouter>,
    opponent: watch::Receiver<bool>,
    closed: Arc<AtomicBool>,
}

impl WsTransport {
    /// Connect to `url` and join a room.
    ///
    /// Returns once the relay has assigned a seat.
    pub async fn connect(url: &str, request: JoinRequest) -> Result<(Self, JoinInfo), ClientError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let join = ClientFrame::Join(request).to_json()?;
        ws_sender.send(Message::Text(join)).await?;

        let info = loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => match ServerFrame::from_json(&text)? {
                    ServerFrame::Joined(info) => break info,
                    ServerFrame::Error(e) => {
                        return Err(ClientError::Rejected {
                            code: e.code,
                            message: e.message,
                        })
                    }
                    other => debug!("Ignoring {:?} before join", other),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ClientError::Handshake(
                        "connection closed before join".to_string(),
                    ))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        };
        info!("Joined room {} as {}", info.room_id, info.role);

        let router = Arc::new(TopicRouter::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (opponent_tx, opponent_rx) = watch::channel(info.opponent_present);
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ClientFrame>();

        // Writer
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let text = match frame.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize frame: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Reader
        let reader_router = router.clone();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => ServerFrame::from_json(&text).map_err(|e| e.to_string()),
                    Ok(Message::Binary(data)) => ServerFrame::from_bytes(&data).map_err(|e| e.to_string()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Relay connection error: {}", e);
                        break;
                    }
                };
                match frame {
                    Ok(ServerFrame::Event(event)) => {
                        reader_router.deliver(&event);
                    }
                    Ok(ServerFrame::PeerJoined { role }) => {
                        info!("Opponent joined as {}", role);
                        let _ = opponent_tx.send(true);
                    }
                    Ok(ServerFrame::PeerLeft { role }) => {
                        info!("Opponent {} left; room closed", role);
                        let _ = opponent_tx.send(false);
                        reader_closed.store(true, Ordering::SeqCst);
                    }
                    Ok(ServerFrame::Error(e)) => {
                        warn!("Relay error {:?}: {}", e.code, e.message);
                    }
                    Ok(ServerFrame::Shutdown { reason }) => {
                        info!("Relay shutting down: {}", reason);
                        break;
                    }
                    Ok(other) => debug!("Ignoring {:?}", other),
                    Err(e) => warn!("Invalid frame from relay: {}", e),
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            let _ = opponent_tx.send(false);
            reader_router.clear();
        });

        Ok((
            Self {
                outgoing: outgoing_tx,
                router,
                opponent: opponent_rx,
                closed,
            },
            info,
        ))
    }

    /// Whether the other seat is taken.
    pub fn opponent_present(&self) -> bool {
        *self.opponent.borrow()
    }

    /// Wait until the other seat is taken.
    pub async fn wait_for_opponent(&self) -> Result<(), ClientError> {
        let mut rx = self.opponent.clone();
        rx.wait_for(|present| *present)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Handshake("connection closed".to_string()))
    }

    /// Leave the room. Further publishes fail with `Closed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outgoing.send(ClientFrame::Leave);
        }
        self.router.clear();
    }

    /// Check if the transport has been closed locally or by the relay.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for WsTransport {
    fn publish(&self, event: PeerEvent) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outgoing
            .send(ClientFrame::Publish(event))
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self, topic: Topic, sink: EventSink) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.router.subscribe(topic, sink);
        Ok(())
    }
}
