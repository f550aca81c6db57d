//! Signaling relay WebSocket client.
//!
//! Owns exactly one connection to the relay and exposes the inbound side as
//! a typed [`SignalingEvent`] feed. Sending is non-blocking for the caller:
//! outbound messages are queued on an mpsc channel drained by the connection
//! task, so a slow socket never stalls the supervisor loop.
//!
//! Reconnection is deliberately not handled here; when the connection dies
//! the feed ends with a single `Closed` event and the supervisor decides
//! what happens to the call.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::messages::{SignalingEvent, SignalingMessage};

/// Channel capacity for queued outbound signaling messages.
const OUTBOUND_CAPACITY: usize = 64;

/// Channel capacity for the inbound event feed.
const EVENT_CAPACITY: usize = 64;

/// Errors raised by the signaling client.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The WebSocket connection could not be established.
    #[error("signaling connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection is gone; the message was not sent.
    #[error("signaling connection closed")]
    NotConnected,

    /// A message could not be serialized for the wire.
    #[error("signaling serialization error: {0}")]
    Serialization(String),
}

/// WebSocket client for the signaling relay.
///
/// Created via [`SignalingClient::connect`], which also returns the inbound
/// event feed. Dropping the client (or calling [`SignalingClient::close`])
/// tears down the connection task.
pub struct SignalingClient {
    outbound: Option<mpsc::Sender<SignalingMessage>>,
    task: Option<JoinHandle<()>>,
}

impl SignalingClient {
    /// Connect to the relay and register on `channel_arn` as `client_id`.
    ///
    /// The `connect` message is sent immediately after the socket opens.
    /// Returns the client handle plus the inbound event feed.
    pub async fn connect(
        endpoint: &str,
        channel_arn: &str,
        client_id: &str,
    ) -> Result<(Self, mpsc::Receiver<SignalingEvent>), SignalingError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        info!(endpoint, channel_arn, client_id, "connected to signaling relay");

        let (mut ws_sink, mut ws_source) = ws_stream.split();

        // Register on the channel before anything else flows.
        let connect_msg = SignalingMessage::Connect {
            channel_arn: channel_arn.to_string(),
            client_id: client_id.to_string(),
        };
        let json = serde_json::to_string(&connect_msg)
            .map_err(|e| SignalingError::Serialization(e.to_string()))?;
        ws_sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<SignalingMessage>(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<SignalingEvent>(EVENT_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        let Some(msg) = outgoing else {
                            // Client handle dropped; close the socket politely.
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("failed to serialize signaling message: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            warn!("signaling send failed: {e}");
                            let _ = event_tx.send(SignalingEvent::Error(e.to_string())).await;
                            break;
                        }
                    }

                    incoming = ws_source.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<SignalingMessage>(&text) {
                                    Ok(msg) => {
                                        if event_tx.send(Self::event_for(msg)).await.is_err() {
                                            // Consumer gone; nothing left to do.
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        // Parse failures drop the frame only.
                                        warn!("dropping unparseable signaling frame: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                // Keep-alive: relay expects a pong back.
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!("signaling pong failed: {e}");
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("signaling relay closed the connection");
                                break;
                            }
                            Some(Ok(_)) => {
                                debug!("ignoring non-text signaling frame");
                            }
                            Some(Err(e)) => {
                                warn!("signaling read error: {e}");
                                let _ = event_tx.send(SignalingEvent::Error(e.to_string())).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            // Terminal event, exactly once: every exit path funnels here.
            let _ = event_tx.send(SignalingEvent::Closed).await;
            debug!("signaling connection task ended");
        });

        Ok((
            Self {
                outbound: Some(outbound_tx),
                task: Some(task),
            },
            event_rx,
        ))
    }

    /// Map an inbound wire message to its feed event.
    fn event_for(msg: SignalingMessage) -> SignalingEvent {
        match msg {
            SignalingMessage::Connect { .. } => SignalingEvent::ConnectAck,
            SignalingMessage::Offer { sdp } => SignalingEvent::Offer(sdp),
            SignalingMessage::Answer { sdp } => SignalingEvent::Answer(sdp),
            SignalingMessage::IceCandidate { candidate } => SignalingEvent::IceCandidate(candidate),
        }
    }

    /// Send a session description offer.
    pub async fn send_offer(&self, sdp: String) -> Result<(), SignalingError> {
        self.send(SignalingMessage::Offer { sdp }).await
    }

    /// Send a session description answer.
    pub async fn send_answer(&self, sdp: String) -> Result<(), SignalingError> {
        self.send(SignalingMessage::Answer { sdp }).await
    }

    /// Forward a local ICE candidate to the peer.
    pub async fn send_ice_candidate(&self, candidate: String) -> Result<(), SignalingError> {
        self.send(SignalingMessage::IceCandidate { candidate }).await
    }

    async fn send(&self, msg: SignalingMessage) -> Result<(), SignalingError> {
        match &self.outbound {
            Some(sender) => sender
                .send(msg)
                .await
                .map_err(|_| SignalingError::NotConnected),
            None => Err(SignalingError::NotConnected),
        }
    }

    /// Close the connection. Safe to call more than once.
    ///
    /// Dropping the outbound sender lets the connection task write a
    /// WebSocket close frame before exiting; the task gets a bounded grace
    /// period and is aborted if it does not finish in time.
    pub async fn close(&mut self) {
        self.outbound.take();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(std::time::Duration::from_millis(250), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
            info!("signaling client closed");
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        // Emergency path only; `close` is the orderly one.
        self.outbound.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
