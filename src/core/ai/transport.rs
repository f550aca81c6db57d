//! Transport seam for the speech-AI event stream.
//!
//! [`AiTransport`] is the boundary between the session state machine and the
//! wire: production traffic goes through [`WsTransport`] (WebSocket), while
//! tests and synthetic runs use [`ChannelTransport`], an in-memory pair that
//! records what the session sent and lets the harness inject server events.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::error::AiError;
use super::messages::{ClientEvent, ServerEvent};

/// Channel capacity for outbound client events.
const OUTBOUND_CAPACITY: usize = 256;

/// Channel capacity for the inbound server-event feed.
const EVENT_CAPACITY: usize = 256;

/// Bidirectional event-stream transport to the speech-AI service.
///
/// Implementations must preserve send order; the inbound side is delivered
/// separately as an `mpsc::Receiver<ServerEvent>` handed out at
/// construction time.
#[async_trait]
pub trait AiTransport: Send + Sync {
    /// Queue one client event for delivery, preserving call order.
    async fn send(&self, event: ClientEvent) -> Result<(), AiError>;

    /// Tear down the transport. Idempotent.
    async fn close(&self);
}

// =============================================================================
// WebSocket transport
// =============================================================================

/// Production transport over a WebSocket connection.
pub struct WsTransport {
    outbound: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Connect to the service endpoint. Returns the transport plus the
    /// inbound server-event feed.
    pub async fn connect(
        endpoint: &str,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), AiError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| AiError::ConnectionFailed(e.to_string()))?;

        info!(endpoint, "connected to speech-AI event stream");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(EVENT_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        let Some(event) = outgoing else {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("failed to serialize AI client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            warn!("AI stream send failed: {e}");
                            break;
                        }
                    }

                    incoming = ws_source.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if event_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("dropping unparseable AI event: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!("AI stream pong failed: {e}");
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("speech-AI service closed the stream");
                                break;
                            }
                            Some(Ok(_)) => {
                                debug!("ignoring non-text AI frame");
                            }
                            Some(Err(e)) => {
                                warn!("AI stream read error: {e}");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("AI stream connection task ended");
        });

        Ok((
            Self {
                outbound: Mutex::new(Some(outbound_tx)),
                task: Mutex::new(Some(task)),
            },
            event_rx,
        ))
    }
}

#[async_trait]
impl AiTransport for WsTransport {
    async fn send(&self, event: ClientEvent) -> Result<(), AiError> {
        let guard = self.outbound.lock().await;
        match guard.as_ref() {
            Some(sender) => sender
                .send(event)
                .await
                .map_err(|e| AiError::Transport(e.to_string())),
            None => Err(AiError::Transport("transport closed".to_string())),
        }
    }

    async fn close(&self) {
        // Dropping the sender lets the connection task flush and close.
        self.outbound.lock().await.take();
        if let Some(task) = self.task.lock().await.take() {
            // Give the task a moment to send the close frame, then stop it.
            let _ = tokio::time::timeout(std::time::Duration::from_millis(250), task).await;
        }
    }
}

// =============================================================================
// In-memory transport
// =============================================================================

/// In-memory transport for tests and synthetic runs.
///
/// Everything the session sends lands on the `sent` receiver; server events
/// pushed through the `server` sender appear on the session's inbound feed.
pub struct ChannelTransport {
    sent_tx: mpsc::Sender<ClientEvent>,
}

impl ChannelTransport {
    /// Build a transport plus its harness-side handles.
    ///
    /// Returns `(transport, inbound_feed, sent_events, server_injector)`:
    /// pass `transport` and `inbound_feed` to the session, keep the other
    /// two in the harness.
    pub fn pair() -> (
        Self,
        mpsc::Receiver<ServerEvent>,
        mpsc::Receiver<ClientEvent>,
        mpsc::Sender<ServerEvent>,
    ) {
        let (sent_tx, sent_rx) = mpsc::channel(EVENT_CAPACITY);
        let (server_tx, server_rx) = mpsc::channel(EVENT_CAPACITY);
        (Self { sent_tx }, server_rx, sent_rx, server_tx)
    }
}

#[async_trait]
impl AiTransport for ChannelTransport {
    async fn send(&self, event: ClientEvent) -> Result<(), AiError> {
        self.sent_tx
            .send(event)
            .await
            .map_err(|e| AiError::Transport(e.to_string()))
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_records_sends() {
        let (transport, _events, mut sent, _server) = ChannelTransport::pair();
        transport
            .send(ClientEvent::SessionStart {
                session_id: "s-1".to_string(),
            })
            .await
            .unwrap();
        let event = sent.recv().await.unwrap();
        assert_eq!(
            event,
            ClientEvent::SessionStart {
                session_id: "s-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_channel_transport_injects_server_events() {
        let (_transport, mut events, _sent, server) = ChannelTransport::pair();
        server
            .send(ServerEvent::StreamComplete {})
            .await
            .unwrap();
        assert_eq!(events.recv().await.unwrap(), ServerEvent::StreamComplete {});
    }
}
