//! Peer media session over a WebRTC peer connection.
//!
//! Owns the `RTCPeerConnection`: offer/answer generation, trickle ICE in
//! both directions, the inbound audio feed (raw PCMU payloads off the remote
//! track) and the outbound PCMU track. The signaling relay that carries the
//! SDP/ICE messages lives in [`crate::core::signaling`]; this module never
//! touches the relay directly.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Default window for the peer connection to reach `Connected`.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel capacity for inbound audio frames (20 ms each; ~5 s of audio).
const FRAME_CAPACITY: usize = 256;

/// Channel capacity for media events.
const EVENT_CAPACITY: usize = 64;

/// μ-law samples per millisecond at 8 kHz.
const SAMPLES_PER_MS: usize = 8;

/// Errors raised by the media session.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The peer connection did not reach `Connected` within the setup
    /// window. Fatal to the call.
    #[error("media setup timed out after {0:?}")]
    SetupTimeout(Duration),

    /// Underlying peer connection failure.
    #[error("peer connection error: {0}")]
    Peer(String),

    /// A state-machine violation (e.g. answering before an offer exists).
    #[error("media session in state {state} cannot {operation}")]
    InvalidState {
        /// Current handshake state
        state: MediaSessionState,
        /// The rejected operation
        operation: &'static str,
    },
}

/// SDP handshake progression. Monotonic; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum MediaSessionState {
    New,
    OfferSent,
    OfferReceived,
    AnswerReceived,
    AnswerSent,
    Connected,
    Closed,
}

impl std::fmt::Display for MediaSessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MediaSessionState::New => "New",
            MediaSessionState::OfferSent => "OfferSent",
            MediaSessionState::OfferReceived => "OfferReceived",
            MediaSessionState::AnswerReceived => "AnswerReceived",
            MediaSessionState::AnswerSent => "AnswerSent",
            MediaSessionState::Connected => "Connected",
            MediaSessionState::Closed => "Closed",
        };
        write!(f, "{name}")
    }
}

/// Coarse transport state surfaced to the diagnostics layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Events emitted by the media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A local ICE candidate was discovered; forward it over signaling.
    LocalIceCandidate(String),
    /// The transport connection state changed. Transitions are monotonic:
    /// no Connected → Connecting without passing through Disconnected.
    ConnectionState(MediaConnectionState),
}

/// Configuration for the media session.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// STUN/TURN server URLs.
    pub ice_servers: Vec<String>,
    /// Window for the connection to establish before the call fails.
    pub setup_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }
}

/// One peer media session.
///
/// Built with [`MediaSession::new`], which also hands back the media event
/// feed and the inbound audio frame feed (raw PCMU payloads, one per RTP
/// packet, in arrival order).
pub struct MediaSession {
    pc: Arc<RTCPeerConnection>,
    outbound_track: Arc<TrackLocalStaticSample>,
    state: Arc<Mutex<MediaSessionState>>,
    connected: Arc<AtomicBool>,
    connected_watch: watch::Receiver<bool>,
    setup_timeout: Duration,
    seen_candidates: Mutex<HashSet<String>>,
    outbound_dropped: Arc<AtomicU64>,
    inbound_dropped: Arc<AtomicU64>,
}

impl MediaSession {
    /// Build the peer connection and its PCMU send track.
    ///
    /// Returns `(session, events, inbound_frames)`.
    pub async fn new(
        config: MediaConfig,
    ) -> Result<(Self, mpsc::Receiver<MediaEvent>, mpsc::Receiver<Bytes>), MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| MediaError::Peer(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| MediaError::Peer(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| MediaError::Peer(e.to_string()))?,
        );

        // Outbound telephony audio: G.711 μ-law at 8 kHz mono.
        let outbound_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: 8000,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "voicebridge".to_owned(),
        ));
        pc.add_track(Arc::clone(&outbound_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MediaError::Peer(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel::<MediaEvent>(EVENT_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(FRAME_CAPACITY);

        let connected = Arc::new(AtomicBool::new(false));
        let (watch_tx, watch_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(MediaSessionState::New));
        let inbound_dropped = Arc::new(AtomicU64::new(0));

        // Local ICE candidates -> event feed, for the supervisor to forward
        // over signaling.
        let ice_tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ice_tx = ice_tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(json) => {
                            let _ = ice_tx
                                .send(MediaEvent::LocalIceCandidate(json.candidate))
                                .await;
                        }
                        Err(e) => warn!("failed to serialize local ICE candidate: {e}"),
                    }
                }
            })
        }));

        // Connection state transitions -> event feed + readiness signals.
        let state_tx = event_tx.clone();
        let connected_flag = connected.clone();
        let handshake_state = state.clone();
        pc.on_peer_connection_state_change(Box::new(move |pc_state: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            let connected_flag = connected_flag.clone();
            let handshake_state = handshake_state.clone();
            let watch_tx = watch_tx.clone();
            Box::pin(async move {
                info!("peer connection state: {pc_state}");
                let mapped = match pc_state {
                    RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => {
                        MediaConnectionState::Connecting
                    }
                    RTCPeerConnectionState::Connected => MediaConnectionState::Connected,
                    _ => MediaConnectionState::Disconnected,
                };
                match mapped {
                    MediaConnectionState::Connected => {
                        connected_flag.store(true, Ordering::SeqCst);
                        let mut guard = handshake_state.lock();
                        if *guard != MediaSessionState::Closed {
                            *guard = MediaSessionState::Connected;
                        }
                        let _ = watch_tx.send(true);
                    }
                    MediaConnectionState::Disconnected => {
                        connected_flag.store(false, Ordering::SeqCst);
                        let _ = watch_tx.send(false);
                    }
                    MediaConnectionState::Connecting => {}
                }
                let _ = state_tx.send(MediaEvent::ConnectionState(mapped)).await;
            })
        }));

        // Remote track -> inbound frame feed. Raw PCMU payloads, arrival
        // order. Delivery is non-blocking: a full buffer drops the frame
        // (counted) instead of stalling the RTP read loop.
        let track_frame_tx = frame_tx.clone();
        let track_dropped = inbound_dropped.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let frame_tx = track_frame_tx.clone();
            let dropped = track_dropped.clone();
            Box::pin(async move {
                info!(
                    codec = track.codec().capability.mime_type,
                    "remote audio track started"
                );
                loop {
                    match track.read_rtp().await {
                        Ok((packet, _attributes)) => {
                            if packet.payload.is_empty() {
                                continue;
                            }
                            if frame_tx.try_send(packet.payload).is_err() {
                                dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(e) => {
                            debug!("remote track ended: {e}");
                            break;
                        }
                    }
                }
            })
        }));

        Ok((
            Self {
                pc,
                outbound_track,
                state,
                connected,
                connected_watch: watch_rx,
                setup_timeout: config.setup_timeout,
                seen_candidates: Mutex::new(HashSet::new()),
                outbound_dropped: Arc::new(AtomicU64::new(0)),
                inbound_dropped,
            },
            event_rx,
            frame_rx,
        ))
    }

    // -------------------------------------------------------------------------
    // SDP handshake
    // -------------------------------------------------------------------------

    /// Generate a local offer and arm ICE gathering. `New → OfferSent`.
    pub async fn create_offer(&self) -> Result<String, MediaError> {
        self.require_state(MediaSessionState::New, "create_offer")?;

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| MediaError::Peer(e.to_string()))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| MediaError::Peer(e.to_string()))?;

        *self.state.lock() = MediaSessionState::OfferSent;
        Ok(sdp)
    }

    /// Accept a remote offer and produce the local answer.
    /// `New → OfferReceived → AnswerSent`.
    pub async fn apply_remote_offer(&self, sdp: String) -> Result<String, MediaError> {
        self.require_state(MediaSessionState::New, "apply_remote_offer")?;
        *self.state.lock() = MediaSessionState::OfferReceived;

        let offer =
            RTCSessionDescription::offer(sdp).map_err(|e| MediaError::Peer(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| MediaError::Peer(e.to_string()))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| MediaError::Peer(e.to_string()))?;
        let answer_sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| MediaError::Peer(e.to_string()))?;

        *self.state.lock() = MediaSessionState::AnswerSent;
        Ok(answer_sdp)
    }

    /// Accept the remote answer to our offer. `OfferSent → AnswerReceived`.
    pub async fn apply_remote_answer(&self, sdp: String) -> Result<(), MediaError> {
        self.require_state(MediaSessionState::OfferSent, "apply_remote_answer")?;

        let answer =
            RTCSessionDescription::answer(sdp).map_err(|e| MediaError::Peer(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| MediaError::Peer(e.to_string()))?;

        *self.state.lock() = MediaSessionState::AnswerReceived;
        Ok(())
    }

    /// Deliver a remote ICE candidate.
    ///
    /// Candidates dedupe by candidate string; duplicates are ignored.
    /// A candidate the stack rejects is logged and dropped - one bad
    /// candidate is not fatal to the call.
    pub async fn add_remote_ice_candidate(&self, candidate: String) {
        if !self.seen_candidates.lock().insert(candidate.clone()) {
            debug!("ignoring duplicate ICE candidate");
            return;
        }

        let init = RTCIceCandidateInit {
            candidate: candidate.clone(),
            ..Default::default()
        };
        if let Err(e) = self.pc.add_ice_candidate(init).await {
            warn!("dropping rejected ICE candidate: {e}");
        }
    }

    /// Wait for the transport to reach `Connected`, failing with
    /// [`MediaError::SetupTimeout`] after the configured window.
    pub async fn wait_connected(&self) -> Result<(), MediaError> {
        let mut watch = self.connected_watch.clone();
        let wait = async {
            while !*watch.borrow() {
                if watch.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::time::timeout(self.setup_timeout, wait)
            .await
            .map_err(|_| MediaError::SetupTimeout(self.setup_timeout))?;

        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MediaError::SetupTimeout(self.setup_timeout))
        }
    }

    // -------------------------------------------------------------------------
    // Audio
    // -------------------------------------------------------------------------

    /// Queue one outbound μ-law frame onto the send track.
    ///
    /// Silently dropped (and counted) while the transport is not connected:
    /// the caller hears silence rather than the call failing.
    pub async fn send_audio_frame(&self, mulaw: Bytes) -> Result<(), MediaError> {
        if !self.connected.load(Ordering::SeqCst) {
            self.outbound_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let duration = Duration::from_millis((mulaw.len() / SAMPLES_PER_MS).max(1) as u64);
        self.outbound_track
            .write_sample(&Sample {
                data: mulaw,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| MediaError::Peer(e.to_string()))
    }

    // -------------------------------------------------------------------------
    // State / teardown
    // -------------------------------------------------------------------------

    /// Current handshake state.
    pub fn state(&self) -> MediaSessionState {
        *self.state.lock()
    }

    /// Whether the transport is currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Outbound frames dropped while not connected.
    pub fn outbound_dropped(&self) -> u64 {
        self.outbound_dropped.load(Ordering::Relaxed)
    }

    /// Inbound frames dropped to keep the RTP read loop from blocking.
    pub fn inbound_dropped(&self) -> u64 {
        self.inbound_dropped.load(Ordering::Relaxed)
    }

    /// Close the peer connection. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == MediaSessionState::Closed {
                debug!("media session already closed");
                return;
            }
            *state = MediaSessionState::Closed;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.pc.close().await {
            warn!("error closing peer connection: {e}");
        }
        info!("media session closed");
    }

    fn require_state(
        &self,
        expected: MediaSessionState,
        operation: &'static str,
    ) -> Result<(), MediaError> {
        let state = *self.state.lock();
        if state != expected {
            return Err(MediaError::InvalidState { state, operation });
        }
        Ok(())
    }
}
