//! Session supervisor: the bridge engine for one call.
//!
//! Owns the AI session and the two audio directions: inbound μ-law frames
//! are transcoded, batched and streamed to the AI; AI audio output is
//! transcoded back to μ-law and handed to the outbound sink. The supervisor
//! also runs barge-in detection, the idle timer, and the ordered,
//! exactly-once cleanup that every termination path funnels through.
//!
//! The engine is transport-agnostic on both sides: the inbound feed is any
//! `mpsc::Receiver<Bytes>` (live media or a synthetic source) and the
//! outbound sink any `mpsc::Sender<Bytes>`, so the full pipeline runs in
//! tests without a network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::ai::{AiError, AiEventKind, AiSession, ServerEvent};
use crate::core::codec;
use crate::core::interruption::{DEFAULT_INTERRUPTION_THRESHOLD, InterruptionDetector};
use crate::core::media::MediaError;
use crate::core::signaling::SignalingError;
use crate::session::{CallSession, LegState};

/// Default number of inbound frames accumulated per AI audio event.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Default idle window: no AI response for this long ends the call.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that end a bridged call abnormally.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Ai(#[from] AiError),

    /// The AI service reported a fatal condition mid-call.
    #[error("AI stream failed: {0}")]
    StreamFailed(String),
}

/// Supervisor lifecycle. Monotonic; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SupervisorState {
    Initializing,
    SignalingUp,
    AiReady,
    Bridging,
    Draining,
    Closed,
}

impl SupervisorState {
    /// Lowercase phase name, as surfaced in session diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorState::Initializing => "initializing",
            SupervisorState::SignalingUp => "signaling_up",
            SupervisorState::AiReady => "ai_ready",
            SupervisorState::Bridging => "bridging",
            SupervisorState::Draining => "draining",
            SupervisorState::Closed => "closed",
        }
    }
}

/// Tunables for one bridged call.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// System instructions delivered before any caller audio.
    pub system_instructions: String,
    /// Inbound frames accumulated per AI audio event.
    pub batch_size: usize,
    /// No-AI-response window after which the call is ended.
    pub idle_timeout: Duration,
    /// Barge-in gap threshold.
    pub interruption_threshold: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            system_instructions: "You are a helpful voice assistant. Keep responses brief."
                .to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            interruption_threshold: DEFAULT_INTERRUPTION_THRESHOLD,
        }
    }
}

/// Internal signals produced by the AI event handlers for the bridge loop.
enum BridgeSignal {
    /// Decoded PCM16 from an audioOutput event.
    AiAudio(Vec<u8>),
    /// Text output to capture in the session log.
    AiText { role: String, content: String },
    /// The model opened an output content block.
    AgentSpeechStart,
    /// The model closed its output content block.
    AgentSpeechEnd,
    /// Fatal service error; proceed to cleanup.
    Fatal(String),
    /// The stream ended normally.
    StreamComplete,
}

/// Drives one bridged call from AI startup through cleanup.
pub struct SessionSupervisor {
    session: Arc<CallSession>,
    ai: AiSession,
    inbound: mpsc::Receiver<Bytes>,
    outbound: mpsc::Sender<Bytes>,
    config: SupervisorConfig,
    state: Arc<Mutex<SupervisorState>>,
    cancel: CancellationToken,
    cleaned: AtomicBool,
    detector: InterruptionDetector,
    /// Accumulated PCM16 for the current batch.
    batch_pcm: Vec<u8>,
    batch_frames: usize,
}

impl SessionSupervisor {
    /// Build a supervisor over an AI session and the two audio channels.
    pub fn new(
        session: Arc<CallSession>,
        ai: AiSession,
        inbound: mpsc::Receiver<Bytes>,
        outbound: mpsc::Sender<Bytes>,
        config: SupervisorConfig,
    ) -> Self {
        let detector = InterruptionDetector::new(config.interruption_threshold);
        Self {
            session,
            ai,
            inbound,
            outbound,
            config,
            state: Arc::new(Mutex::new(SupervisorState::Initializing)),
            cancel: CancellationToken::new(),
            cleaned: AtomicBool::new(false),
            detector,
            batch_pcm: Vec::new(),
            batch_frames: 0,
        }
    }

    /// Token that ends the call when cancelled (operator stop, signal
    /// handler, peer hangup).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared view of the supervisor state for diagnostics.
    pub fn state_handle(&self) -> Arc<Mutex<SupervisorState>> {
        self.state.clone()
    }

    /// Mark the signaling leg established. Called by the launcher once the
    /// relay handshake is done, before `run`.
    pub fn mark_signaling_up(&self) {
        self.set_state(SupervisorState::SignalingUp);
        self.session.set_signaling(LegState::Connected);
        self.session.record_activity("signaling_up", "relay handshake complete");
    }

    /// Run the call to completion. Consumes the supervisor; cleanup runs on
    /// every exit path, exactly once.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        let result = self.bridge().await;
        self.cleanup().await;
        if let Err(e) = &result {
            error!(session_id = %self.session.session_id(), "call ended with error: {e}");
        }
        result
    }

    async fn bridge(&mut self) -> Result<(), BridgeError> {
        self.start_ai().await?;

        let (signal_tx, mut signal_rx) = mpsc::channel::<BridgeSignal>(256);
        self.register_ai_handlers(&signal_tx);

        self.set_state(SupervisorState::Bridging);
        self.session.record_activity("bridging", "audio flowing both directions");

        let mut idle_deadline = tokio::time::Instant::now() + self.config.idle_timeout;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(session_id = %self.session.session_id(), "call cancelled");
                    self.session.record_activity("cancelled", "stop requested");
                    return Ok(());
                }

                _ = tokio::time::sleep_until(idle_deadline) => {
                    info!(
                        session_id = %self.session.session_id(),
                        timeout = ?self.config.idle_timeout,
                        "idle timeout, ending call"
                    );
                    self.session.record_activity(
                        "idle_timeout",
                        format!("no AI response within {:?}", self.config.idle_timeout),
                    );
                    return Ok(());
                }

                frame = self.inbound.recv() => {
                    match frame {
                        Some(frame) => self.handle_inbound_frame(&frame).await?,
                        None => {
                            debug!("inbound audio feed ended");
                            self.session.record_activity("inbound_ended", "media feed closed");
                            self.flush_batch().await?;
                            return Ok(());
                        }
                    }
                }

                signal = signal_rx.recv() => {
                    let Some(signal) = signal else {
                        return Ok(());
                    };
                    match signal {
                        BridgeSignal::AiAudio(pcm) => {
                            idle_deadline =
                                tokio::time::Instant::now() + self.config.idle_timeout;
                            self.session.note_ai_response();
                            let mulaw = match codec::encode_mulaw(&pcm) {
                                Ok(mulaw) => mulaw,
                                Err(e) => {
                                    warn!("dropping unencodable AI audio chunk: {e}");
                                    continue;
                                }
                            };
                            if self.outbound.send(Bytes::from(mulaw)).await.is_err() {
                                debug!("outbound sink closed, ending call");
                                self.session.record_activity(
                                    "outbound_closed",
                                    "media sink dropped",
                                );
                                return Ok(());
                            }
                            self.session.count_outbound_frame();
                        }
                        BridgeSignal::AiText { role, content } => {
                            idle_deadline =
                                tokio::time::Instant::now() + self.config.idle_timeout;
                            self.session.record_ai_response(&role, &content);
                        }
                        BridgeSignal::AgentSpeechStart => {
                            self.detector.on_content_start(Instant::now());
                        }
                        BridgeSignal::AgentSpeechEnd => {
                            self.detector.on_content_end();
                        }
                        BridgeSignal::Fatal(message) => {
                            self.session.record_activity("ai_fatal", message.clone());
                            return Err(BridgeError::StreamFailed(message));
                        }
                        BridgeSignal::StreamComplete => {
                            info!(session_id = %self.session.session_id(), "AI stream complete");
                            self.session.record_activity("stream_complete", "");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// The four-step AI startup sequence, in order, before any audio moves.
    async fn start_ai(&mut self) -> Result<(), BridgeError> {
        let session_id = self.session.session_id().to_string();
        self.ai.start(&session_id).await?;
        self.ai.begin_prompt().await?;
        let instructions = self.config.system_instructions.clone();
        self.ai.deliver_system_instructions(&instructions).await?;
        self.ai.open_audio_content().await?;

        self.set_state(SupervisorState::AiReady);
        self.session.set_ai(LegState::Connected);
        self.session.record_activity("ai_ready", "control sequence complete");
        Ok(())
    }

    fn register_ai_handlers(&self, signal_tx: &mpsc::Sender<BridgeSignal>) {
        let audio_tx = signal_tx.clone();
        self.ai.on_event(
            AiEventKind::AudioOutput,
            Arc::new(move |event| {
                let tx = audio_tx.clone();
                Box::pin(async move {
                    if let ServerEvent::AudioOutput { content } = event {
                        match codec::from_transport_frame(&content) {
                            Ok(pcm) => {
                                let _ = tx.send(BridgeSignal::AiAudio(pcm)).await;
                            }
                            Err(e) => warn!("dropping malformed AI audio frame: {e}"),
                        }
                    }
                })
            }),
        );

        let text_tx = signal_tx.clone();
        self.ai.on_event(
            AiEventKind::TextOutput,
            Arc::new(move |event| {
                let tx = text_tx.clone();
                Box::pin(async move {
                    if let ServerEvent::TextOutput { content, role } = event {
                        let role = role
                            .map(|r| format!("{r:?}").to_lowercase())
                            .unwrap_or_else(|| "assistant".to_string());
                        let _ = tx.send(BridgeSignal::AiText { role, content }).await;
                    }
                })
            }),
        );

        let start_tx = signal_tx.clone();
        self.ai.on_event(
            AiEventKind::ContentStart,
            Arc::new(move |_| {
                let tx = start_tx.clone();
                Box::pin(async move {
                    let _ = tx.send(BridgeSignal::AgentSpeechStart).await;
                })
            }),
        );

        let end_tx = signal_tx.clone();
        self.ai.on_event(
            AiEventKind::ContentEnd,
            Arc::new(move |_| {
                let tx = end_tx.clone();
                Box::pin(async move {
                    let _ = tx.send(BridgeSignal::AgentSpeechEnd).await;
                })
            }),
        );

        let error_tx = signal_tx.clone();
        self.ai.on_event(
            AiEventKind::Error,
            Arc::new(move |event| {
                let tx = error_tx.clone();
                Box::pin(async move {
                    if let ServerEvent::Error { message, severity } = event {
                        match severity {
                            crate::core::ai::ErrorSeverity::Fatal => {
                                let _ = tx.send(BridgeSignal::Fatal(message)).await;
                            }
                            crate::core::ai::ErrorSeverity::Transient => {
                                warn!("transient AI error during call: {message}");
                            }
                        }
                    }
                })
            }),
        );

        let complete_tx = signal_tx.clone();
        self.ai.on_event(
            AiEventKind::StreamComplete,
            Arc::new(move |_| {
                let tx = complete_tx.clone();
                Box::pin(async move {
                    let _ = tx.send(BridgeSignal::StreamComplete).await;
                })
            }),
        );
    }

    /// One inbound μ-law frame: barge-in check, transcode, batch, maybe
    /// flush. A frame that fails transcoding is dropped with a warning;
    /// one bad frame never ends the call.
    async fn handle_inbound_frame(&mut self, mulaw: &[u8]) -> Result<(), BridgeError> {
        self.session.count_inbound_frame();

        if let Some(interruption) = self.detector.on_inbound_audio(Instant::now()) {
            info!(
                session_id = %self.session.session_id(),
                gap_ms = interruption.gap.as_millis() as u64,
                "caller barge-in detected"
            );
            self.session.count_interruption();
            self.session.record_activity(
                "interruption",
                format!("caller audio {}ms after agent speech start", interruption.gap.as_millis()),
            );
        }

        let pcm = match codec::decode_mulaw(mulaw) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("dropping malformed inbound frame: {e}");
                return Ok(());
            }
        };
        self.batch_pcm.extend_from_slice(&pcm);
        self.batch_frames += 1;

        if self.batch_frames >= self.config.batch_size {
            self.flush_batch().await?;
        }
        Ok(())
    }

    /// Send the accumulated batch as one audio event. No-op when empty; a
    /// batch that fails encoding is dropped, not fatal.
    async fn flush_batch(&mut self) -> Result<(), BridgeError> {
        if self.batch_frames == 0 {
            return Ok(());
        }
        let encoded = codec::to_transport_frame(&self.batch_pcm);
        self.batch_pcm.clear();
        self.batch_frames = 0;
        match encoded {
            Ok(frame) => self.ai.stream_audio(&frame).await?,
            Err(e) => warn!("dropping unencodable audio batch: {e}"),
        }
        Ok(())
    }

    /// Ordered teardown. Runs exactly once no matter how many termination
    /// paths race into it; later entries are no-ops.
    async fn cleanup(&mut self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            debug!("cleanup already performed");
            return;
        }

        self.set_state(SupervisorState::Draining);
        self.session.record_activity("cleanup_started", "");

        // Stop accepting caller audio first so nothing lands mid-teardown.
        self.inbound.close();

        // AI teardown in protocol order. Each step is best-effort: a step
        // that fails (e.g. the session already moved to Failed) is logged
        // and the remaining steps still run.
        if let Err(e) = self.ai.close_audio_content().await {
            debug!("close_audio_content during cleanup: {e}");
        }
        if let Err(e) = self.ai.close_prompt().await {
            debug!("close_prompt during cleanup: {e}");
        }
        if let Err(e) = self.ai.close().await {
            debug!("close during cleanup: {e}");
        }
        self.session.set_ai(LegState::Disconnected);

        // Release anything still waiting on the call.
        self.cancel.cancel();

        self.set_state(SupervisorState::Closed);
        let summary = self.session.summary();
        let duration_ms = crate::session::epoch_ms().saturating_sub(summary.created_at_ms);
        self.session.record_activity(
            "cleanup_complete",
            format!(
                "duration_ms={duration_ms} inbound_frames={} outbound_frames={} interruptions={}",
                summary.inbound_frames, summary.outbound_frames, summary.interruptions
            ),
        );
        info!(session_id = %self.session.session_id(), "call closed");
    }

    fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.lock();
        if *state == SupervisorState::Closed {
            return;
        }
        debug!(from = ?*state, to = ?next, "supervisor state change");
        *state = next;
        self.session.set_status(next.as_str());
    }
}
