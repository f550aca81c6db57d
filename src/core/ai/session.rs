//! Speech-AI session: control sequence plus typed event dispatch.
//!
//! One [`AiSession`] owns one logical stream to the service. Control calls
//! must follow the fixed order enforced by [`AiSessionState`]; inbound
//! events are dispatched to registered handlers on a dedicated task, one
//! event at a time, preserving service order.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::error::AiError;
use super::messages::{
    AiEventKind, ClientEvent, ContentRole, ContentType, ErrorSeverity, ServerEvent,
};
use super::state::{AiSessionState, ControlCall};
use super::transport::{AiTransport, WsTransport};

/// Content block name used for the system-instruction exchange.
const SYSTEM_CONTENT_NAME: &str = "system-prompt";

/// Content block name used for streamed caller audio.
const AUDIO_CONTENT_NAME: &str = "audio-input";

/// Callback invoked for inbound server events.
///
/// An `Arc`'d closure returning a boxed future, so handlers can hold
/// channel senders and await sends.
pub type AiEventCallback =
    Arc<dyn Fn(ServerEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Per-tag and wildcard handler registry.
///
/// Multiple handlers per tag are supported and run in registration order;
/// wildcard handlers see every event.
#[derive(Default)]
struct HandlerRegistry {
    by_tag: RwLock<HashMap<AiEventKind, Vec<AiEventCallback>>>,
    wildcard: RwLock<Vec<AiEventCallback>>,
}

impl HandlerRegistry {
    async fn dispatch(&self, event: ServerEvent) {
        // Clone handler lists out of the sync locks before awaiting.
        let tagged: Vec<AiEventCallback> = self
            .by_tag
            .read()
            .get(&event.kind())
            .map(|v| v.to_vec())
            .unwrap_or_default();
        let wildcard: Vec<AiEventCallback> = self.wildcard.read().to_vec();

        for handler in tagged {
            handler(event.clone()).await;
        }
        for handler in wildcard {
            handler(event.clone()).await;
        }
    }
}

/// One bidirectional event-stream session to the speech-AI service.
pub struct AiSession {
    transport: Arc<dyn AiTransport>,
    state: Arc<Mutex<AiSessionState>>,
    session_id: String,
    prompt_name: String,
    handlers: Arc<HandlerRegistry>,
    dispatch_task: Option<JoinHandle<()>>,
}

impl AiSession {
    /// Build a session over an already-established transport and its inbound
    /// event feed. The dispatch task starts immediately.
    pub fn new(transport: Arc<dyn AiTransport>, events: mpsc::Receiver<ServerEvent>) -> Self {
        let state = Arc::new(Mutex::new(AiSessionState::default()));
        let handlers = Arc::new(HandlerRegistry::default());

        let dispatch_task = Some(Self::spawn_dispatch(events, state.clone(), handlers.clone()));

        Self {
            transport,
            state,
            session_id: String::new(),
            prompt_name: format!("prompt-{}", uuid::Uuid::new_v4()),
            handlers,
            dispatch_task,
        }
    }

    /// Connect the production WebSocket transport and build a session on it.
    pub async fn connect(endpoint: &str) -> Result<Self, AiError> {
        let (transport, events) = WsTransport::connect(endpoint).await?;
        Ok(Self::new(Arc::new(transport), events))
    }

    fn spawn_dispatch(
        mut events: mpsc::Receiver<ServerEvent>,
        state: Arc<Mutex<AiSessionState>>,
        handlers: Arc<HandlerRegistry>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let ServerEvent::Error { message, severity } = &event {
                    match severity {
                        ErrorSeverity::Transient => {
                            warn!("transient AI service error: {message}");
                        }
                        ErrorSeverity::Fatal => {
                            error!("fatal AI service error: {message}");
                            *state.lock() = AiSessionState::Failed;
                        }
                    }
                }
                handlers.dispatch(event).await;
            }
            debug!("AI event feed ended");
        })
    }

    // -------------------------------------------------------------------------
    // Handler registration
    // -------------------------------------------------------------------------

    /// Register a handler for one event tag. Handlers for the same tag run
    /// in registration order.
    pub fn on_event(&self, kind: AiEventKind, callback: AiEventCallback) {
        self.handlers
            .by_tag
            .write()
            .entry(kind)
            .or_default()
            .push(callback);
    }

    /// Register a wildcard handler observing every inbound event.
    pub fn on_any(&self, callback: AiEventCallback) {
        self.handlers.wildcard.write().push(callback);
    }

    // -------------------------------------------------------------------------
    // Control sequence
    // -------------------------------------------------------------------------

    /// Step 1: open the logical session.
    pub async fn start(&mut self, session_id: &str) -> Result<(), AiError> {
        self.advance(ControlCall::Start)?;
        self.session_id = session_id.to_string();
        self.send(ClientEvent::SessionStart {
            session_id: session_id.to_string(),
        })
        .await
    }

    /// Step 2: declare the prompt context.
    pub async fn begin_prompt(&self) -> Result<(), AiError> {
        self.advance(ControlCall::BeginPrompt)?;
        self.send(ClientEvent::PromptStart {
            prompt_name: self.prompt_name.clone(),
        })
        .await
    }

    /// Step 3: the three-part system-instruction exchange (content start,
    /// text, content end).
    pub async fn deliver_system_instructions(&self, text: &str) -> Result<(), AiError> {
        self.advance(ControlCall::DeliverSystemInstructions)?;
        self.send(ClientEvent::ContentStart {
            prompt_name: self.prompt_name.clone(),
            content_name: SYSTEM_CONTENT_NAME.to_string(),
            content_type: ContentType::Text,
            role: ContentRole::System,
        })
        .await?;
        self.send(ClientEvent::TextInput {
            prompt_name: self.prompt_name.clone(),
            content_name: SYSTEM_CONTENT_NAME.to_string(),
            content: text.to_string(),
        })
        .await?;
        self.send(ClientEvent::ContentEnd {
            prompt_name: self.prompt_name.clone(),
            content_name: SYSTEM_CONTENT_NAME.to_string(),
        })
        .await
    }

    /// Step 4: open the audio content block. Only after this may
    /// [`AiSession::stream_audio`] be called.
    pub async fn open_audio_content(&self) -> Result<(), AiError> {
        self.advance(ControlCall::OpenAudioContent)?;
        self.send(ClientEvent::ContentStart {
            prompt_name: self.prompt_name.clone(),
            content_name: AUDIO_CONTENT_NAME.to_string(),
            content_type: ContentType::Audio,
            role: ContentRole::User,
        })
        .await
    }

    /// Step 5: stream one transport frame (base64 PCM16) of caller audio.
    /// Call order defines temporal order.
    pub async fn stream_audio(&self, transport_frame: &str) -> Result<(), AiError> {
        self.advance(ControlCall::StreamAudio)?;
        self.send(ClientEvent::AudioInput {
            prompt_name: self.prompt_name.clone(),
            content_name: AUDIO_CONTENT_NAME.to_string(),
            content: transport_frame.to_string(),
        })
        .await
    }

    /// Teardown step: close the audio content block.
    pub async fn close_audio_content(&self) -> Result<(), AiError> {
        self.advance(ControlCall::CloseAudioContent)?;
        self.send(ClientEvent::ContentEnd {
            prompt_name: self.prompt_name.clone(),
            content_name: AUDIO_CONTENT_NAME.to_string(),
        })
        .await
    }

    /// Teardown step: close the prompt context.
    pub async fn close_prompt(&self) -> Result<(), AiError> {
        self.advance(ControlCall::ClosePrompt)?;
        self.send(ClientEvent::PromptEnd {
            prompt_name: self.prompt_name.clone(),
        })
        .await
    }

    /// Final teardown step: close the logical session and the transport.
    ///
    /// Calling `close` on an already-closed session is a logged no-op, so
    /// concurrent cleanup paths can both run it safely.
    pub async fn close(&self) -> Result<(), AiError> {
        let advanced = {
            let mut state = self.state.lock();
            if *state == AiSessionState::SessionClosed {
                debug!("AI session already closed, ignoring duplicate close");
                return Ok(());
            }
            match state.advance(ControlCall::Close) {
                Ok(next) => {
                    *state = next;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        // Drop the transport even when the session is in a state (e.g.
        // Failed) where the orderly sessionEnd is not permitted.
        let result = match advanced {
            Ok(()) => self.send_raw(ClientEvent::SessionEnd {}).await,
            Err(e) => Err(e.into()),
        };
        self.transport.close().await;
        result
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> AiSessionState {
        *self.state.lock()
    }

    /// Prompt context identifier for this session.
    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    /// Whether streaming audio is currently permitted.
    pub fn is_streaming(&self) -> bool {
        *self.state.lock() == AiSessionState::AudioContentOpen
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Validate and commit a state transition.
    fn advance(&self, call: ControlCall) -> Result<(), AiError> {
        let mut state = self.state.lock();
        *state = state.advance(call)?;
        Ok(())
    }

    /// Send through the transport; a transport failure is fatal to the
    /// session.
    async fn send(&self, event: ClientEvent) -> Result<(), AiError> {
        if let Err(e) = self.transport.send(event).await {
            *self.state.lock() = AiSessionState::Failed;
            return Err(e);
        }
        Ok(())
    }

    /// Send without failing the state machine; used during teardown where
    /// best-effort is fine.
    async fn send_raw(&self, event: ClientEvent) -> Result<(), AiError> {
        self.transport.send(event).await
    }
}

impl Drop for AiSession {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::super::transport::ChannelTransport;
    use super::*;

    fn session_with_harness() -> (
        AiSession,
        mpsc::Receiver<ClientEvent>,
        mpsc::Sender<ServerEvent>,
    ) {
        let (transport, events, sent, server) = ChannelTransport::pair();
        (AiSession::new(Arc::new(transport), events), sent, server)
    }

    #[tokio::test]
    async fn test_stream_audio_before_open_is_sequence_error() {
        let (session, _sent, _server) = session_with_harness();
        let err = session.stream_audio("AAAA").await.unwrap_err();
        assert!(matches!(err, AiError::Sequence(_)));
        // A sequence error is fail-fast but does not corrupt state tracking.
        assert_eq!(session.state(), AiSessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_full_control_sequence_emits_expected_events() {
        let (mut session, mut sent, _server) = session_with_harness();

        session.start("call-1").await.unwrap();
        session.begin_prompt().await.unwrap();
        session.deliver_system_instructions("be brief").await.unwrap();
        session.open_audio_content().await.unwrap();
        session.stream_audio("UENN").await.unwrap();
        session.close_audio_content().await.unwrap();
        session.close_prompt().await.unwrap();
        session.close().await.unwrap();

        let mut tags = Vec::new();
        while let Ok(event) = sent.try_recv() {
            tags.push(match event {
                ClientEvent::SessionStart { .. } => "sessionStart",
                ClientEvent::PromptStart { .. } => "promptStart",
                ClientEvent::ContentStart { .. } => "contentStart",
                ClientEvent::TextInput { .. } => "textInput",
                ClientEvent::AudioInput { .. } => "audioInput",
                ClientEvent::ContentEnd { .. } => "contentEnd",
                ClientEvent::PromptEnd { .. } => "promptEnd",
                ClientEvent::SessionEnd {} => "sessionEnd",
            });
        }
        assert_eq!(
            tags,
            vec![
                "sessionStart",
                "promptStart",
                "contentStart",
                "textInput",
                "contentEnd",
                "contentStart",
                "audioInput",
                "contentEnd",
                "promptEnd",
                "sessionEnd",
            ]
        );
        assert_eq!(session.state(), AiSessionState::SessionClosed);
    }

    #[tokio::test]
    async fn test_double_close_is_noop() {
        let (mut session, _sent, _server) = session_with_harness();
        session.start("call-1").await.unwrap();
        session.begin_prompt().await.unwrap();
        session.deliver_system_instructions("x").await.unwrap();
        session.open_audio_content().await.unwrap();
        session.close_audio_content().await.unwrap();
        session.close_prompt().await.unwrap();

        session.close().await.unwrap();
        // Second close must not raise.
        session.close().await.unwrap();
        assert_eq!(session.state(), AiSessionState::SessionClosed);
    }

    #[tokio::test]
    async fn test_wildcard_observes_events_in_order() {
        let (session, _sent, server) = session_with_harness();

        let (seen_tx, mut seen_rx) = mpsc::channel::<AiEventKind>(16);
        session.on_any(Arc::new(move |event| {
            let seen = seen_tx.clone();
            Box::pin(async move {
                let _ = seen.send(event.kind()).await;
            })
        }));

        for event in [
            ServerEvent::ContentStart {
                content_name: None,
                content_type: None,
            },
            ServerEvent::TextOutput {
                content: "hello".to_string(),
                role: None,
            },
            ServerEvent::AudioOutput {
                content: "AAAA".to_string(),
            },
            ServerEvent::ContentEnd { content_name: None },
        ] {
            server.send(event).await.unwrap();
        }

        let mut observed = Vec::new();
        for _ in 0..4 {
            observed.push(seen_rx.recv().await.unwrap());
        }
        assert_eq!(
            observed,
            vec![
                AiEventKind::ContentStart,
                AiEventKind::TextOutput,
                AiEventKind::AudioOutput,
                AiEventKind::ContentEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_tag_handlers_run_in_registration_order_and_wildcard_still_fires() {
        let (session, _sent, server) = session_with_harness();

        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let order_a = order.clone();
        session.on_event(
            AiEventKind::TextOutput,
            Arc::new(move |_| {
                let order = order_a.clone();
                Box::pin(async move {
                    order.lock().push("first");
                })
            }),
        );
        let order_b = order.clone();
        session.on_event(
            AiEventKind::TextOutput,
            Arc::new(move |_| {
                let order = order_b.clone();
                Box::pin(async move {
                    order.lock().push("second");
                })
            }),
        );
        let wild_count = counter.clone();
        session.on_any(Arc::new(move |_| {
            let count = wild_count.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        }));

        server
            .send(ServerEvent::TextOutput {
                content: "hi".to_string(),
                role: None,
            })
            .await
            .unwrap();

        // Let the dispatch task drain.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(*order.lock(), vec!["first", "second"]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_service_error_fails_session() {
        let (mut session, _sent, server) = session_with_harness();
        session.start("call-1").await.unwrap();

        server
            .send(ServerEvent::Error {
                message: "model unavailable".to_string(),
                severity: ErrorSeverity::Fatal,
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(session.state(), AiSessionState::Failed);
        // No further control calls are permitted.
        assert!(session.begin_prompt().await.is_err());
    }

    #[tokio::test]
    async fn test_transient_service_error_keeps_session_alive() {
        let (mut session, _sent, server) = session_with_harness();
        session.start("call-1").await.unwrap();

        server
            .send(ServerEvent::Error {
                message: "throttled".to_string(),
                severity: ErrorSeverity::Transient,
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(session.state(), AiSessionState::SessionStarted);
        session.begin_prompt().await.unwrap();
    }
}
