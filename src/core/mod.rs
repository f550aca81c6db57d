pub mod ai;
pub mod codec;
pub mod interruption;
pub mod media;
pub mod signaling;

// Re-export commonly used types for convenience
pub use ai::{
    AiError, AiEventKind, AiSession, AiSessionState, AiTransport, ChannelTransport, ClientEvent,
    ContentRole, ContentType, ErrorSeverity, ProtocolSequenceError, ServerEvent, WsTransport,
};

pub use media::{
    MediaConfig, MediaConnectionState, MediaError, MediaEvent, MediaSession, MediaSessionState,
    SyntheticAudioSource, SyntheticSignal,
};

pub use signaling::{SignalingClient, SignalingError, SignalingEvent, SignalingMessage};

pub use interruption::{DEFAULT_INTERRUPTION_THRESHOLD, Interruption, InterruptionDetector};
