//! Telephony-side media: the WebRTC peer session and a synthetic source
//! for running the pipeline without a live peer.

mod session;
mod synthetic;

pub use session::{
    DEFAULT_SETUP_TIMEOUT, MediaConfig, MediaConnectionState, MediaError, MediaEvent, MediaSession,
    MediaSessionState,
};
pub use synthetic::{FRAME_DURATION, SyntheticAudioSource, SyntheticSignal};
