//! AI session lifecycle state machine.
//!
//! The backing service enforces its control-event ordering server-side and,
//! on deviation, stalls waiting for an event that never arrives instead of
//! erroring. An explicit transition table turns that silent hang into an
//! immediate [`ProtocolSequenceError`] on the caller's side.

use std::fmt;

use thiserror::Error;

/// Control calls a caller can issue against an AI session, in their required
/// order. `StreamAudio` may repeat while the audio block is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCall {
    Start,
    BeginPrompt,
    DeliverSystemInstructions,
    OpenAudioContent,
    StreamAudio,
    CloseAudioContent,
    ClosePrompt,
    Close,
}

impl fmt::Display for ControlCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlCall::Start => "start",
            ControlCall::BeginPrompt => "begin_prompt",
            ControlCall::DeliverSystemInstructions => "deliver_system_instructions",
            ControlCall::OpenAudioContent => "open_audio_content",
            ControlCall::StreamAudio => "stream_audio",
            ControlCall::CloseAudioContent => "close_audio_content",
            ControlCall::ClosePrompt => "close_prompt",
            ControlCall::Close => "close",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle states of one AI session. Strict forward progression; `Failed`
/// is terminal and reached only through a fatal service/transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiSessionState {
    #[default]
    Uninitialized,
    SessionStarted,
    PromptStarted,
    SystemPromptDelivered,
    AudioContentOpen,
    AudioContentClosed,
    PromptClosed,
    SessionClosed,
    /// Fatal error; no further control calls are permitted.
    Failed,
}

impl fmt::Display for AiSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AiSessionState::Uninitialized => "Uninitialized",
            AiSessionState::SessionStarted => "SessionStarted",
            AiSessionState::PromptStarted => "PromptStarted",
            AiSessionState::SystemPromptDelivered => "SystemPromptDelivered",
            AiSessionState::AudioContentOpen => "AudioContentOpen",
            AiSessionState::AudioContentClosed => "AudioContentClosed",
            AiSessionState::PromptClosed => "PromptClosed",
            AiSessionState::SessionClosed => "SessionClosed",
            AiSessionState::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

/// A control call arrived while the session was in a state that does not
/// accept it. This is a programmer/integration error: fail fast rather than
/// letting the service hang.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("control call `{call}` not permitted in state {state}")]
pub struct ProtocolSequenceError {
    /// State the session was in
    pub state: AiSessionState,
    /// The rejected call
    pub call: ControlCall,
}

impl AiSessionState {
    /// Validate `call` against the current state and return the successor
    /// state.
    ///
    /// `StreamAudio` is the only self-transition. `Close` from
    /// `SessionClosed` is rejected here; the session treats that one case as
    /// a logged no-op instead of an error.
    pub fn advance(self, call: ControlCall) -> Result<AiSessionState, ProtocolSequenceError> {
        use AiSessionState::*;
        use ControlCall::*;

        let next = match (self, call) {
            (Uninitialized, Start) => SessionStarted,
            (SessionStarted, BeginPrompt) => PromptStarted,
            (PromptStarted, DeliverSystemInstructions) => SystemPromptDelivered,
            (SystemPromptDelivered, OpenAudioContent) => AudioContentOpen,
            (AudioContentOpen, StreamAudio) => AudioContentOpen,
            (AudioContentOpen, CloseAudioContent) => AudioContentClosed,
            (AudioContentClosed, ClosePrompt) => PromptClosed,
            (PromptClosed, Close) => SessionClosed,
            (state, call) => return Err(ProtocolSequenceError { state, call }),
        };
        Ok(next)
    }

    /// Whether the session has reached a state where no control calls are
    /// expected anymore.
    pub fn is_terminal(self) -> bool {
        matches!(self, AiSessionState::SessionClosed | AiSessionState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_progression() {
        let mut state = AiSessionState::default();
        for call in [
            ControlCall::Start,
            ControlCall::BeginPrompt,
            ControlCall::DeliverSystemInstructions,
            ControlCall::OpenAudioContent,
            ControlCall::StreamAudio,
            ControlCall::StreamAudio,
            ControlCall::CloseAudioContent,
            ControlCall::ClosePrompt,
            ControlCall::Close,
        ] {
            state = state.advance(call).unwrap();
        }
        assert_eq!(state, AiSessionState::SessionClosed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_stream_audio_before_open_rejected() {
        for state in [
            AiSessionState::Uninitialized,
            AiSessionState::SessionStarted,
            AiSessionState::PromptStarted,
            AiSessionState::SystemPromptDelivered,
        ] {
            let err = state.advance(ControlCall::StreamAudio).unwrap_err();
            assert_eq!(err.state, state);
            assert_eq!(err.call, ControlCall::StreamAudio);
        }
    }

    #[test]
    fn test_skipping_a_step_rejected() {
        // start -> openAudioContent skips the prompt setup
        let state = AiSessionState::Uninitialized
            .advance(ControlCall::Start)
            .unwrap();
        assert!(state.advance(ControlCall::OpenAudioContent).is_err());
        // teardown must not skip close_audio_content
        assert!(
            AiSessionState::AudioContentOpen
                .advance(ControlCall::ClosePrompt)
                .is_err()
        );
    }

    #[test]
    fn test_failed_is_terminal_for_all_calls() {
        for call in [
            ControlCall::Start,
            ControlCall::StreamAudio,
            ControlCall::CloseAudioContent,
            ControlCall::Close,
        ] {
            assert!(AiSessionState::Failed.advance(call).is_err());
        }
        assert!(AiSessionState::Failed.is_terminal());
    }

    #[test]
    fn test_error_message_names_state_and_call() {
        let err = AiSessionState::PromptStarted
            .advance(ControlCall::StreamAudio)
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("stream_audio"));
        assert!(text.contains("PromptStarted"));
    }
}
