//! Speech-AI event-stream message types.
//!
//! The service speaks JSON events over a bidirectional stream. Client events
//! drive a strict control sequence (session, prompt, content blocks); server
//! events carry model output and lifecycle notifications.
//!
//! Client events (sent to the service):
//! - sessionStart - open the logical session
//! - promptStart - declare a prompt context
//! - contentStart / textInput / audioInput / contentEnd - content blocks
//! - promptEnd - close the prompt context
//! - sessionEnd - close the logical session
//!
//! Server events (received): sessionStart, promptStart, contentStart,
//! textOutput, audioOutput, contentEnd, toolUse, toolResult, error,
//! streamComplete.
//!
//! Audio payloads in both directions are base64 transport frames of linear
//! PCM 16-bit little-endian at 8 kHz mono (see [`crate::core::codec`]).

use serde::{Deserialize, Serialize};

/// Content block modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    /// Text instruction or output
    Text,
    /// Streamed audio
    Audio,
}

/// Role attached to a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentRole {
    /// System instructions
    System,
    /// Caller input
    User,
    /// Model output
    Assistant,
}

/// Events sent by the bridge to the speech-AI service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Open the logical session.
    SessionStart {
        /// Bridge-side session identifier
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Declare a new prompt context.
    PromptStart {
        /// Prompt identifier, scopes all content blocks that follow
        #[serde(rename = "promptName")]
        prompt_name: String,
    },

    /// Open a content block within the current prompt.
    ContentStart {
        #[serde(rename = "promptName")]
        prompt_name: String,
        /// Content block identifier
        #[serde(rename = "contentName")]
        content_name: String,
        /// Block modality
        #[serde(rename = "type")]
        content_type: ContentType,
        /// Speaker role for the block
        role: ContentRole,
    },

    /// Text payload for an open TEXT content block.
    TextInput {
        #[serde(rename = "promptName")]
        prompt_name: String,
        #[serde(rename = "contentName")]
        content_name: String,
        /// Instruction or message text
        content: String,
    },

    /// Audio payload (base64 transport frame) for an open AUDIO block.
    AudioInput {
        #[serde(rename = "promptName")]
        prompt_name: String,
        #[serde(rename = "contentName")]
        content_name: String,
        /// Base64-encoded PCM16 LE 8 kHz mono
        content: String,
    },

    /// Close a content block.
    ContentEnd {
        #[serde(rename = "promptName")]
        prompt_name: String,
        #[serde(rename = "contentName")]
        content_name: String,
    },

    /// Close the prompt context.
    PromptEnd {
        #[serde(rename = "promptName")]
        prompt_name: String,
    },

    /// Close the logical session.
    SessionEnd {},
}

/// Severity attached to service `error` events.
///
/// Transient errors are logged and the call continues; fatal errors move the
/// session to its terminal `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Recoverable; the stream keeps going
    Transient,
    /// The session is unusable; proceed to cleanup
    #[default]
    Fatal,
}

/// Events received from the speech-AI service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Service acknowledged the session.
    SessionStart {
        /// Service-side session identifier
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
    },

    /// Service acknowledged the prompt context.
    PromptStart {
        #[serde(rename = "promptName", default)]
        prompt_name: Option<String>,
    },

    /// The model opened an output content block (it started "speaking").
    ContentStart {
        #[serde(rename = "contentName", default)]
        content_name: Option<String>,
        #[serde(rename = "type", default)]
        content_type: Option<ContentType>,
    },

    /// Text output chunk.
    TextOutput {
        /// Model text
        content: String,
        #[serde(default)]
        role: Option<ContentRole>,
    },

    /// Audio output chunk; `content` is a base64 transport frame.
    AudioOutput {
        /// Base64-encoded PCM16 LE 8 kHz mono
        content: String,
    },

    /// The model closed an output content block.
    ContentEnd {
        #[serde(rename = "contentName", default)]
        content_name: Option<String>,
    },

    /// The model requests a tool invocation.
    ToolUse {
        /// Tool identifier
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Correlation id for the matching result
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        /// JSON-encoded arguments
        #[serde(default)]
        input: Option<String>,
    },

    /// A tool result was folded into the conversation.
    ToolResult {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
    },

    /// Service-reported error.
    Error {
        /// Human-readable description
        message: String,
        /// Transient or fatal
        #[serde(default)]
        severity: ErrorSeverity,
    },

    /// The stream ended normally; no further events follow.
    StreamComplete {},
}

/// Tag used for handler registration, one per [`ServerEvent`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiEventKind {
    SessionStart,
    PromptStart,
    ContentStart,
    TextOutput,
    AudioOutput,
    ContentEnd,
    ToolUse,
    ToolResult,
    Error,
    StreamComplete,
}

impl ServerEvent {
    /// The registration tag for this event.
    pub fn kind(&self) -> AiEventKind {
        match self {
            ServerEvent::SessionStart { .. } => AiEventKind::SessionStart,
            ServerEvent::PromptStart { .. } => AiEventKind::PromptStart,
            ServerEvent::ContentStart { .. } => AiEventKind::ContentStart,
            ServerEvent::TextOutput { .. } => AiEventKind::TextOutput,
            ServerEvent::AudioOutput { .. } => AiEventKind::AudioOutput,
            ServerEvent::ContentEnd { .. } => AiEventKind::ContentEnd,
            ServerEvent::ToolUse { .. } => AiEventKind::ToolUse,
            ServerEvent::ToolResult { .. } => AiEventKind::ToolResult,
            ServerEvent::Error { .. } => AiEventKind::Error,
            ServerEvent::StreamComplete {} => AiEventKind::StreamComplete,
        }
    }
}
