//! voicebridge - real-time bridge between a signaling-negotiated telephony
//! media session and a streaming speech-AI backend.
//!
//! One process instance serves one call: the signaling relay negotiates a
//! peer media session, caller audio is transcoded (G.711 μ-law ↔ PCM16) and
//! streamed to the AI's event-stream session, and AI audio flows back out to
//! the caller. A session supervisor owns the call lifecycle, barge-in
//! detection, the idle timer and ordered cleanup. A small HTTP surface
//! exposes health and per-call diagnostics.

pub mod config;
pub mod core;
pub mod handlers;
pub mod routes;
pub mod session;
pub mod state;

// Re-export commonly used items for convenience
pub use config::{BridgeConfig, ConfigError};
pub use core::*;
pub use session::{
    ActivityRecord, AiResponseRecord, BridgeError, CallSession, LegState, SessionRegistry,
    SessionSummary, SessionSupervisor, SupervisorConfig, SupervisorState,
};
pub use state::AppState;
