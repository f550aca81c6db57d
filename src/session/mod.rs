//! Call session bookkeeping.
//!
//! One [`CallSession`] per bridged call, held in the process-wide
//! [`SessionRegistry`] so the diagnostics surface can inspect live and
//! recently-finished calls. The session is pure bookkeeping; the bridge
//! itself lives in [`supervisor`].

pub mod supervisor;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

pub use supervisor::{BridgeError, SessionSupervisor, SupervisorConfig, SupervisorState};

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Connection state of one leg of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LegState {
    Connecting,
    Connected,
    Disconnected,
}

/// One timestamped entry in a session's activity log.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    /// Epoch milliseconds.
    pub timestamp_ms: u64,
    /// Short machine-readable tag (e.g. "signaling_connected").
    pub tag: String,
    /// Free-form detail.
    pub detail: String,
}

/// One AI response captured for the session log.
#[derive(Debug, Clone, Serialize)]
pub struct AiResponseRecord {
    pub timestamp_ms: u64,
    pub role: String,
    pub content: String,
}

/// Serializable snapshot of a session for the diagnostics surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub caller_id: String,
    pub correlation_id: String,
    pub channel_arn: String,
    /// Supervisor lifecycle phase, lowercase.
    pub status: String,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    /// When the AI last produced output (audio or text). Absent until the
    /// first response.
    pub last_ai_response_ms: Option<u64>,
    pub signaling: LegState,
    pub media: LegState,
    pub ai: LegState,
    pub inbound_frames: u64,
    pub outbound_frames: u64,
    pub interruptions: u64,
}

/// Per-call bookkeeping: identity, per-leg connection state, activity and
/// AI-response logs, frame counters.
///
/// Shared as `Arc<CallSession>` between the supervisor (writer) and the
/// diagnostics handlers (readers); interior locks are short-held
/// `parking_lot` locks.
pub struct CallSession {
    session_id: String,
    caller_id: String,
    correlation_id: String,
    channel_arn: String,
    status: RwLock<String>,
    created_at_ms: u64,
    last_activity_ms: AtomicU64,
    /// 0 until the AI produces its first response.
    last_ai_response_ms: AtomicU64,
    signaling: RwLock<LegState>,
    media: RwLock<LegState>,
    ai: RwLock<LegState>,
    activity_log: RwLock<Vec<ActivityRecord>>,
    ai_responses: RwLock<Vec<AiResponseRecord>>,
    inbound_frames: AtomicU64,
    outbound_frames: AtomicU64,
    interruptions: AtomicU64,
}

impl CallSession {
    /// New session with a fresh UUID session id.
    pub fn new(caller_id: &str, correlation_id: &str, channel_arn: &str) -> Self {
        let now = epoch_ms();
        Self {
            session_id: Uuid::new_v4().to_string(),
            caller_id: caller_id.to_string(),
            correlation_id: correlation_id.to_string(),
            channel_arn: channel_arn.to_string(),
            status: RwLock::new("initializing".to_string()),
            created_at_ms: now,
            last_activity_ms: AtomicU64::new(now),
            last_ai_response_ms: AtomicU64::new(0),
            signaling: RwLock::new(LegState::Connecting),
            media: RwLock::new(LegState::Connecting),
            ai: RwLock::new(LegState::Connecting),
            activity_log: RwLock::new(Vec::new()),
            ai_responses: RwLock::new(Vec::new()),
            inbound_frames: AtomicU64::new(0),
            outbound_frames: AtomicU64::new(0),
            interruptions: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Append to the activity log and refresh the activity timestamp.
    pub fn record_activity(&self, tag: &str, detail: impl Into<String>) {
        let record = ActivityRecord {
            timestamp_ms: epoch_ms(),
            tag: tag.to_string(),
            detail: detail.into(),
        };
        debug!(session_id = %self.session_id, tag, "session activity");
        self.activity_log.write().push(record);
        self.touch();
    }

    /// Capture an AI response for the session log.
    pub fn record_ai_response(&self, role: &str, content: &str) {
        self.ai_responses.write().push(AiResponseRecord {
            timestamp_ms: epoch_ms(),
            role: role.to_string(),
            content: content.to_string(),
        });
        self.note_ai_response();
    }

    /// Note that the AI produced output (audio or text). Drives the
    /// last-AI-response timestamp the idle diagnostics report against.
    pub fn note_ai_response(&self) {
        self.last_ai_response_ms.store(epoch_ms(), Ordering::Relaxed);
        self.touch();
    }

    /// When the AI last responded, if it has.
    pub fn last_ai_response_ms(&self) -> Option<u64> {
        match self.last_ai_response_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Update the reported lifecycle phase.
    pub fn set_status(&self, status: &str) {
        *self.status.write() = status.to_string();
    }

    pub fn set_signaling(&self, state: LegState) {
        *self.signaling.write() = state;
        self.touch();
    }

    pub fn set_media(&self, state: LegState) {
        *self.media.write() = state;
        self.touch();
    }

    pub fn set_ai(&self, state: LegState) {
        *self.ai.write() = state;
        self.touch();
    }

    pub fn count_inbound_frame(&self) {
        self.inbound_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_outbound_frame(&self) {
        self.outbound_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Refresh the last-activity timestamp.
    pub fn touch(&self) {
        self.last_activity_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Copy of the activity log.
    pub fn activity_log(&self) -> Vec<ActivityRecord> {
        self.activity_log.read().clone()
    }

    /// Copy of the captured AI responses.
    pub fn ai_responses(&self) -> Vec<AiResponseRecord> {
        self.ai_responses.read().clone()
    }

    /// Point-in-time summary for the diagnostics surface.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            caller_id: self.caller_id.clone(),
            correlation_id: self.correlation_id.clone(),
            channel_arn: self.channel_arn.clone(),
            status: self.status.read().clone(),
            created_at_ms: self.created_at_ms,
            last_activity_ms: self.last_activity_ms(),
            last_ai_response_ms: self.last_ai_response_ms(),
            signaling: *self.signaling.read(),
            media: *self.media.read(),
            ai: *self.ai.read(),
            inbound_frames: self.inbound_frames.load(Ordering::Relaxed),
            outbound_frames: self.outbound_frames.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide registry of call sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<CallSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<CallSession>) {
        self.sessions
            .insert(session.session_id().to_string(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.get(session_id).map(|s| Arc::clone(&s))
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    /// Summaries of all registered sessions.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(|s| s.summary()).collect()
    }

    /// Sessions matching an optional caller id and correlation id.
    pub fn find(&self, caller_id: Option<&str>, correlation_id: Option<&str>) -> Vec<Arc<CallSession>> {
        self.sessions
            .iter()
            .filter(|s| caller_id.is_none_or(|c| s.caller_id() == c))
            .filter(|s| correlation_id.is_none_or(|c| s.correlation_id() == c))
            .map(|s| Arc::clone(&s))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_log_is_append_only_and_ordered() {
        let session = CallSession::new("caller-1", "corr-1", "arn:test");
        session.record_activity("signaling_connected", "relay open");
        session.record_activity("ai_ready", "sequence complete");
        session.record_activity("bridging", "");

        let log = session.activity_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].tag, "signaling_connected");
        assert_eq!(log[2].tag, "bridging");
        assert!(log[0].timestamp_ms <= log[2].timestamp_ms);
    }

    #[test]
    fn test_summary_reflects_leg_states_and_counters() {
        let session = CallSession::new("caller-1", "corr-1", "arn:test");
        session.set_signaling(LegState::Connected);
        session.set_ai(LegState::Connected);
        session.count_inbound_frame();
        session.count_inbound_frame();
        session.count_interruption();

        let summary = session.summary();
        assert_eq!(summary.signaling, LegState::Connected);
        assert_eq!(summary.media, LegState::Connecting);
        assert_eq!(summary.inbound_frames, 2);
        assert_eq!(summary.interruptions, 1);
        assert_eq!(summary.status, "initializing");
    }

    #[test]
    fn test_last_ai_response_tracked_separately_from_activity() {
        let session = CallSession::new("caller-1", "corr-1", "arn:test");
        assert_eq!(session.last_ai_response_ms(), None);

        // Supervisor bookkeeping bumps activity but is not an AI response.
        session.record_activity("bridging", "");
        assert_eq!(session.last_ai_response_ms(), None);

        session.note_ai_response();
        let after_audio = session.last_ai_response_ms().unwrap();
        assert!(after_audio >= session.created_at_ms());

        session.record_ai_response("assistant", "hello");
        assert!(session.last_ai_response_ms().unwrap() >= after_audio);
        assert_eq!(session.summary().last_ai_response_ms, session.last_ai_response_ms());
    }

    #[test]
    fn test_status_reflects_lifecycle_updates() {
        let session = CallSession::new("caller-1", "corr-1", "arn:test");
        session.set_status("bridging");
        assert_eq!(session.summary().status, "bridging");
        session.set_status("closed");
        assert_eq!(session.summary().status, "closed");
    }

    #[test]
    fn test_registry_find_filters() {
        let registry = SessionRegistry::new();
        let a = Arc::new(CallSession::new("alice", "corr-a", "arn:test"));
        let b = Arc::new(CallSession::new("bob", "corr-b", "arn:test"));
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find(Some("alice"), None).len(), 1);
        assert_eq!(registry.find(None, Some("corr-b")).len(), 1);
        assert_eq!(registry.find(Some("alice"), Some("corr-b")).len(), 0);
        assert_eq!(registry.find(None, None).len(), 2);

        registry.remove(a.session_id());
        assert_eq!(registry.len(), 1);
    }
}
