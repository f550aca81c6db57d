//! Barge-in detection.
//!
//! Flags caller audio activity that lands while the agent is speaking (an
//! open AI output content block) and close enough to the start of that
//! speech to read as an interruption. The flag is advisory: it is surfaced
//! to the activity log and can be folded into the AI's next response so the
//! agent acknowledges being cut off. It does not truncate outbound playback.

use std::time::{Duration, Instant};

/// Default gap between agent speech start and caller activity below which
/// the activity counts as an interruption. Empirically tuned; a config knob,
/// not a contract.
pub const DEFAULT_INTERRUPTION_THRESHOLD: Duration = Duration::from_millis(500);

/// One-shot barge-in signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interruption {
    /// Gap between agent speech start and the interrupting activity.
    pub gap: Duration,
}

/// Tracks agent-speaking state against inbound audio activity.
///
/// Driven by the supervisor: `on_content_start` / `on_content_end` from AI
/// events, `on_inbound_audio` from the media feed. Emits at most one
/// [`Interruption`] per speaking turn.
#[derive(Debug)]
pub struct InterruptionDetector {
    threshold: Duration,
    agent_speaking: bool,
    speech_started_at: Option<Instant>,
    last_inbound_audio_at: Option<Instant>,
    interruption_flag: bool,
}

impl InterruptionDetector {
    /// Detector with the given threshold.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            agent_speaking: false,
            speech_started_at: None,
            last_inbound_audio_at: None,
            interruption_flag: false,
        }
    }

    /// Agent opened an output content block: speaking starts, any previous
    /// flag is cleared.
    pub fn on_content_start(&mut self, now: Instant) {
        self.agent_speaking = true;
        self.speech_started_at = Some(now);
        self.interruption_flag = false;
    }

    /// Agent closed its output content block: speaking ends, flag clears.
    pub fn on_content_end(&mut self) {
        self.agent_speaking = false;
        self.speech_started_at = None;
        self.interruption_flag = false;
    }

    /// Record inbound caller audio activity at `now`.
    ///
    /// Returns `Some(Interruption)` exactly once per speaking turn, when the
    /// activity falls within the threshold of the agent starting to speak.
    pub fn on_inbound_audio(&mut self, now: Instant) -> Option<Interruption> {
        self.last_inbound_audio_at = Some(now);

        if !self.agent_speaking || self.interruption_flag {
            return None;
        }
        let started = self.speech_started_at?;
        let gap = now.saturating_duration_since(started);
        if gap < self.threshold {
            self.interruption_flag = true;
            return Some(Interruption { gap });
        }
        None
    }

    /// Whether the agent is currently speaking.
    pub fn agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    /// Whether a barge-in has been flagged for the current speaking turn.
    pub fn interrupted(&self) -> bool {
        self.interruption_flag
    }

    /// Timestamp of the most recent inbound audio activity.
    pub fn last_inbound_audio_at(&self) -> Option<Instant> {
        self.last_inbound_audio_at
    }
}

impl Default for InterruptionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_INTERRUPTION_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_within_threshold_flags_once() {
        let mut detector = InterruptionDetector::default();
        let start = Instant::now();

        detector.on_content_start(start);
        let first = detector.on_inbound_audio(start + Duration::from_millis(200));
        assert_eq!(
            first,
            Some(Interruption {
                gap: Duration::from_millis(200)
            })
        );
        assert!(detector.interrupted());

        // Further activity in the same turn does not re-fire.
        let second = detector.on_inbound_audio(start + Duration::from_millis(300));
        assert_eq!(second, None);
        assert!(detector.interrupted());
    }

    #[test]
    fn test_activity_past_threshold_never_flags() {
        let mut detector = InterruptionDetector::default();
        let start = Instant::now();

        detector.on_content_start(start);
        let result = detector.on_inbound_audio(start + Duration::from_millis(800));
        assert_eq!(result, None);
        assert!(!detector.interrupted());
    }

    #[test]
    fn test_content_end_clears_flag() {
        let mut detector = InterruptionDetector::default();
        let start = Instant::now();

        detector.on_content_start(start);
        detector.on_inbound_audio(start + Duration::from_millis(100));
        assert!(detector.interrupted());

        detector.on_content_end();
        assert!(!detector.interrupted());
        assert!(!detector.agent_speaking());
    }

    #[test]
    fn test_no_flag_when_agent_silent() {
        let mut detector = InterruptionDetector::default();
        let now = Instant::now();
        assert_eq!(detector.on_inbound_audio(now), None);
        assert!(!detector.interrupted());
        assert_eq!(detector.last_inbound_audio_at(), Some(now));
    }

    #[test]
    fn test_new_turn_rearms_detection() {
        let mut detector = InterruptionDetector::default();
        let start = Instant::now();

        detector.on_content_start(start);
        detector.on_inbound_audio(start + Duration::from_millis(100));
        detector.on_content_end();

        let second_turn = start + Duration::from_secs(5);
        detector.on_content_start(second_turn);
        let result = detector.on_inbound_audio(second_turn + Duration::from_millis(50));
        assert!(result.is_some());
    }

    #[test]
    fn test_custom_threshold() {
        let mut detector = InterruptionDetector::new(Duration::from_millis(100));
        let start = Instant::now();
        detector.on_content_start(start);
        assert!(
            detector
                .on_inbound_audio(start + Duration::from_millis(200))
                .is_none()
        );
    }
}
