//! Bridge configuration.
//!
//! Loaded from environment variables (a `.env` file is honored when
//! present). `SIGNALING_CHANNEL_ARN` is the one required value; everything
//! else has a sensible default. CLI flags override the environment.

use std::time::Duration;

use thiserror::Error;

use crate::session::supervisor::{DEFAULT_BATCH_SIZE, SupervisorConfig};

/// Configuration errors. All fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("missing required configuration: {0}")]
    MissingRequired(&'static str),

    /// A variable is present but unparseable.
    #[error("invalid value for {key}: {value}")]
    Invalid {
        key: &'static str,
        value: String,
    },
}

/// Resolved configuration for the bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Signaling channel the call is negotiated over. Required.
    pub channel_arn: String,
    /// Upstream contact/correlation identifier, when the dialer provides one.
    pub contact_id: Option<String>,
    /// Caller identity for the session log.
    pub caller_id: String,
    /// Deployment region tag, recorded for diagnostics.
    pub region: String,
    /// Speech-AI event-stream endpoint.
    pub ai_endpoint: String,
    /// Signaling relay endpoint.
    pub signaling_endpoint: String,
    /// Diagnostics HTTP port.
    pub http_port: u16,
    /// System instructions delivered at AI session start.
    pub system_instructions: String,
    /// Inbound frames batched per AI audio event.
    pub batch_size: usize,
    /// Idle window in seconds.
    pub idle_timeout_secs: u64,
    /// Barge-in threshold in milliseconds.
    pub interruption_threshold_ms: u64,
}

impl BridgeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup. The seam used by tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let channel_arn = lookup("SIGNALING_CHANNEL_ARN")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingRequired("SIGNALING_CHANNEL_ARN"))?;

        Ok(Self {
            channel_arn,
            contact_id: lookup("CONTACT_ID").filter(|v| !v.is_empty()),
            caller_id: lookup("CALLER_ID").unwrap_or_else(|| "unknown".to_string()),
            region: lookup("BRIDGE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            ai_endpoint: lookup("AI_ENDPOINT")
                .unwrap_or_else(|| "wss://localhost:8443/ai".to_string()),
            signaling_endpoint: lookup("SIGNALING_ENDPOINT")
                .unwrap_or_else(|| "wss://localhost:8443/signaling".to_string()),
            http_port: parse_or("HTTP_PORT", &lookup, 3000)?,
            system_instructions: lookup("SYSTEM_INSTRUCTIONS").unwrap_or_else(|| {
                "You are a helpful voice assistant. Keep responses brief.".to_string()
            }),
            batch_size: parse_or("AUDIO_BATCH_SIZE", &lookup, DEFAULT_BATCH_SIZE)?,
            idle_timeout_secs: parse_or("IDLE_TIMEOUT_SECS", &lookup, 60)?,
            interruption_threshold_ms: parse_or("INTERRUPTION_THRESHOLD_MS", &lookup, 500)?,
        })
    }

    /// Correlation id: the upstream contact id when present, otherwise the
    /// channel ARN tail.
    pub fn correlation_id(&self) -> String {
        match &self.contact_id {
            Some(id) => id.clone(),
            None => self
                .channel_arn
                .rsplit('/')
                .next()
                .unwrap_or(&self.channel_arn)
                .to_string(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn interruption_threshold(&self) -> Duration {
        Duration::from_millis(self.interruption_threshold_ms)
    }

    /// Per-call supervisor tunables derived from this config.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            system_instructions: self.system_instructions.clone(),
            batch_size: self.batch_size.max(1),
            idle_timeout: self.idle_timeout(),
            interruption_threshold: self.interruption_threshold(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
