// File: soundbot-core/src/voice/config.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing policy for voice sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// How long a connection may sit in signalling/connecting before it is destroyed.
    pub ready_timeout: Duration,
    /// Grace period after a 4014 close for the transport to show it was only moved.
    pub kick_window: Duration,
    /// Rejoin attempt `n` (0-based) waits `(n + 1) * rejoin_backoff_step`.
    pub rejoin_backoff_step: Duration,
    pub max_rejoin_attempts: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(20),
            kick_window: Duration::from_secs(5),
            rejoin_backoff_step: Duration::from_secs(5),
            max_rejoin_attempts: 5,
        }
    }
}

impl VoiceConfig {
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn rejoin_delay(&self, attempts_so_far: u32) -> Duration {
        self.rejoin_backoff_step * (attempts_so_far + 1)
    }
}
