use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Grace period after playback goes idle before the connection is released.
pub const IDLE_TIMEOUT_MS: u64 = 30_000;

/// Volume applied when neither the caller nor a stored preference supplies one.
pub const DEFAULT_VOLUME: f32 = 0.2;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VoiceConfig {
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

impl VoiceConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            default_volume: default_volume(),
        }
    }
}

fn default_idle_timeout_ms() -> u64 {
    IDLE_TIMEOUT_MS
}

fn default_volume() -> f32 {
    DEFAULT_VOLUME
}
