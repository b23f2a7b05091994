use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keep-alive
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Idle-connection heartbeat settings.  `interval_secs = 0` disables it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    #[serde(default)]
    pub interval_secs: u64,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            max_retries: d_max_retries(),
        }
    }
}

impl KeepAliveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_secs > 0
    }
}

fn d_max_retries() -> u32 {
    10
}
