//! Heartbeat for idle connections.

use std::sync::Arc;
use std::time::Duration;

use coap_domain::config::KeepAliveConfig;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connection::Inner;
use crate::error::CloseReason;

pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Keep-alive policy.  A zero interval disables the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub interval: Duration,
    pub max_retries: u32,
}

impl KeepAlive {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new(Duration::ZERO, DEFAULT_MAX_RETRIES)
    }
}

impl From<&KeepAliveConfig> for KeepAlive {
    fn from(config: &KeepAliveConfig) -> Self {
        Self::new(config.interval(), config.max_retries)
    }
}

/// Ping the peer whenever a full interval passes without inbound traffic,
/// and fail the connection once `max_retries` pings go unanswered.
pub(crate) async fn monitor(inner: Arc<Inner>, policy: KeepAlive) {
    let mut ticker = tokio::time::interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut seen = inner.activity();
    let mut misses = 0u32;

    loop {
        tokio::select! {
            _ = inner.closed_token().cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = inner.activity();
        if now != seen {
            seen = now;
            misses = 0;
            continue;
        }

        if misses == policy.max_retries {
            inner.fail(CloseReason::KeepAliveExhausted(misses));
            return;
        }

        misses += 1;
        tracing::debug!(misses, max_retries = policy.max_retries, "connection idle, sending ping");
        inner.send_ping().await;
    }
}
