use crate::config::ConnectionConfig;
use std::time::Duration;
use tracing::{error, info};

/// Fixed-interval reconnect schedule with an optional attempt ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Retry forever every `interval`
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            attempts: 0,
        }
    }

    /// Retry every `interval`, giving up after `max_attempts` consecutive failures
    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
            attempts: 0,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        match config.max_reconnect_attempts {
            Some(max) => Self::bounded(config.reconnect_interval(), max),
            None => Self::unbounded(config.reconnect_interval()),
        }
    }

    /// Delay before the next attempt, or `None` once the ceiling is reached.
    /// Counts the attempt.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                error!("Giving up after {} reconnect attempts", self.attempts);
                return None;
            }
        }
        self.attempts += 1;
        Some(self.interval)
    }

    /// Forget failed attempts after a successful connect
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            info!("Connection restored after {} reconnect attempts", self.attempts);
        }
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts.map_or(false, |max| self.attempts >= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(3000))
    }
}
