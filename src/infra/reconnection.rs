//! Reconnection policy.
//!
//! Decides whether and when to retry after an unintended closure:
//! - **Bounded attempts**: counted since the last successful open
//! - **Flat interval** by default, exponential backoff when
//!   `backoff_multiplier > 1.0`, capped at `max_delay_ms`
//! - **Jitter**: optional random spread to avoid synchronized retries

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_RECONNECT_DELAY_MS, DEFAULT_RECONNECT_INTERVAL_MS,
};

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Delay before a reconnection attempt in milliseconds (default: 3s)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Backoff multiplier; 1.0 keeps the interval flat (default: 1.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Cap on the delay when backing off in milliseconds (default: 60s)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0); the delay varies by ±factor/2 (default: 0.0)
    #[serde(default)]
    pub jitter_factor: f64,
    /// Automatic attempts allowed after a drop (0 = unlimited, default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_RECONNECT_DELAY_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectionConfig {
    /// Exponential backoff with jitter on top of the configured interval.
    pub fn exponential(interval: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            backoff_multiplier: 2.0,
            max_delay_ms: max_delay.as_millis() as u64,
            jitter_factor: 0.2,
            max_attempts,
        }
    }
}

/// Attempt bookkeeping for one connection.
#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    config: ReconnectionConfig,
    attempts: u32,
}

impl ReconnectionPolicy {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn config(&self) -> &ReconnectionConfig {
        &self.config
    }

    /// Attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts
    }

    /// Claim the next attempt.
    ///
    /// Returns the delay to wait before it, or `None` once the bound is
    /// reached.
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = calculate_backoff_delay(
            self.attempts,
            Duration::from_millis(self.config.interval_ms),
            Duration::from_millis(self.config.max_delay_ms),
            self.config.backoff_multiplier,
            self.config.jitter_factor,
        );
        self.attempts += 1;
        Some(delay)
    }

    /// Connection opened, or an operator asked for a fresh start.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Calculate backoff delay with jitter.
///
/// # Arguments
/// - `attempt`: Current attempt number (0-based)
/// - `initial`: Delay of the first attempt
/// - `max`: Maximum delay cap (ignored when below `initial`)
/// - `multiplier`: Backoff multiplier (1.0 = flat)
/// - `jitter`: Jitter factor (0.0-1.0, e.g., 0.2 for ±10%)
pub fn calculate_backoff_delay(
    attempt: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
) -> Duration {
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let base_secs = initial.as_secs_f64() * multiplier.max(1.0).powi(exponent);
    let cap_secs = max.as_secs_f64().max(initial.as_secs_f64());
    let capped_secs = base_secs.min(cap_secs);

    let jitter = jitter.clamp(0.0, 1.0);
    let jitter_mult = if jitter > 0.0 {
        1.0 + rand::thread_rng().gen_range(-0.5..=0.5) * jitter
    } else {
        1.0
    };

    Duration::from_secs_f64((capped_secs * jitter_mult).max(0.0))
}
