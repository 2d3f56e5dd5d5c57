//! Liveness probing for an open connection.
//!
//! The monitor owns one interval timer. It is started when the connection
//! opens and stopped when it closes or the consumer goes to the background.
//! With `max_missed_pongs > 0`, consecutive unanswered probes expire the
//! connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::{consts::DEFAULT_HEARTBEAT_INTERVAL_MS, infra::logging::targets};

/// Heartbeat configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between liveness probes in milliseconds (default: 30s)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Consecutive unanswered probes before the connection is treated as
    /// dead (0 = rely on the transport's close event only)
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,
}

fn default_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_max_missed_pongs() -> u32 {
    3
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_missed_pongs: default_max_missed_pongs(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// What the connection manager should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a liveness probe.
    Probe,
    /// Too many probes went unanswered.
    Expired { missed: u32 },
}

#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    config: HeartbeatConfig,
    interval: Option<Interval>,
    /// Send time of the oldest unanswered probe
    outstanding_since: Option<Instant>,
    missed: u32,
    /// EWMA of probe round-trip time
    latency_ms: Option<f64>,
}

impl HeartbeatMonitor {
    pub(crate) fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            interval: None,
            outstanding_since: None,
            missed: 0,
            latency_ms: None,
        }
    }

    /// Start (or restart) the timer. The first probe goes out one full
    /// interval from now.
    pub(crate) fn start(&mut self) {
        let period = self.config.interval();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        self.outstanding_since = None;
        self.missed = 0;
        debug!(target: targets::HEARTBEAT, interval_ms = period.as_millis() as u64, "Heartbeat started");
    }

    pub(crate) fn stop(&mut self) {
        if self.interval.take().is_some() {
            debug!(target: targets::HEARTBEAT, "Heartbeat stopped");
        }
        self.outstanding_since = None;
        self.missed = 0;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolves on the next tick; never resolves while stopped.
    pub(crate) async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Decide what to do for a tick that just fired.
    pub(crate) fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        if self.outstanding_since.is_some() {
            self.missed += 1;
            let max = self.config.max_missed_pongs;
            if max > 0 && self.missed >= max {
                warn!(
                    target: targets::HEARTBEAT,
                    missed = self.missed,
                    max,
                    "Heartbeat replies missing; connection considered dead"
                );
                return HeartbeatAction::Expired {
                    missed: self.missed,
                };
            }
            debug!(target: targets::HEARTBEAT, missed = self.missed, "Heartbeat reply outstanding");
        } else {
            self.outstanding_since = Some(now);
        }
        HeartbeatAction::Probe
    }

    /// A liveness reply arrived.
    pub(crate) fn record_pong(&mut self, now: Instant) {
        if let Some(sent) = self.outstanding_since.take() {
            let rtt_ms = now.saturating_duration_since(sent).as_secs_f64() * 1000.0;
            // EWMA with alpha = 0.2
            self.latency_ms = Some(match self.latency_ms {
                Some(avg) => avg * 0.8 + rtt_ms * 0.2,
                None => rtt_ms,
            });
        }
        self.missed = 0;
    }

    pub(crate) fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    pub(crate) fn missed(&self) -> u32 {
        self.missed
    }
}
