//! State-sync stores fed by the dispatcher.
//!
//! Stores derive their state purely from the message stream and are applied
//! before any channel callback sees the same envelope, so a consumer that
//! reads a store from inside its callback observes the update.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    consts::{
        DEFAULT_EXPIRY_SWEEP_INTERVAL_MS, DEFAULT_MAX_NOTIFICATIONS, DEFAULT_MAX_OPPORTUNITIES,
        DEFAULT_TIME_TO_EXPIRY_MS,
    },
    ws::message_types::Envelope,
};

pub mod notifications;
pub mod opportunity;
pub mod opportunity_store;
pub mod sweeper;

pub use notifications::{Notification, NotificationStore};
pub use opportunity::{Opportunity, OpportunityFilter, OpportunityStatus};
pub use opportunity_store::{OpportunityBook, OpportunityStore, Upsert};
pub use sweeper::spawn_expiry_sweep;

/// A consumer that keeps derived state in sync with the message stream,
/// whether or not any UI is subscribed.
pub trait StateSync: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &'static str;

    /// Apply one domain envelope. Envelopes of other kinds are ignored.
    fn apply(&self, envelope: &Envelope);
}

/// Store limits and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum opportunities kept; the oldest are dropped first (default: 100)
    #[serde(default = "default_max_opportunities")]
    pub max_opportunities: usize,
    /// Expiry sweep interval in milliseconds (default: 5s)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Lifetime of an opportunity that carries no `timeToExpiry` (default: 30s)
    #[serde(default = "default_time_to_expiry_ms")]
    pub default_time_to_expiry_ms: i64,
    /// Maximum notifications kept (default: 50)
    #[serde(default = "default_max_notifications")]
    pub max_notifications: usize,
    /// JSON file the notification feed is persisted to (disabled when unset)
    #[serde(default)]
    pub notifications_path: Option<PathBuf>,
}

fn default_max_opportunities() -> usize {
    DEFAULT_MAX_OPPORTUNITIES
}

fn default_sweep_interval_ms() -> u64 {
    DEFAULT_EXPIRY_SWEEP_INTERVAL_MS
}

fn default_time_to_expiry_ms() -> i64 {
    DEFAULT_TIME_TO_EXPIRY_MS
}

fn default_max_notifications() -> usize {
    DEFAULT_MAX_NOTIFICATIONS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_opportunities: default_max_opportunities(),
            sweep_interval_ms: default_sweep_interval_ms(),
            default_time_to_expiry_ms: default_time_to_expiry_ms(),
            max_notifications: default_max_notifications(),
            notifications_path: None,
        }
    }
}
