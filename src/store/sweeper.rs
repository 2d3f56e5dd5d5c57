use std::time::Duration;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::debug;

use crate::{helpers::now_ms, infra::logging::targets, store::OpportunityStore};

/// Spawn the periodic expiry sweep. The first sweep runs one `period` after
/// the call; abort the returned handle to stop it.
pub fn spawn_expiry_sweep(store: OpportunityStore, period: Duration) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = store.sweep_expired(now_ms());
            if !removed.is_empty() {
                debug!(target: targets::STORE, ids = ?removed, remaining = store.len(), "Expiry sweep");
            }
        }
    })
}
