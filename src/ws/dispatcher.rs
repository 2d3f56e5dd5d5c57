//! Routes one inbound envelope to every interested party exactly once.
//!
//! Order within one dispatch: state-sync stores first, then the callbacks
//! registered for the envelope's channel. Control envelopes stop here and
//! are handed back to the connection manager.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use tracing::{error, trace};

use crate::{
    infra::logging::targets,
    store::StateSync,
    ws::{message_types::Envelope, registry::SubscriptionRegistry},
};

/// What happened to a dispatched envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Control type; the caller's internal handling applies.
    Control,
    /// Domain type delivered to stores and channel callbacks.
    Domain {
        /// Channel callbacks invoked.
        delivered: usize,
        /// Stores or callbacks that panicked.
        failures: usize,
    },
}

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    state_sync: Vec<Arc<dyn StateSync>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "state_sync",
                &self.state_sync.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            state_sync: Vec::new(),
        }
    }

    pub fn with_state_sync(mut self, store: Arc<dyn StateSync>) -> Self {
        self.state_sync.push(store);
        self
    }

    pub fn dispatch(&self, envelope: &Envelope) -> Dispatch {
        if envelope.kind.is_control() {
            return Dispatch::Control;
        }

        let mut failures = 0;
        for store in &self.state_sync {
            if catch_unwind(AssertUnwindSafe(|| store.apply(envelope))).is_err() {
                failures += 1;
                error!(
                    target: targets::DISPATCH,
                    store = store.name(),
                    kind = %envelope.kind,
                    "State sync panicked while applying envelope"
                );
            }
        }

        let channel = envelope.routing_channel();
        let delivered = match self.registry.callbacks(channel) {
            Some(callbacks) => {
                let count = callbacks.len();
                let panicked = callbacks.emit(envelope);
                failures += panicked;
                count - panicked.min(count)
            }
            None => 0,
        };

        trace!(
            target: targets::DISPATCH,
            kind = %envelope.kind,
            channel,
            delivered,
            failures,
            "Dispatched envelope"
        );
        Dispatch::Domain {
            delivered,
            failures,
        }
    }
}
