//! Channel subscription registry.
//!
//! Tracks which channels have at least one interested consumer and the
//! filters to send with the subscribe request. It has no knowledge of the
//! connection; the client and connection manager decide when to talk to the
//! backend.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tracing::debug;

use crate::{
    infra::logging::targets,
    ws::{
        listeners::{Handler, ListenerId, ListenerSet},
        message_types::{Envelope, Filters},
    },
};

struct ChannelEntry {
    filters: Filters,
    callbacks: Arc<ListenerSet<Envelope>>,
}

/// Outcome of adding a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Added {
    pub id: ListenerId,
    /// The channel had no callbacks before this one.
    pub new_channel: bool,
}

/// Outcome of removing a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    /// Callback was not registered (already removed).
    NotFound,
    /// Callback removed; other callbacks remain on the channel.
    Remaining(usize),
    /// Last callback removed; the channel entry is gone.
    ChannelEmpty,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: RwLock<HashMap<String, ChannelEntry>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `channel`, creating the entry if needed.
    ///
    /// The latest non-empty filters replace earlier ones for the channel.
    pub fn add(&self, channel: &str, filters: Filters, callback: Handler<Envelope>) -> Added {
        let mut channels = self.channels.write().unwrap_or_else(|p| p.into_inner());
        let new_channel = !channels.contains_key(channel);
        let entry = channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelEntry {
                filters: Filters::new(),
                callbacks: Arc::new(ListenerSet::new()),
            });
        if !filters.is_empty() || new_channel {
            entry.filters = filters;
        }
        let id = entry.callbacks.on_handler(callback);
        debug!(
            target: targets::WS,
            channel,
            new_channel,
            callbacks = entry.callbacks.len(),
            "Registered channel callback"
        );
        Added { id, new_channel }
    }

    /// Remove a callback. The entry is dropped with its last callback.
    pub fn remove(&self, channel: &str, id: ListenerId) -> Removed {
        let mut channels = self.channels.write().unwrap_or_else(|p| p.into_inner());
        let Some(entry) = channels.get(channel) else {
            return Removed::NotFound;
        };
        if !entry.callbacks.off(id) {
            return Removed::NotFound;
        }
        let remaining = entry.callbacks.len();
        if remaining == 0 {
            channels.remove(channel);
            debug!(target: targets::WS, channel, "Channel has no callbacks left; removed");
            Removed::ChannelEmpty
        } else {
            Removed::Remaining(remaining)
        }
    }

    /// Callbacks for one channel, or `None` if nobody is interested.
    pub fn callbacks(&self, channel: &str) -> Option<Arc<ListenerSet<Envelope>>> {
        self.channels
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(channel)
            .map(|e| Arc::clone(&e.callbacks))
    }

    pub fn filters(&self, channel: &str) -> Option<Filters> {
        self.channels
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(channel)
            .map(|e| e.filters.clone())
    }

    /// Snapshot of every `(channel, filters)` pair, for re-subscription.
    /// Order is unspecified.
    pub fn entries(&self) -> Vec<(String, Filters)> {
        self.channels
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(c, e)| (c.clone(), e.filters.clone()))
            .collect()
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
