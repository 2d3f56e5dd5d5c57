//! User notification feed.
//!
//! Newest-first, bounded, deduplicated by id, with an unread counter. When a
//! persist path is configured the feed is loaded at construction and written
//! back after every mutation (`.tmp` then `fs::rename`).

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock, RwLockWriteGuard},
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    helpers::now_ms,
    infra::logging::targets,
    prelude::*,
    serde_utils::deserialize_opt_timestamp_ms,
    store::{StateSync, StoreConfig},
    ws::message_types::{Envelope, MessageType},
    Error,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    /// Severity or category (info, success, warning, error, ...)
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_timestamp_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub read: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_kind() -> String {
    "info".to_string()
}

fn generated_id(now: i64) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("n-{now}-{suffix:08x}")
}

#[derive(Debug)]
struct Feed {
    items: Vec<Notification>,
    max_items: usize,
}

impl Feed {
    fn push(&mut self, mut item: Notification, now: i64) {
        if item.id.is_empty() {
            item.id = generated_id(now);
        }
        if item.timestamp.is_none() {
            item.timestamp = Some(now);
        }
        self.items.retain(|n| n.id != item.id);
        self.items.insert(0, item);
        self.items.truncate(self.max_items);
    }
}

/// Shared handle to the notification feed.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    feed: Arc<RwLock<Feed>>,
    persist_path: Option<PathBuf>,
    version: Arc<watch::Sender<u64>>,
}

fn load_feed(path: &Path) -> Result<Vec<Notification>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| Error::Persistence(format!("{}: {e}", path.display())))
}

fn save_feed(path: &Path, items: &[Notification]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(items)
        .map_err(|e| Error::Persistence(format!("serialize: {e}")))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl NotificationStore {
    pub fn new(max_items: usize) -> Self {
        Self::with_items(Vec::new(), max_items, None)
    }

    fn with_items(
        mut items: Vec<Notification>,
        max_items: usize,
        persist_path: Option<PathBuf>,
    ) -> Self {
        let max_items = max_items.max(1);
        items.truncate(max_items);
        let (version, _) = watch::channel(0);
        Self {
            feed: Arc::new(RwLock::new(Feed { items, max_items })),
            persist_path,
            version: Arc::new(version),
        }
    }

    /// Feed backed by a JSON file. A missing file starts an empty feed; an
    /// unreadable one is an error.
    pub fn persistent(path: impl Into<PathBuf>, max_items: usize) -> Result<Self> {
        let path = path.into();
        let items = load_feed(&path)?;
        info!(target: targets::STORE, count = items.len(), "Loaded notifications from {}", path.display());
        Ok(Self::with_items(items, max_items, Some(path)))
    }

    /// Build from config. A persisted feed that cannot be read is logged and
    /// replaced by an empty one.
    pub fn from_config(config: &StoreConfig) -> Self {
        match &config.notifications_path {
            Some(path) => Self::persistent(path, config.max_notifications).unwrap_or_else(|e| {
                warn!(target: targets::STORE, "Discarding unreadable notification feed: {e}");
                Self::with_items(Vec::new(), config.max_notifications, Some(path.clone()))
            }),
            None => Self::new(config.max_notifications),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Feed> {
        self.feed.write().unwrap_or_else(|p| p.into_inner())
    }

    fn items(&self) -> Vec<Notification> {
        self.feed
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .items
            .clone()
    }

    /// Apply a mutation and persist the result. The save happens under the
    /// feed's write lock so files land in mutation order.
    fn mutate<R>(&self, f: impl FnOnce(&mut Feed) -> R) -> R {
        let result = {
            let mut feed = self.write();
            let result = f(&mut feed);
            if let Some(path) = &self.persist_path {
                if let Err(e) = save_feed(path, &feed.items) {
                    warn!(target: targets::STORE, "Failed to persist notifications: {e}");
                }
            }
            result
        };
        self.version.send_modify(|v| *v += 1);
        result
    }

    pub fn push(&self, item: Notification) {
        self.push_at(item, now_ms());
    }

    fn push_at(&self, item: Notification, now: i64) {
        self.mutate(|feed| feed.push(item, now));
    }

    /// Newest first.
    pub fn all(&self) -> Vec<Notification> {
        self.items()
    }

    pub fn len(&self) -> usize {
        self.feed.read().unwrap_or_else(|p| p.into_inner()).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread_count(&self) -> usize {
        self.feed
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .items
            .iter()
            .filter(|n| !n.read)
            .count()
    }

    /// Returns `false` for an unknown id.
    pub fn mark_read(&self, id: &str) -> bool {
        self.mutate(|feed| match feed.items.iter_mut().find(|n| n.id == id) {
            Some(item) => {
                item.read = true;
                true
            }
            None => false,
        })
    }

    pub fn mark_all_read(&self) {
        self.mutate(|feed| feed.items.iter_mut().for_each(|n| n.read = true));
    }

    pub fn clear(&self) {
        self.mutate(|feed| feed.items.clear());
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

impl StateSync for NotificationStore {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn apply(&self, envelope: &Envelope) {
        if envelope.kind != MessageType::UserNotification {
            return;
        }
        match serde_json::from_value::<Notification>(envelope.data.clone()) {
            Ok(mut item) => {
                if item.timestamp.is_none() {
                    item.timestamp = envelope.timestamp;
                }
                debug!(target: targets::STORE, id = %item.id, kind = %item.kind, "Notification received");
                self.push(item);
            }
            Err(e) => {
                warn!(target: targets::STORE, "Dropping malformed notification: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(id: &str, message: &str) -> Notification {
        serde_json::from_value(json!({"id": id, "message": message})).unwrap()
    }

    #[test]
    fn test_newest_first_and_bounded() {
        let store = NotificationStore::new(3);
        for i in 0..5 {
            store.push_at(note(&format!("n{i}"), "hi"), 1_000 + i);
        }
        let ids: Vec<String> = store.all().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n4", "n3", "n2"]);
    }

    #[test]
    fn test_dedup_by_id_moves_to_front() {
        let store = NotificationStore::new(10);
        store.push_at(note("a", "first"), 1);
        store.push_at(note("b", "other"), 2);
        store.push_at(note("a", "second"), 3);

        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].message, "second");
    }

    #[test]
    fn test_missing_id_and_timestamp_filled_in() {
        let store = NotificationStore::new(10);
        store.push_at(serde_json::from_value(json!({"message": "x"})).unwrap(), 42);
        let item = &store.all()[0];
        assert!(item.id.starts_with("n-42-"));
        assert_eq!(item.timestamp, Some(42));
        assert_eq!(item.kind, "info");
    }

    #[test]
    fn test_unread_tracking() {
        let store = NotificationStore::new(10);
        store.push_at(note("a", "1"), 1);
        store.push_at(note("b", "2"), 2);
        assert_eq!(store.unread_count(), 2);

        assert!(store.mark_read("a"));
        assert!(!store.mark_read("missing"));
        assert_eq!(store.unread_count(), 1);

        store.mark_all_read();
        assert_eq!(store.unread_count(), 0);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_applies_only_notification_envelopes() {
        let store = NotificationStore::new(10);
        let mut changes = store.watch();

        store.apply(&Envelope::new(MessageType::MarketUpdate, None, json!({"id": "m"})));
        assert!(store.is_empty());
        assert!(!changes.has_changed().unwrap());

        let mut env = Envelope::new(
            MessageType::UserNotification,
            Some("notifications"),
            json!({"id": "n1", "type": "warning", "title": "Gas spike"}),
        );
        env.timestamp = Some(7);
        store.apply(&env);

        let item = &store.all()[0];
        assert_eq!(item.kind, "warning");
        assert_eq!(item.timestamp, Some(7));
        assert!(changes.has_changed().unwrap());

        store.apply(&Envelope::new(MessageType::UserNotification, None, json!("bad")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed/notifications.json");

        let store = NotificationStore::persistent(&path, 10).unwrap();
        assert!(store.is_empty());
        store.push_at(note("a", "saved"), 1);
        store.mark_read("a");

        assert!(path.exists());
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());

        let reloaded = NotificationStore::persistent(&path, 10).unwrap();
        let all = reloaded.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "saved");
        assert!(all[0].read);
    }

    #[test]
    fn test_concurrent_mutations_persist_latest_feed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.json");
        let store = NotificationStore::persistent(&path, 100).unwrap();

        let pusher = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    store.push_at(note(&format!("n{i}"), "hi"), i);
                }
            })
        };
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    store.mark_all_read();
                }
            })
        };
        pusher.join().unwrap();
        reader.join().unwrap();

        let reloaded = NotificationStore::persistent(&path, 100).unwrap();
        assert_eq!(reloaded.all(), store.all());
        assert_eq!(reloaded.len(), 50);
    }

    #[test]
    fn test_corrupt_feed_is_replaced_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            NotificationStore::persistent(&path, 10),
            Err(Error::Persistence(_))
        ));

        let config = StoreConfig {
            notifications_path: Some(path.clone()),
            ..StoreConfig::default()
        };
        let store = NotificationStore::from_config(&config);
        assert!(store.is_empty());
        store.push_at(note("a", "fresh"), 1);

        let reloaded = NotificationStore::persistent(&path, 10).unwrap();
        assert_eq!(reloaded.len(), 1);
    }
}
