//! Deduplicated, bounded collection of live opportunities.
//!
//! Records are unique by `id`. Insertion order is tracked by a sequence
//! number so the oldest records can be dropped when the collection exceeds
//! its bound, and expiry uses a min-heap keyed by `expires_at` so a sweep
//! only touches records that are actually due.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    helpers::now_ms,
    infra::logging::targets,
    prelude::*,
    store::{
        opportunity::{Opportunity, OpportunityFilter, OpportunityStatus},
        StateSync, StoreConfig,
    },
    ws::message_types::{Envelope, MessageType},
    Error,
};

/// Outcome of applying a "new record" message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    /// The message marked the record expired; it is no longer held.
    Evicted,
}

enum Merged {
    Kept,
    Evicted,
}

#[derive(Debug)]
struct Entry {
    record: Opportunity,
    seq: u64,
    expires_at: i64,
}

/// The single-owner core of the opportunity store.
#[derive(Debug)]
pub struct OpportunityBook {
    max_records: usize,
    default_time_to_expiry_ms: i64,
    records: HashMap<String, Entry>,
    /// Insertion sequence → id; the highest sequence is the newest record
    order: BTreeMap<u64, String>,
    /// (expires_at, seq) of active records; stale entries are skipped lazily
    expiry: BinaryHeap<Reverse<(i64, u64)>>,
    next_seq: u64,
    new_count: u64,
    total_seen: u64,
}

fn payload_object(data: &Value) -> Result<&Map<String, Value>> {
    data.as_object()
        .ok_or_else(|| Error::JsonParse("opportunity payload is not an object".to_string()))
}

fn payload_id(data: &Map<String, Value>) -> Result<String> {
    match data.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::JsonParse("opportunity payload has no id".to_string())),
    }
}

/// Payload fields with `id` replaced by its string form.
fn with_id(fields: &Map<String, Value>, id: &str) -> Map<String, Value> {
    let mut fields = fields.clone();
    fields.insert("id".to_string(), Value::String(id.to_string()));
    fields
}

impl OpportunityBook {
    pub fn new(max_records: usize, default_time_to_expiry_ms: i64) -> Self {
        Self {
            max_records: max_records.max(1),
            default_time_to_expiry_ms,
            records: HashMap::new(),
            order: BTreeMap::new(),
            expiry: BinaryHeap::new(),
            next_seq: 0,
            new_count: 0,
            total_seen: 0,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.max_opportunities, config.default_time_to_expiry_ms)
    }

    /// Apply a "new record" message: merge into the existing record with the
    /// same id, or insert it as the newest record.
    pub fn upsert(&mut self, data: &Value, now: i64) -> Result<Upsert> {
        let fields = payload_object(data)?;
        let id = payload_id(fields)?;

        if self.records.contains_key(&id) {
            return Ok(match self.merge(&id, fields)? {
                Merged::Kept => Upsert::Updated,
                Merged::Evicted => Upsert::Evicted,
            });
        }

        let mut record: Opportunity = serde_json::from_value(Value::Object(with_id(fields, &id)))?;
        if record.status == OpportunityStatus::Expired {
            debug!(target: targets::STORE, id = %id, "Opportunity arrived already expired; not stored");
            return Ok(Upsert::Evicted);
        }
        if record.detected_at.is_none() {
            record.detected_at = Some(now);
        }
        let expires_at = record.expiry_ms(self.default_time_to_expiry_ms);
        let seq = self.next_seq;
        self.next_seq += 1;

        if record.is_active() {
            self.expiry.push(Reverse((expires_at, seq)));
        }
        self.order.insert(seq, id.clone());
        self.records.insert(
            id.clone(),
            Entry {
                record,
                seq,
                expires_at,
            },
        );
        self.new_count += 1;
        self.total_seen += 1;
        debug!(target: targets::STORE, id = %id, expires_at, "Opportunity inserted");

        self.truncate();
        self.maybe_compact();
        Ok(Upsert::Inserted)
    }

    /// Apply an "update" message. Never inserts; returns `false` when the id
    /// is unknown. An update to `expired` evicts the record.
    pub fn update(&mut self, data: &Value) -> Result<bool> {
        let fields = payload_object(data)?;
        let id = payload_id(fields)?;
        if !self.records.contains_key(&id) {
            debug!(target: targets::STORE, id = %id, "Update for unknown opportunity ignored");
            return Ok(false);
        }
        self.merge(&id, fields)?;
        Ok(true)
    }

    fn merge(&mut self, id: &str, fields: &Map<String, Value>) -> Result<Merged> {
        let Some(entry) = self.records.get_mut(id) else {
            return Ok(Merged::Kept);
        };

        let mut merged = match serde_json::to_value(&entry.record)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
        merged.insert("id".to_string(), Value::String(id.to_string()));
        let mut next: Opportunity = serde_json::from_value(Value::Object(merged))?;

        let previous = entry.record.status;
        if !previous.can_transition_to(next.status) {
            warn!(
                target: targets::STORE,
                id,
                from = %previous,
                to = %next.status,
                "Rejected opportunity status transition"
            );
            next.status = previous;
        }

        if next.status == OpportunityStatus::Expired {
            let seq = entry.seq;
            self.records.remove(id);
            self.order.remove(&seq);
            debug!(target: targets::STORE, id, "Opportunity expired by update; evicted");
            return Ok(Merged::Evicted);
        }

        let expires_at = next.expiry_ms(self.default_time_to_expiry_ms);
        let needs_index = next.is_active() && (expires_at != entry.expires_at || !entry.record.is_active());
        entry.record = next;
        entry.expires_at = expires_at;
        if needs_index {
            self.expiry.push(Reverse((expires_at, entry.seq)));
        }
        self.maybe_compact();
        Ok(Merged::Kept)
    }

    /// Explicit eviction.
    pub fn remove(&mut self, id: &str) -> Option<Opportunity> {
        let entry = self.records.remove(id)?;
        self.order.remove(&entry.seq);
        Some(entry.record)
    }

    /// Remove every active record whose expiry is at or before `now`.
    /// Returns the removed ids, earliest expiry first.
    pub fn sweep_expired(&mut self, now: i64) -> Vec<String> {
        let mut removed = Vec::new();
        while let Some(Reverse((expires_at, seq))) = self.expiry.peek().copied() {
            if expires_at > now {
                break;
            }
            self.expiry.pop();

            let Some(id) = self.order.get(&seq).cloned() else {
                continue;
            };
            let due = self
                .records
                .get(&id)
                .is_some_and(|e| e.seq == seq && e.expires_at == expires_at && e.record.is_active());
            if due {
                self.records.remove(&id);
                self.order.remove(&seq);
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            debug!(target: targets::STORE, count = removed.len(), "Expired opportunities swept");
        }
        removed
    }

    fn truncate(&mut self) {
        while self.records.len() > self.max_records {
            let Some((_, id)) = self.order.pop_first() else {
                break;
            };
            self.records.remove(&id);
            debug!(target: targets::STORE, id = %id, "Oldest opportunity dropped (bound reached)");
        }
    }

    /// Rebuild the expiry heap once stale entries dominate it.
    fn maybe_compact(&mut self) {
        if self.expiry.len() <= self.records.len() * 2 + 64 {
            return;
        }
        self.expiry = self
            .records
            .values()
            .filter(|e| e.record.is_active())
            .map(|e| Reverse((e.expires_at, e.seq)))
            .collect();
    }

    pub fn get(&self, id: &str) -> Option<&Opportunity> {
        self.records.get(id).map(|e| &e.record)
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Opportunity> + '_ {
        self.order
            .values()
            .rev()
            .filter_map(|id| self.records.get(id).map(|e| &e.record))
    }

    pub fn all(&self) -> Vec<Opportunity> {
        self.iter().cloned().collect()
    }

    pub fn filtered(&self, filter: &OpportunityFilter) -> Vec<Opportunity> {
        self.iter().filter(|o| filter.matches(o)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records inserted since the counter was last reset.
    pub fn new_count(&self) -> u64 {
        self.new_count
    }

    /// Records ever inserted.
    pub fn total_seen(&self) -> u64 {
        self.total_seen
    }

    pub fn reset_new_count(&mut self) {
        self.new_count = 0;
    }

    #[cfg(test)]
    fn index_len(&self) -> usize {
        self.expiry.len()
    }
}

/// Shared handle over an [`OpportunityBook`] that plugs into the dispatcher.
#[derive(Debug, Clone)]
pub struct OpportunityStore {
    book: Arc<RwLock<OpportunityBook>>,
    version: Arc<watch::Sender<u64>>,
}

impl OpportunityStore {
    pub fn new(config: &StoreConfig) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            book: Arc::new(RwLock::new(OpportunityBook::from_config(config))),
            version: Arc::new(version),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, OpportunityBook> {
        self.book.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, OpportunityBook> {
        self.book.write().unwrap_or_else(|p| p.into_inner())
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Receiver that changes on every mutation.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn upsert(&self, data: &Value, now: i64) -> Result<Upsert> {
        let outcome = self.write().upsert(data, now)?;
        self.bump();
        Ok(outcome)
    }

    pub fn update(&self, data: &Value) -> Result<bool> {
        let updated = self.write().update(data)?;
        if updated {
            self.bump();
        }
        Ok(updated)
    }

    pub fn remove(&self, id: &str) -> Option<Opportunity> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    pub fn sweep_expired(&self, now: i64) -> Vec<String> {
        let removed = self.write().sweep_expired(now);
        if !removed.is_empty() {
            self.bump();
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Opportunity> {
        self.read().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Opportunity> {
        self.read().all()
    }

    pub fn filtered(&self, filter: &OpportunityFilter) -> Vec<Opportunity> {
        self.read().filtered(filter)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn new_count(&self) -> u64 {
        self.read().new_count()
    }

    pub fn total_seen(&self) -> u64 {
        self.read().total_seen()
    }

    pub fn reset_new_count(&self) {
        self.write().reset_new_count();
        self.bump();
    }
}

impl StateSync for OpportunityStore {
    fn name(&self) -> &'static str {
        "opportunities"
    }

    fn apply(&self, envelope: &Envelope) {
        let result = match envelope.kind {
            MessageType::MevOpportunity => self.upsert(&envelope.data, now_ms()).map(|_| ()),
            MessageType::OpportunityUpdate => self.update(&envelope.data).map(|_| ()),
            MessageType::OpportunityExpired => payload_object(&envelope.data)
                .and_then(payload_id)
                .map(|id| {
                    self.remove(&id);
                }),
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(target: targets::STORE, kind = %envelope.kind, "Dropping malformed opportunity message: {err}");
        }
    }
}
