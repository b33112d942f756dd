//! In-memory thread arena with the read/unread lifecycle.
//!
//! Threads live in an arena keyed by [`ThreadId`] and are located by their
//! `(source_id, sender)` pair through a side index. Callers only ever see
//! [`Thread`] snapshots; the records themselves never leave the store.
//!
//! Removal happens exclusively through [`ThreadStore::sweep_remove_read`], so a
//! thread that was just marked read stays listed until the consumer's next
//! refresh.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::display_name::UNKNOWN_DISPLAY_NAME;
use crate::types::{Message, RawEvent, Thread, ThreadId, ThreadKey};

// ─── Records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ThreadRecord {
    key: ThreadKey,
    display_name: String,
    /// Front is newest. Insertion is always `push_front`.
    messages: VecDeque<Message>,
    unread_count: u32,
    dedup_key: String,
}

impl ThreadRecord {
    fn snapshot(&self, id: ThreadId) -> Thread {
        Thread {
            id,
            source_id: self.key.source_id.clone(),
            display_name: self.display_name.clone(),
            sender: self.key.sender.clone(),
            messages: self.messages.iter().cloned().collect(),
            unread_count: self.unread_count,
            dedup_key: self.dedup_key.clone(),
        }
    }

    fn latest_at(&self) -> u64 {
        self.messages.front().map_or(0, |m| m.timestamp)
    }
}

/// Result of [`ThreadStore::mark_read`]: the dedup key the capture side
/// should cancel, plus how many unread messages were cleared by this call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadAck {
    pub thread_id: ThreadId,
    pub dedup_key: String,
    /// `0` when the thread was already read.
    pub cleared: u32,
}

// ─── Thread Store ────────────────────────────────────────────────────

/// Owner of every aggregated thread.
#[derive(Debug, Default)]
pub struct ThreadStore {
    records: BTreeMap<ThreadId, ThreadRecord>,
    by_key: HashMap<ThreadKey, ThreadId>,
    next_id: u64,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            by_key: HashMap::new(),
            next_id: 1,
        }
    }

    /// Fold one event into the thread for its `(source_id, sender)` pair.
    ///
    /// A new pair creates a thread with one message and one unread. An
    /// existing pair gets the message prepended, its unread count bumped and
    /// its dedup key replaced by the event's key. `display_name` replaces the
    /// stored name unless it is the placeholder.
    pub fn upsert(&mut self, event: RawEvent, display_name: &str) -> Thread {
        let key = event.thread_key();
        let message = Message {
            timestamp: event.occurred_at,
            body: event.body,
        };

        if let Some(&id) = self.by_key.get(&key)
            && let Some(record) = self.records.get_mut(&id)
        {
            record.messages.push_front(message);
            record.unread_count = record.unread_count.saturating_add(1);
            record.dedup_key = event.dedup_key;
            if display_name != UNKNOWN_DISPLAY_NAME && record.display_name != display_name {
                record.display_name = display_name.to_owned();
            }
            return record.snapshot(id);
        }

        let id = ThreadId(self.next_id);
        self.next_id += 1;

        let record = ThreadRecord {
            key: key.clone(),
            display_name: display_name.to_owned(),
            messages: VecDeque::from([message]),
            unread_count: 1,
            dedup_key: event.dedup_key,
        };
        let snapshot = record.snapshot(id);
        self.records.insert(id, record);
        self.by_key.insert(key, id);
        snapshot
    }

    /// Zero the unread count of a thread. Idempotent.
    ///
    /// Returns `None` for an unknown id.
    pub fn mark_read(&mut self, id: ThreadId) -> Option<ReadAck> {
        let record = self.records.get_mut(&id)?;
        let cleared = record.unread_count;
        record.unread_count = 0;
        Some(ReadAck {
            thread_id: id,
            dedup_key: record.dedup_key.clone(),
            cleared,
        })
    }

    /// Remove every thread whose unread count is zero.
    ///
    /// Returns the removed ids in ascending order.
    pub fn sweep_remove_read(&mut self) -> Vec<ThreadId> {
        let removed: Vec<ThreadId> = self
            .records
            .iter()
            .filter(|(_, r)| r.unread_count == 0)
            .map(|(&id, _)| id)
            .collect();

        for id in &removed {
            if let Some(record) = self.records.remove(id) {
                self.by_key.remove(&record.key);
            }
        }
        removed
    }

    /// All threads, most recent message first.
    ///
    /// Equal timestamps fall back to ascending id, so repeated reads of the
    /// same state always agree.
    pub fn snapshot_ordered_by_recency(&self) -> Vec<Thread> {
        let mut ordered: Vec<(&ThreadId, &ThreadRecord)> = self.records.iter().collect();
        // Stable sort over id-ordered input keeps the id tie-break.
        ordered.sort_by(|a, b| b.1.latest_at().cmp(&a.1.latest_at()));
        ordered
            .into_iter()
            .map(|(&id, record)| record.snapshot(id))
            .collect()
    }

    pub fn get(&self, id: ThreadId) -> Option<Thread> {
        self.records.get(&id).map(|r| r.snapshot(id))
    }

    pub fn find(&self, source_id: &str, sender: &str) -> Option<ThreadId> {
        self.by_key.get(&ThreadKey::new(source_id, sender)).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_unread(&self) -> u64 {
        self.records.values().map(|r| u64::from(r.unread_count)).sum()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
