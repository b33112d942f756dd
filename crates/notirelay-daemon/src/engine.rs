//! AggregationEngine: raw event → eligibility → thread store → fan-out → relay.
//!
//! Every store operation runs under one `RwLock` scope and completes before
//! the lock is released. The snapshot handed to observers is taken inside
//! that same scope, so it reflects exactly the mutation that produced it,
//! together with a notifier revision. Publishing happens after the lock is
//! released; the revision keeps a slower publisher from overwriting a newer
//! snapshot that another task (or an observer) already published.
//! Nothing awaits while the lock is held; the relay send is the only await
//! point in [`AggregationEngine::ingest`].
//!
//! Ingestion order is the caller's order: feed events from one task (the
//! runtime funnels every capture stream through a single channel) and the
//! store applies them first-in, first-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;

use notirelay_core::{
    DateStamp, DisplayNameResolver, LabelTable, RawEvent, ReadAck, ReminderField, ReminderInput,
    Thread, ThreadId, ThreadStore, UNKNOWN_DISPLAY_NAME,
};

use crate::eligibility::EligibilityFilter;
use crate::notifier::ChangeNotifier;
use crate::relay::{RelayChannel, RelayError};

pub type SharedThreadStore = Arc<RwLock<ThreadStore>>;

// ─── Config & Outcomes ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub date_stamp: DateStamp,
    /// Upper bound on one relay send. `None` waits indefinitely.
    pub relay_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            date_stamp: DateStamp::None,
            relay_timeout: Some(Duration::from_secs(2)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    IneligibleSource,
}

#[derive(Debug)]
pub enum RelayOutcome {
    Delivered {
        frame_len: usize,
        /// Fields cut to fit the frame.
        truncated: Vec<ReminderField>,
    },
    Failed {
        error: RelayError,
    },
}

impl RelayOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug)]
pub enum IngestOutcome {
    /// No store mutation, no fan-out, no relay.
    Dropped { reason: DropReason },
    /// The thread as it stands after this event, plus the relay attempt.
    Aggregated { thread: Thread, relay: RelayOutcome },
}

// ─── Stats ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct EngineStats {
    ingested: AtomicU64,
    dropped: AtomicU64,
    relayed: AtomicU64,
    relay_failed: AtomicU64,
    truncated: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub ingested: u64,
    pub dropped: u64,
    pub relayed: u64,
    pub relay_failed: u64,
    pub truncated: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ingested: self.ingested.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            relay_failed: self.relay_failed.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ─── Engine ──────────────────────────────────────────────────────────

pub struct AggregationEngine<R> {
    store: SharedThreadStore,
    eligibility: Arc<EligibilityFilter>,
    names: Arc<dyn DisplayNameResolver>,
    notifier: Arc<ChangeNotifier>,
    relay: R,
    config: EngineConfig,
    stats: EngineStats,
}

impl<R: RelayChannel> AggregationEngine<R> {
    /// Engine with a fresh store and notifier, an empty label table and the
    /// default config.
    pub fn new(relay: R, eligibility: Arc<EligibilityFilter>) -> Self {
        Self {
            store: Arc::new(RwLock::new(ThreadStore::new())),
            eligibility,
            names: Arc::new(LabelTable::new()),
            notifier: Arc::new(ChangeNotifier::new()),
            relay,
            config: EngineConfig::default(),
            stats: EngineStats::default(),
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: SharedThreadStore) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_names(mut self, names: Arc<dyn DisplayNameResolver>) -> Self {
        self.names = names;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn eligibility(&self) -> &Arc<EligibilityFilter> {
        &self.eligibility
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ── Ingestion ────────────────────────────────────────────────────

    /// Fold one raw event into the store, fan out, and relay the thread.
    ///
    /// Ineligible sources are dropped before anything observable happens.
    /// A relay failure is logged and returned; the store mutation stands.
    pub async fn ingest(&self, event: RawEvent) -> IngestOutcome {
        if !self.eligibility.is_eligible(&event.source_id) {
            bump(&self.stats.dropped);
            tracing::debug!(source_id = %event.source_id, "dropped event from ineligible source");
            return IngestOutcome::Dropped {
                reason: DropReason::IneligibleSource,
            };
        }

        let display_name = match self.names.resolve(&event.source_id) {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!("display name degraded to placeholder: {e}");
                UNKNOWN_DISPLAY_NAME.to_owned()
            }
        };

        let (thread, snapshot) = {
            let mut store = self.write_store();
            let thread = store.upsert(event, &display_name);
            (thread, self.stamped_snapshot(&store))
        };
        bump(&self.stats.ingested);
        tracing::debug!(
            thread_id = %thread.id,
            unread = thread.unread_count,
            "event aggregated"
        );

        self.publish(snapshot);

        let relay = self.encode_and_relay(&thread).await;
        IngestOutcome::Aggregated { thread, relay }
    }

    /// Encode `thread` as a message reminder and hand it to the relay once.
    pub async fn encode_and_relay(&self, thread: &Thread) -> RelayOutcome {
        let encoded = ReminderInput::from_thread(thread, self.config.date_stamp).encode();
        if encoded.is_truncated() {
            bump(&self.stats.truncated);
            tracing::debug!(
                thread_id = %thread.id,
                "reminder fields truncated: {:?}",
                encoded.truncated
            );
        }

        let send = self.relay.send(&encoded.bytes);
        let result = match self.config.relay_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .unwrap_or(Err(RelayError::Timeout(limit))),
            None => send.await,
        };

        match result {
            Ok(()) => {
                bump(&self.stats.relayed);
                RelayOutcome::Delivered {
                    frame_len: encoded.len(),
                    truncated: encoded.truncated,
                }
            }
            Err(error) => {
                bump(&self.stats.relay_failed);
                tracing::warn!(thread_id = %thread.id, "relay failed: {error}");
                RelayOutcome::Failed { error }
            }
        }
    }

    // ── Consumption ──────────────────────────────────────────────────

    /// Mark a thread read and return the dedup key to cancel on the OS side.
    ///
    /// Observers are notified only when unread messages were actually cleared.
    pub fn mark_read(&self, id: ThreadId) -> Option<ReadAck> {
        let (ack, snapshot) = {
            let mut store = self.write_store();
            let ack = store.mark_read(id)?;
            let snapshot = (ack.cleared > 0).then(|| self.stamped_snapshot(&store));
            (ack, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.publish(snapshot);
        }
        Some(ack)
    }

    /// Remove every read thread. Call once per consumer visibility event.
    pub fn sweep_read(&self) -> Vec<ThreadId> {
        let (removed, snapshot) = {
            let mut store = self.write_store();
            let removed = store.sweep_remove_read();
            let snapshot = (!removed.is_empty()).then(|| self.stamped_snapshot(&store));
            (removed, snapshot)
        };
        if let Some(snapshot) = snapshot {
            tracing::debug!("swept {} read threads", removed.len());
            self.publish(snapshot);
        }
        removed
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Vec<Thread> {
        self.read_store().snapshot_ordered_by_recency()
    }

    pub fn thread(&self, id: ThreadId) -> Option<Thread> {
        self.read_store().get(id)
    }

    pub fn thread_count(&self) -> usize {
        self.read_store().len()
    }

    pub fn total_unread(&self) -> u64 {
        self.read_store().total_unread()
    }

    /// Snapshot plus its revision. Only call with the write guard held.
    fn stamped_snapshot(&self, store: &ThreadStore) -> (u64, Vec<Thread>) {
        (self.notifier.next_revision(), store.snapshot_ordered_by_recency())
    }

    fn publish(&self, (revision, snapshot): (u64, Vec<Thread>)) {
        self.notifier.publish_revision(revision, snapshot);
    }

    fn read_store(&self) -> RwLockReadGuard<'_, ThreadStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, ThreadStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
