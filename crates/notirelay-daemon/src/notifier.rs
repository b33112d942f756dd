//! Synchronous snapshot fan-out.
//!
//! Observers run inline, in registration order, and each call sits inside
//! its own `catch_unwind` boundary, so a panicking observer is logged and
//! skipped without affecting the others or the thread store.
//!
//! Snapshots carry a revision taken under the store lock. At most one
//! delivery round runs at a time. A publish that arrives while a round is
//! running (from another task, or from an observer mutating the store)
//! parks its snapshot; the running round stops handing out the superseded
//! one and delivers the newest before it returns. A snapshot older than one
//! already delivered is dropped. Observers therefore always finish on the
//! latest store state.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notirelay_core::Thread;

pub type Observer = Arc<dyn Fn(&[Thread]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

/// Outcome of one [`ChangeNotifier::publish`] call.
/// Counts observer calls made by this publish, including any newer
/// snapshot it delivered on behalf of a concurrent publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for PublishReport {
    fn add_assign(&mut self, rhs: Self) {
        self.delivered += rhs.delivered;
        self.failed += rhs.failed;
    }
}

struct Subscription {
    handle: SubscriptionHandle,
    name: String,
    observer: Observer,
}

#[derive(Default)]
struct Registry {
    next_handle: u64,
    subscriptions: Vec<Subscription>,
}

#[derive(Default)]
struct Delivery {
    /// Newest snapshot not yet handed to a round.
    pending: Option<(u64, Vec<Thread>)>,
    /// Revision of the snapshot the latest round started with.
    delivered: u64,
    running: bool,
}

#[derive(Default)]
pub struct ChangeNotifier {
    registry: Mutex<Registry>,
    delivery: Mutex<Delivery>,
    revision: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. `name` only appears in logs.
    pub fn subscribe<F>(&self, name: impl Into<String>, observer: F) -> SubscriptionHandle
    where
        F: Fn(&[Thread]) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.next_handle += 1;
        let handle = SubscriptionHandle(registry.next_handle);
        registry.subscriptions.push(Subscription {
            handle,
            name: name.into(),
            observer: Arc::new(observer),
        });
        handle
    }

    /// Remove an observer. Returns `false` if the handle was not registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.subscriptions.len();
        registry.subscriptions.retain(|s| s.handle != handle);
        registry.subscriptions.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscriptions
            .len()
    }

    /// Reserve the next snapshot revision. Call it inside the same store
    /// lock scope that takes the snapshot, so revisions follow mutation order.
    pub fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Deliver `snapshot` to every observer under a fresh revision.
    pub fn publish(&self, snapshot: &[Thread]) -> PublishReport {
        self.publish_revision(self.next_revision(), snapshot.to_vec())
    }

    /// Deliver the snapshot taken at `revision`.
    ///
    /// Returns without calling anyone when a newer revision was already
    /// delivered or is queued, or when another round is running (that round
    /// delivers this snapshot before it finishes). The registry lock is
    /// released before any observer runs, so observers may subscribe,
    /// unsubscribe or mutate the store; registry changes apply from the next
    /// round.
    pub fn publish_revision(&self, revision: u64, snapshot: Vec<Thread>) -> PublishReport {
        {
            let mut delivery = self.delivery();
            let queued = delivery.pending.as_ref().map_or(0, |(r, _)| *r);
            if revision <= delivery.delivered || revision < queued {
                tracing::trace!(revision, "dropped superseded snapshot");
                return PublishReport::default();
            }
            delivery.pending = Some((revision, snapshot));
            if delivery.running {
                return PublishReport::default();
            }
            delivery.running = true;
        }

        let mut report = PublishReport::default();
        loop {
            let snapshot = {
                let mut delivery = self.delivery();
                match delivery.pending.take() {
                    Some((revision, snapshot)) => {
                        delivery.delivered = revision;
                        snapshot
                    }
                    None => {
                        delivery.running = false;
                        break;
                    }
                }
            };
            report += self.deliver(&snapshot);
        }
        report
    }

    /// One round: every current observer, in order, until a newer snapshot
    /// is parked.
    fn deliver(&self, snapshot: &[Thread]) -> PublishReport {
        let targets: Vec<(String, Observer)> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .subscriptions
                .iter()
                .map(|s| (s.name.clone(), Arc::clone(&s.observer)))
                .collect()
        };

        let mut report = PublishReport::default();
        for (name, observer) in targets {
            if self.delivery().pending.is_some() {
                break;
            }
            match catch_unwind(AssertUnwindSafe(|| observer(snapshot))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    report.failed += 1;
                    tracing::error!(
                        observer = %name,
                        "observer panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        report
    }

    fn delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("observers", &self.observer_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notirelay_core::ThreadId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> Vec<Thread> {
        vec![Thread {
            id: ThreadId(1),
            source_id: "wechat".into(),
            display_name: "WeChat".into(),
            sender: "Alice".into(),
            messages: Vec::new(),
            unread_count: 0,
            dedup_key: "k1".into(),
        }]
    }

    #[test]
    fn publish_without_observers_is_noop() {
        let notifier = ChangeNotifier::new();
        assert_eq!(notifier.publish(&sample()), PublishReport::default());
    }

    #[test]
    fn observers_run_in_registration_order() {
        let notifier = ChangeNotifier::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            notifier.subscribe(label, move |_| {
                order.lock().expect("lock").push(label);
            });
        }

        let report = notifier.publish(&sample());
        assert_eq!(report.delivered, 3);
        assert_eq!(*order.lock().expect("lock"), vec!["first", "second", "third"]);
    }

    #[test]
    fn every_observer_sees_the_same_snapshot() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            notifier.subscribe("copy", move |snap: &[Thread]| {
                seen.lock().expect("lock").push(snap.to_vec());
            });
        }
        let snapshot = sample();
        notifier.publish(&snapshot);
        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|s| *s == snapshot));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = ChangeNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = {
            let calls = Arc::clone(&calls);
            notifier.subscribe("counter", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        notifier.publish(&sample());
        assert!(notifier.unsubscribe(handle));
        assert!(!notifier.unsubscribe(handle));
        notifier.publish(&sample());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.observer_count(), 0);
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let notifier = ChangeNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        notifier.subscribe("broken", |_| panic!("observer bug"));
        {
            let calls = Arc::clone(&calls);
            notifier.subscribe("healthy", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        let report = notifier.publish(&sample());
        assert_eq!(report, PublishReport { delivered: 1, failed: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Still registered and still isolated on the next publish.
        let report = notifier.publish(&sample());
        assert_eq!(report.failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn observer_may_unsubscribe_itself() {
        let notifier = Arc::new(ChangeNotifier::new());
        let handle_slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let handle = {
            let inner = Arc::clone(&notifier);
            let slot = Arc::clone(&handle_slot);
            notifier.subscribe("once", move |_| {
                if let Some(h) = slot.lock().expect("lock").take() {
                    inner.unsubscribe(h);
                }
            })
        };
        *handle_slot.lock().expect("lock") = Some(handle);

        assert_eq!(notifier.publish(&sample()).delivered, 1);
        assert_eq!(notifier.observer_count(), 0);
    }

    fn unread(n: u32) -> Vec<Thread> {
        let mut threads = sample();
        threads[0].unread_count = n;
        threads
    }

    fn recorder(notifier: &ChangeNotifier) -> Arc<Mutex<Vec<u32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        notifier.subscribe("recorder", move |snap: &[Thread]| {
            sink.lock().expect("lock").push(snap[0].unread_count);
        });
        seen
    }

    #[test]
    fn older_revision_is_not_delivered() {
        let notifier = ChangeNotifier::new();
        let seen = recorder(&notifier);
        let older = notifier.next_revision();
        let newer = notifier.next_revision();

        assert_eq!(notifier.publish_revision(newer, unread(0)).delivered, 1);
        assert_eq!(
            notifier.publish_revision(older, unread(1)),
            PublishReport::default()
        );
        assert_eq!(*seen.lock().expect("lock"), vec![0]);
    }

    #[test]
    fn publish_from_observer_supersedes_current_round() {
        let notifier = Arc::new(ChangeNotifier::new());
        {
            let inner = Arc::clone(&notifier);
            notifier.subscribe("mutator", move |snap: &[Thread]| {
                if snap[0].unread_count > 0 {
                    inner.publish(&unread(0));
                }
            });
        }
        let seen = recorder(&notifier);

        let report = notifier.publish(&unread(1));

        // The stale round stops before the recorder; the newer one reaches both.
        assert_eq!(*seen.lock().expect("lock"), vec![0]);
        assert_eq!(report.delivered, 3);
    }

    #[test]
    fn revisions_increase() {
        let notifier = ChangeNotifier::new();
        let a = notifier.next_revision();
        let b = notifier.next_revision();
        assert!(b > a);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
