//! Source allow-list with atomic wholesale replacement.
//!
//! The current set lives behind a `tokio::sync::watch` slot. A check borrows
//! one complete set; a reload swaps in a whole new `Arc`, so a concurrent
//! check observes either the old or the new set, never a mix.
//!
//! An unloaded filter rejects every source.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;

use crate::settings::SettingsError;

pub type EligibilitySet = HashSet<String>;

/// Supplies the persisted allow-list.
pub trait EligibilityLoader: Send + Sync {
    fn load_eligibility_set(&self) -> Result<EligibilitySet, SettingsError>;
}

impl<T: EligibilityLoader + ?Sized> EligibilityLoader for &T {
    fn load_eligibility_set(&self) -> Result<EligibilitySet, SettingsError> {
        (**self).load_eligibility_set()
    }
}

#[derive(Debug)]
pub struct EligibilityFilter {
    current: watch::Sender<Option<Arc<EligibilitySet>>>,
}

impl EligibilityFilter {
    /// A filter with no set loaded yet (fail-closed).
    pub fn unloaded() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub fn with_set(set: EligibilitySet) -> Self {
        let (current, _) = watch::channel(Some(Arc::new(set)));
        Self { current }
    }

    /// Load from `loader`; a failed load leaves the filter unloaded.
    pub fn from_loader<L: EligibilityLoader + ?Sized>(loader: &L) -> Self {
        match loader.load_eligibility_set() {
            Ok(set) => {
                tracing::info!("eligibility set loaded: {} sources", set.len());
                Self::with_set(set)
            }
            Err(e) => {
                tracing::warn!("eligibility set unavailable, all sources ineligible: {e}");
                Self::unloaded()
            }
        }
    }

    pub fn is_eligible(&self, source_id: &str) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|set| set.contains(source_id))
    }

    pub fn is_loaded(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Replace the whole set.
    pub fn replace(&self, set: EligibilitySet) {
        self.current.send_replace(Some(Arc::new(set)));
    }

    /// Re-read from `loader` and swap the result in.
    ///
    /// On failure the current set stays in place. Returns the new set size.
    pub fn reload<L: EligibilityLoader + ?Sized>(&self, loader: &L) -> Result<usize, SettingsError> {
        let set = loader.load_eligibility_set()?;
        let len = set.len();
        self.replace(set);
        tracing::info!("eligibility set reloaded: {len} sources");
        Ok(len)
    }

    /// The set in effect right now, if any.
    pub fn current(&self) -> Option<Arc<EligibilitySet>> {
        self.current.borrow().clone()
    }
}

impl Default for EligibilityFilter {
    fn default() -> Self {
        Self::unloaded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn set(ids: &[&str]) -> EligibilitySet {
        ids.iter().map(|s| (*s).to_owned()).collect()
    }

    struct Fixed(Result<EligibilitySet, ()>);

    impl EligibilityLoader for Fixed {
        fn load_eligibility_set(&self) -> Result<EligibilitySet, SettingsError> {
            self.0.clone().map_err(|()| SettingsError::Io {
                path: PathBuf::from("/nonexistent/settings.json"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    #[test]
    fn unloaded_filter_rejects_everything() {
        let filter = EligibilityFilter::unloaded();
        assert!(!filter.is_loaded());
        assert!(!filter.is_eligible("com.tencent.mm"));
        assert!(!filter.is_eligible(""));
    }

    #[test]
    fn loaded_filter_checks_membership() {
        let filter = EligibilityFilter::with_set(set(&["wechat", "line"]));
        assert!(filter.is_eligible("wechat"));
        assert!(filter.is_eligible("line"));
        assert!(!filter.is_eligible("mail"));
    }

    #[test]
    fn replace_is_wholesale() {
        let filter = EligibilityFilter::with_set(set(&["a", "b"]));
        filter.replace(set(&["c"]));
        assert!(!filter.is_eligible("a"));
        assert!(!filter.is_eligible("b"));
        assert!(filter.is_eligible("c"));
    }

    #[test]
    fn failed_initial_load_fails_closed() {
        let filter = EligibilityFilter::from_loader(&Fixed(Err(())));
        assert!(!filter.is_loaded());
        assert!(!filter.is_eligible("wechat"));
    }

    #[test]
    fn failed_reload_keeps_current_set() {
        let filter = EligibilityFilter::from_loader(&Fixed(Ok(set(&["wechat"]))));
        assert!(filter.reload(&Fixed(Err(()))).is_err());
        assert!(filter.is_eligible("wechat"));
    }

    #[test]
    fn reload_reports_size() {
        let filter = EligibilityFilter::unloaded();
        let n = filter
            .reload(&Fixed(Ok(set(&["a", "b", "c"]))))
            .expect("reload");
        assert_eq!(n, 3);
        assert!(filter.is_loaded());
    }

    #[test]
    fn concurrent_checks_see_whole_sets() {
        // Sets alternate between {a0..a9} and {b0..b9}; a reader must never
        // see members of both in one borrowed snapshot.
        let a: EligibilitySet = (0..10).map(|i| format!("a{i}")).collect();
        let b: EligibilitySet = (0..10).map(|i| format!("b{i}")).collect();
        let filter = Arc::new(EligibilityFilter::with_set(a.clone()));

        let writer = {
            let filter = Arc::clone(&filter);
            std::thread::spawn(move || {
                for i in 0..500 {
                    filter.replace(if i % 2 == 0 { b.clone() } else { a.clone() });
                }
            })
        };

        for _ in 0..500 {
            let current = filter.current().expect("loaded");
            let has_a = current.iter().any(|s| s.starts_with('a'));
            let has_b = current.iter().any(|s| s.starts_with('b'));
            assert!(has_a ^ has_b);
            assert_eq!(current.len(), 10);
        }
        writer.join().expect("writer thread");
    }
}
