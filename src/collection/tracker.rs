//! Gap-fill bookkeeping
//!
//! Index lookups stay pure; a miss is recorded here instead. `FetchTracker`
//! remembers which values are missing and which were already requested, and
//! `DirtyFlag` tells the autolinker there is something to fetch.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Missing / already-requested values for one index
#[derive(Debug)]
pub struct FetchTracker<T> {
    missing: HashSet<T>,
    requested: HashSet<T>,
}

impl<T> Default for FetchTracker<T> {
    fn default() -> Self {
        Self {
            missing: HashSet::new(),
            requested: HashSet::new(),
        }
    }
}

impl<T: Eq + Hash + Clone + Ord> FetchTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup miss; returns true if the value still needs fetching
    pub fn mark(&mut self, value: &T) -> bool {
        if self.requested.contains(value) {
            return false;
        }
        self.missing.insert(value.clone())
    }

    /// Drain missing values, moving them to the requested set
    pub fn take(&mut self) -> Vec<T> {
        let mut out: Vec<T> = self.missing.drain().collect();
        out.sort();
        self.requested.extend(out.iter().cloned());
        out
    }

    pub fn has_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn is_requested(&self, value: &T) -> bool {
        self.requested.contains(value)
    }

    /// Forget a value entirely (e.g. once it is materialized)
    pub fn forget(&mut self, value: &T) {
        self.missing.remove(value);
    }
}

struct DirtyInner {
    dirty: AtomicBool,
    notify: Notify,
}

/// Process-wide "something is missing" signal
///
/// `touch` raises the flag and wakes a waiter; `take` is the pure
/// test-and-clear the poller uses.
#[derive(Clone)]
pub struct DirtyFlag {
    inner: Arc<DirtyInner>,
}

impl Default for DirtyFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl DirtyFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DirtyInner {
                dirty: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn touch(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Return the flag and clear it
    pub fn take(&self) -> bool {
        self.inner.dirty.swap(false, Ordering::SeqCst)
    }

    /// Wait until the flag is touched
    pub async fn wait(&self) {
        if self.is_dirty() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

impl std::fmt::Debug for DirtyFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyFlag")
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tracker_never_rerequests() {
        let mut tracker = FetchTracker::new();
        assert!(tracker.mark(&3));
        assert!(!tracker.mark(&3));
        assert!(tracker.mark(&1));

        assert_eq!(tracker.take(), vec![1, 3]);
        assert!(!tracker.has_missing());
        assert!(tracker.is_requested(&3));

        // Requested values are not marked again
        assert!(!tracker.mark(&3));
        assert!(tracker.take().is_empty());
    }

    #[test]
    fn test_dirty_take_clears() {
        let flag = DirtyFlag::new();
        assert!(!flag.take());
        flag.touch();
        assert!(flag.is_dirty());
        assert!(flag.take());
        assert!(!flag.is_dirty());
    }

    #[tokio::test]
    async fn test_dirty_wait_wakes_on_touch() {
        let flag = DirtyFlag::new();
        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        flag.touch();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
