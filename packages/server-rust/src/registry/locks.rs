//! Per-instance serialization.
//!
//! Every mutating lifecycle request holds the lock of its instance from the
//! existence check until its registry writes are done, so two requests for the
//! same instance never interleave. Requests for distinct instances take
//! distinct locks and proceed in parallel. Lock entries are created lazily and
//! removed when the last holder or waiter goes away.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily populated table of per-instance async mutexes.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Waits for exclusive access to one instance.
    ///
    /// The returned guard must be held across the driver call; it is an
    /// async mutex so holding it over `.await` points is fine.
    pub async fn lock(&self, instance_id: &str) -> InstanceGuard<'_> {
        let mutex = self
            .locks
            .entry(instance_id.to_string())
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;
        InstanceGuard {
            locks: self,
            instance_id: instance_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of instances with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one instance. Released on drop.
#[derive(Debug)]
pub struct InstanceGuard<'a> {
    locks: &'a InstanceLocks,
    instance_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        // Release first so the strong count below only sees waiters.
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.instance_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn entries_are_removed_after_release() {
        let locks = InstanceLocks::new();
        {
            let _guard = locks.lock("a").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn same_instance_is_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("a").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_instances_do_not_block_each_other() {
        let locks = InstanceLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
