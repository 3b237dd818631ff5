//! Keyed debouncer backed by tokio timers
//!
//! Each key has at most one pending timer. Scheduling again for the same
//! key aborts the previous timer and restarts the window, so only the last
//! action scheduled within the window runs. A generation number per key
//! guards against a timer that already woke up before it was aborted.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

struct Pending {
    generation: u64,
    abort: AbortHandle,
}

struct Slots<K> {
    next_generation: u64,
    pending: HashMap<K, Pending>,
}

pub struct Debouncer<K> {
    slots: Arc<Mutex<Slots<K>>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_generation: 0,
                pending: HashMap::new(),
            })),
        }
    }

    /// Run `action` after `delay` unless `key` is rescheduled or cancelled first
    pub fn schedule<F>(&self, handle: &Handle, key: K, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slots = self.slots.lock();
        slots.next_generation += 1;
        let generation = slots.next_generation;

        let shared = Arc::clone(&self.slots);
        let task_key = key.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut slots = shared.lock();
                match slots.pending.get(&task_key) {
                    Some(p) if p.generation == generation => {
                        slots.pending.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                action();
            }
        });

        let previous = slots.pending.insert(
            key,
            Pending {
                generation,
                abort: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            previous.abort.abort();
        }
    }

    /// Cancel the pending timer for `key`; returns true if one was pending
    pub fn cancel(&self, key: &K) -> bool {
        match self.slots.lock().pending.remove(key) {
            Some(pending) => {
                pending.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel the pending timers whose key matches `predicate`
    pub fn cancel_where<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&K) -> bool,
    {
        let mut slots = self.slots.lock();
        let mut cancelled = 0;
        slots.pending.retain(|key, pending| {
            if predicate(key) {
                pending.abort.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    /// Cancel every pending timer
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Pending> = self.slots.lock().pending.drain().map(|(_, p)| p).collect();
        for pending in &drained {
            pending.abort.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.slots.lock().pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.slots.lock().pending.len()
    }
}

impl<K> Default for Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for Debouncer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.slots.lock().pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_only_last_action_runs() {
        let debouncer = Debouncer::new();
        let handle = Handle::current();
        let fired = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let fired = Arc::clone(&fired);
            debouncer.schedule(&handle, "email", Duration::from_millis(300), move || {
                fired.lock().push(i)
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(debouncer.is_pending(&"email"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*fired.lock(), vec![2]);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_restarts() {
        let debouncer = Debouncer::new();
        let handle = Handle::current();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        debouncer.schedule(&handle, 1u8, Duration::from_millis(100), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        let c = Arc::clone(&count);
        debouncer.schedule(&handle, 1u8, Duration::from_millis(100), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent_and_cancellable() {
        let debouncer = Debouncer::new();
        let handle = Handle::current();
        let count = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b", "c"] {
            let c = Arc::clone(&count);
            debouncer.schedule(&handle, key, Duration::from_millis(10), move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(debouncer.cancel(&"b"));
        assert!(!debouncer.cancel(&"b"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(debouncer.cancel_all(), 0);
    }
}
