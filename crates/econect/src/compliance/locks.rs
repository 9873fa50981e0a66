use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Per-key mutual exclusion. Entries are dropped once no caller holds them.
pub(crate) struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Copy,
{
    pub(crate) fn run<T>(&self, key: K, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one held here
        if Arc::strong_count(&lock) == 2 {
            map.remove(&key);
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn serializes_work_for_the_same_key() {
        let locks = Arc::new(KeyedLocks::<u64>::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let overlap = overlap.clone();
                thread::spawn(move || {
                    locks.run(7, || {
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(std::time::Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker finishes");
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert_eq!(locks.len(), 0, "idle keys are released");
    }
}
