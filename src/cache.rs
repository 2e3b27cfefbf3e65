//! # Read Cache
//!
//! A bounded LRU map with load-through semantics, used by the chain for
//! headers, bodies, per-block tx-id indexes, and receipt vectors (one
//! independent instance per value family, each with its own capacity).
//!
//! ## Single-flight loads
//!
//! [`Cache::get_or_load`] guarantees that concurrent misses on the same
//! key run the loader at most once: the first caller becomes the leader
//! and loads, everyone else parks on a condvar and receives the
//! leader's value. A failed load caches nothing; one parked caller is
//! promoted and runs its own loader, the leader gets its error back.
//!
//! Values are handed out as `Arc<V>`: eviction drops the cache's handle
//! without invalidating handles already held by callers.

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Condvar, Mutex};

use crate::error::Result;

enum FlightState<V> {
    Pending,
    Done(Arc<V>),
    Failed,
}

/// One in-flight load, shared between the leader and its waiters.
struct Flight<V> {
    state: Mutex<FlightState<V>>,
    cond: Condvar,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            cond: Condvar::new(),
        }
    }

    fn finish(&self, outcome: Option<Arc<V>>) {
        let mut state = self.state.lock();
        *state = match outcome {
            Some(value) => FlightState::Done(value),
            None => FlightState::Failed,
        };
        self.cond.notify_all();
    }
}

/// Bounded, internally synchronised LRU cache with single-flight
/// load-through.
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    map: Mutex<LruCache<K, Arc<V>>>,
    pending: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be non-zero");
        Self {
            map: Mutex::new(LruCache::new(capacity)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, or load it through `loader`.
    ///
    /// On a hit the stored value is returned and the entry is touched.
    /// On a miss the loader runs (once across concurrent callers, see
    /// the module docs) and its non-error result is stored. Errors are
    /// returned to the caller that observed them and are never cached.
    pub fn get_or_load<F>(&self, key: &K, loader: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        // FnOnce can only be consumed on the leader path, which always
        // returns; waiters that loop back still hold their loader.
        let mut loader = Some(loader);

        loop {
            if let Some(hit) = self.map.lock().get(key) {
                return Ok(hit.clone());
            }

            let (flight, is_leader) = {
                let mut pending = self.pending.lock();
                match pending.get(key) {
                    Some(flight) => (flight.clone(), false),
                    None => {
                        // A finished leader fills the map before it
                        // clears its pending entry, so re-check the map
                        // here to avoid a redundant load.
                        if let Some(hit) = self.map.lock().get(key) {
                            return Ok(hit.clone());
                        }
                        let flight = Arc::new(Flight::new());
                        pending.insert(key.clone(), flight.clone());
                        (flight.clone(), true)
                    }
                }
            };

            if !is_leader {
                let mut state = flight.state.lock();
                while matches!(*state, FlightState::Pending) {
                    flight.cond.wait(&mut state);
                }
                match &*state {
                    FlightState::Done(value) => return Ok(value.clone()),
                    // Leader failed: retry from the top, possibly as
                    // the new leader.
                    FlightState::Failed => continue,
                    FlightState::Pending => unreachable!(),
                }
            }

            // Leader path: run the loader with no cache locks held.
            let run = loader.take().expect("leader consumes the loader once");
            match run() {
                Ok(value) => {
                    let value = Arc::new(value);
                    self.map.lock().put(key.clone(), value.clone());
                    self.pending.lock().remove(key);
                    flight.finish(Some(value.clone()));
                    return Ok(value);
                }
                Err(err) => {
                    self.pending.lock().remove(key);
                    flight.finish(None);
                    return Err(err);
                }
            }
        }
    }

    /// Insert a value directly, bypassing any loader. Used by the write
    /// path to warm the cache after a batch commit.
    pub fn insert(&self, key: K, value: V) {
        self.map.lock().put(key, Arc::new(value));
    }

    /// Whether `key` is currently cached (does not touch recency).
    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        self.map.lock().peek(key).is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn miss_loads_then_hits() {
        let cache: Cache<u32, String> = Cache::new(8);
        let calls = AtomicUsize::new(0);

        let v = cache
            .get_or_load(&1, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("one".to_string())
            })
            .unwrap();
        assert_eq!(*v, "one");

        // Second call must not invoke the loader again.
        let v = cache
            .get_or_load(&1, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("two".to_string())
            })
            .unwrap();
        assert_eq!(*v, "one");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loader_error_is_not_cached() {
        let cache: Cache<u32, String> = Cache::new(8);

        let err = cache
            .get_or_load(&1, || Err::<String, _>(ChainError::NotFound))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!cache.contains(&1));

        // A later load can still succeed.
        let v = cache.get_or_load(&1, || Ok("ok".to_string())).unwrap();
        assert_eq!(*v, "ok");
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache: Cache<u32, u32> = Cache::new(2);
        cache.insert(1, 10);
        cache.insert(2, 20);

        // Touch 1 so 2 becomes the eviction candidate.
        cache.get_or_load(&1, || unreachable!()).unwrap();
        cache.insert(3, 30);

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn insert_overwrites() {
        let cache: Cache<u32, u32> = Cache::new(2);
        cache.insert(1, 10);
        cache.insert(1, 11);
        assert_eq!(*cache.get_or_load(&1, || unreachable!()).unwrap(), 11);
    }

    #[test]
    fn concurrent_misses_run_one_loader() {
        const READERS: usize = 8;

        let cache: Arc<Cache<u32, u32>> = Arc::new(Cache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(READERS));

        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let v = cache
                        .get_or_load(&42, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            // Give the other threads time to pile onto
                            // the same flight.
                            thread::sleep(Duration::from_millis(50));
                            Ok(7)
                        })
                        .unwrap();
                    assert_eq!(*v, 7);
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("reader thread should not panic");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_leader_promotes_a_waiter() {
        const READERS: usize = 4;

        let cache: Arc<Cache<u32, u32>> = Arc::new(Cache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(READERS));

        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_load(&1, || {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        // The first loader to run fails; any retry
                        // succeeds.
                        if n == 0 {
                            Err(ChainError::NotFound)
                        } else {
                            Ok(99)
                        }
                    })
                })
            })
            .collect();

        let mut ok = 0;
        let mut not_found = 0;
        for handle in handles {
            match handle.join().expect("thread should not panic") {
                Ok(v) => {
                    assert_eq!(*v, 99);
                    ok += 1;
                }
                Err(err) => {
                    assert!(err.is_not_found());
                    not_found += 1;
                }
            }
        }
        // Exactly one caller observed the failure; the rest got the
        // value from a promoted leader.
        assert_eq!(not_found, 1);
        assert_eq!(ok, READERS - 1);
        assert_eq!(*cache.get_or_load(&1, || unreachable!()).unwrap(), 99);
    }
}
