//! Per-key serialization of structural creation
//!
//! The upsert pipeline reads an index and creates a node when the read came
//! back empty. Two writers racing on the same missing key would both create
//! one. [`KeyLocks`] closes that window: the creator of a key holds the
//! key's lock across the whole find-or-create execution.
//!
//! A [`KeyGuard`] is owned and `'static`, so it can travel with an execution
//! into the store's completion callback. A caller whose bridged wait timed
//! out therefore leaves the key locked until the orphaned execution really
//! finishes, and the next writer on that key waits for it instead of racing.
//!
//! Locks are striped by FNV hash so memory stays bounded however many keys
//! are seen. Distinct keys sharing a stripe are serialized too, which costs
//! throughput but never correctness.

use crate::error::{GraphError, Result};
use fnv::FnvHasher;
use std::hash::Hasher;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Default)]
struct Stripe {
    held: Mutex<bool>,
    released: Condvar,
}

impl Stripe {
    fn state(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct KeyLocks {
    stripes: Vec<Stripe>,
}

impl KeyLocks {
    /// `stripes` is clamped to at least one
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Stripe::default()).collect(),
        }
    }

    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_for(&self, key: &str) -> usize {
        let mut hasher = FnvHasher::default();
        hasher.write(key.as_bytes());
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Wait until the key's stripe is free and hold it until the guard drops
    ///
    /// `None` waits forever. A stripe still held when the timeout expires
    /// fails with `StoreUnavailable`, the same error a hung store gives.
    /// Holding two guards at once can deadlock when both keys hash to the
    /// same stripe; callers lock one key at a time.
    pub fn acquire(self: &Arc<Self>, key: &str, timeout: Option<Duration>) -> Result<KeyGuard> {
        let stripe = self.stripe_for(key);
        let deadline = timeout.map(|t| Instant::now() + t);
        let slot = &self.stripes[stripe];
        let mut held = slot.state();

        while *held {
            held = match deadline {
                None => slot
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(GraphError::StoreUnavailable(format!(
                            "Timed out after {:?} waiting for in-flight work on {:?}",
                            timeout.unwrap_or_default(),
                            key
                        )));
                    }
                    slot.released
                        .wait_timeout(held, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        *held = true;
        trace!(key, stripe, "Key lock acquired");

        Ok(KeyGuard {
            locks: Arc::clone(self),
            stripe,
        })
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Held stripe, released on drop from whichever thread drops it
pub struct KeyGuard {
    locks: Arc<KeyLocks>,
    stripe: usize,
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("stripe", &self.stripe).finish()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let slot = &self.locks.stripes[self.stripe];
        *slot.state() = false;
        slot.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_key_same_stripe() {
        let locks = KeyLocks::new(16);
        assert_eq!(locks.stripe_for("soft/a.b.c"), locks.stripe_for("soft/a.b.c"));
        assert!(locks.stripe_for("soft/x") < 16);
    }

    #[test]
    fn test_zero_stripes_clamped() {
        let locks = Arc::new(KeyLocks::new(0));
        assert_eq!(locks.stripes(), 1);
        let _guard = locks.acquire("anything", None).unwrap();
    }

    #[test]
    fn test_lock_excludes_concurrent_holders() {
        let locks = Arc::new(KeyLocks::new(4));
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let _guard = locks.acquire("soft/a.b.c", None).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_held_key_times_out() {
        let locks = Arc::new(KeyLocks::new(1));
        let guard = locks.acquire("soft/a", None).unwrap();
        let err = locks
            .acquire("soft/a", Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, GraphError::StoreUnavailable(ref m) if m.contains("in-flight")));

        drop(guard);
        assert!(locks.acquire("soft/a", Some(Duration::from_millis(20))).is_ok());
    }

    #[test]
    fn test_guard_released_from_another_thread() {
        let locks = Arc::new(KeyLocks::new(2));
        let guard = locks.acquire("soft/a", None).unwrap();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
        });
        let _again = locks.acquire("soft/a", Some(Duration::from_secs(5))).unwrap();
        handle.join().unwrap();
    }
}
