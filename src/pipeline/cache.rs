//! Recognition cache keyed by image identity.
//!
//! An entry is either pending (a thread is computing it) or done. Threads
//! asking for a pending key block until it resolves, so at most one
//! computation per key is ever in flight. Failed computations are not stored.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Content address of an image: hex SHA-256 of its bytes.
pub fn image_key(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

enum Entry<V> {
    Pending,
    Done(V),
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Completed keys, oldest first
    order: VecDeque<String>,
}

/// Bounded map from image key to a computed value.
pub struct ScanCache<V> {
    inner: Mutex<Inner<V>>,
    resolved: Condvar,
    capacity: usize,
}

/// Clears a pending marker if the computation unwinds.
struct PendingGuard<'a, V> {
    cache: &'a ScanCache<V>,
    key: &'a str,
    armed: bool,
}

impl<V> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.cache.lock();
            inner.entries.remove(self.key);
            self.cache.resolved.notify_all();
        }
    }
}

impl<V> ScanCache<V> {
    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> ScanCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            resolved: Condvar::new(),
            capacity,
        }
    }

    /// Returns the completed value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.lock().entries.get(key) {
            Some(Entry::Done(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Number of completed entries.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached value for `key`, or runs `compute` to produce it.
    ///
    /// If another thread is already computing `key`, waits for it and uses
    /// its result; if that computation failed, this call computes again.
    pub fn get_or_compute<E, F>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        {
            let mut inner = self.lock();
            loop {
                match inner.entries.get(key) {
                    Some(Entry::Done(value)) => {
                        debug!("Cache hit for {}", short(key));
                        return Ok(value.clone());
                    }
                    Some(Entry::Pending) => {
                        debug!("Waiting for in-flight recognition of {}", short(key));
                        inner = self.resolved.wait(inner).unwrap_or_else(PoisonError::into_inner);
                    }
                    None => {
                        debug!("Cache miss for {}", short(key));
                        inner.entries.insert(key.to_string(), Entry::Pending);
                        break;
                    }
                }
            }
        }

        let mut guard = PendingGuard {
            cache: self,
            key,
            armed: true,
        };
        let result = compute();
        guard.armed = false;

        let mut inner = self.lock();
        match &result {
            Ok(value) => {
                inner.entries.insert(key.to_string(), Entry::Done(value.clone()));
                inner.order.push_back(key.to_string());
                while inner.order.len() > self.capacity {
                    if let Some(oldest) = inner.order.pop_front() {
                        inner.entries.remove(&oldest);
                    }
                }
            }
            Err(_) => {
                inner.entries.remove(key);
            }
        }
        self.resolved.notify_all();

        result
    }
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}
