//! # In-Memory Keyspace
//!
//! A single-lock map with lazy, access-time expiry. Enough for tests and
//! local experiments; not tuned for contention.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    // Absolute expiration timestamp.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Shared keyspace.
#[derive(Debug, Default)]
pub struct Db {
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
}

impl Db {
    pub fn new() -> Self {
        Db::default()
    }

    /// Returns the live value for `key`, dropping it first if expired.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = entries.get(key)?.is_expired(now);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Stores `value`, replacing any previous value and expiry.
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().insert(key, Entry { value, expires_at });
    }

    /// Removes `key`; returns true when a live entry was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        match self.entries.lock().remove(key) {
            Some(entry) => !entry.is_expired(now),
            None => false,
        }
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Number of stored entries, expired ones included until touched.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
