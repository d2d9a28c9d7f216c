//! # Message Cache
//!
//! Collects one payload per sender for each event key and reports when
//! enough fresh ones have arrived to aggregate.
//!
//! Timestamps are Unix milliseconds supplied by the caller, so the cache
//! itself has no clock.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
struct Entry<S> {
    created_ms: u64,
    /// Set once `ready` returned true with `once`.
    fired: bool,
    /// Latest payload per sender and when it arrived.
    payloads: HashMap<S, (u64, Vec<u8>)>,
}

#[derive(Debug)]
pub struct MessageCache<K, S> {
    entries: HashMap<K, Entry<S>>,
}

impl<K, S> Default for MessageCache<K, S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, S> MessageCache<K, S>
where
    K: Eq + Hash + Clone,
    S: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` from `sender`, replacing its previous one. Returns the
    /// creation time of the key's entry.
    pub fn insert(&mut self, key: K, sender: S, now_ms: u64, payload: Vec<u8>) -> u64 {
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            created_ms: now_ms,
            fired: false,
            payloads: HashMap::new(),
        });
        entry.payloads.insert(sender, (now_ms, payload));
        entry.created_ms
    }

    /// Whether at least `min_count` senders delivered a payload at or after
    /// `min_ts_ms`, together with those payloads.
    ///
    /// With `once`, a key reports ready at most one time.
    pub fn ready(
        &mut self,
        key: &K,
        min_count: u32,
        min_ts_ms: u64,
        once: bool,
    ) -> (bool, Vec<Vec<u8>>) {
        let Some(entry) = self.entries.get_mut(key) else {
            return (false, Vec::new());
        };
        if once && entry.fired {
            return (false, Vec::new());
        }
        let fresh: Vec<Vec<u8>> = entry
            .payloads
            .values()
            .filter(|(ts, _)| *ts >= min_ts_ms)
            .map(|(_, p)| p.clone())
            .collect();
        if fresh.len() < min_count as usize {
            return (false, Vec::new());
        }
        if once {
            entry.fired = true;
        }
        (true, fresh)
    }

    pub fn delete(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop every key created before `cutoff_ms`. Returns how many were dropped.
    pub fn delete_older_than(&mut self, cutoff_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.created_ms >= cutoff_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
