//! Bounded store for replies nobody was waiting for
//!
//! Broadcast replies and late arrivals land here keyed by correlation id.
//! Entries expire after a fixed age; when the store outgrows its cap the
//! oldest entries are trimmed down to half of it.

use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Prune every N inserts
const PRUNE_EVERY: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub id: u64,
    pub response: Value,
    pub source: SocketAddr,
    pub received_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    max_age: Duration,
    max_entries: usize,
    /// Oldest first
    entries: VecDeque<CachedResponse>,
    inserts: u64,
}

impl ResponseCache {
    pub fn new(max_age: Duration, max_entries: usize) -> Self {
        Self {
            max_age,
            max_entries: max_entries.max(2),
            entries: VecDeque::new(),
            inserts: 0,
        }
    }

    pub fn insert(&mut self, id: u64, response: Value, source: SocketAddr) {
        self.entries.push_back(CachedResponse {
            id,
            response,
            source,
            received_at: Instant::now(),
        });
        self.inserts += 1;
        if self.inserts % PRUNE_EVERY == 0 || self.entries.len() > self.max_entries {
            self.prune();
        }
    }

    /// Drop expired entries, then trim to half the cap if still over it
    pub fn prune(&mut self) {
        let max_age = self.max_age;
        self.entries.retain(|e| e.received_at.elapsed() <= max_age);
        if self.entries.len() > self.max_entries {
            let keep = self.max_entries / 2;
            let excess = self.entries.len() - keep;
            self.entries.drain(..excess);
        }
    }

    /// Remove and return every entry for `id`, oldest first
    pub fn take(&mut self, id: u64) -> Vec<CachedResponse> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.id == id {
                taken.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        taken
    }

    /// Copy the entries for `id` received at or after `since`, oldest first
    ///
    /// Leaves the store untouched so overlapping rounds on one id each see
    /// every reply that arrived during their own window.
    pub fn since(&self, id: u64, since: Instant) -> Vec<CachedResponse> {
        self.entries
            .iter()
            .filter(|e| e.id == id && e.received_at >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.inserts = 0;
    }
}
