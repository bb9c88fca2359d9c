//! Byte-budgeted memory tier with an entity index.

use crate::codec::EncodedValue;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: EncodedValue,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    hit_count: u64,
    size_bytes: usize,
    entities: Vec<String>,
}

impl MemoryEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Eviction score; the lowest score is evicted first.
    fn score(&self, now: DateTime<Utc>) -> f64 {
        let age = seconds_between(self.created_at, now);
        let recency = seconds_between(self.last_accessed_at, now);
        (self.hit_count as f64 + 1.0) / (age + recency + 1.0)
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    ((later - earlier).num_milliseconds().max(0) as f64) / 1000.0
}

#[derive(Debug, Clone)]
pub(crate) struct MemoryHit {
    pub value: EncodedValue,
    pub created_at: DateTime<Utc>,
}

pub(crate) struct NewEntry {
    pub key: String,
    pub value: EncodedValue,
    pub entities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct MemoryTier {
    entries: DashMap<String, MemoryEntry>,
    index: DashMap<String, HashSet<String>>,
    used_bytes: AtomicUsize,
    budget_bytes: usize,
    evictions: AtomicU64,
    expirations: AtomicU64,
    // Serializes inserts so eviction sees a stable byte count.
    write_lock: Mutex<()>,
}

impl MemoryTier {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            index: DashMap::new(),
            used_bytes: AtomicUsize::new(0),
            budget_bytes,
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<MemoryHit> {
        {
            let mut entry = self.entries.get_mut(key)?;
            if !entry.is_expired(now) {
                entry.last_accessed_at = now;
                entry.hit_count += 1;
                return Some(MemoryHit {
                    value: entry.value.clone(),
                    created_at: entry.created_at,
                });
            }
        }

        if let Some((key, entry)) = self.entries.remove_if(key, |_, e| e.is_expired(now)) {
            self.release(&key, &entry);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Stores an entry, evicting low-score entries until it fits.
    ///
    /// Returns `false` when the entry alone exceeds the budget; any previous
    /// value under the same key is dropped in that case.
    pub fn insert(&self, entry: NewEntry, now: DateTime<Utc>) -> bool {
        let size_bytes = entry.key.len() + entry.value.len();
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        self.remove(&entry.key);
        if size_bytes > self.budget_bytes {
            tracing::debug!(
                key = %entry.key,
                size_bytes,
                budget_bytes = self.budget_bytes,
                "value larger than memory budget, not cached in memory"
            );
            return false;
        }

        while self.used_bytes.load(Ordering::SeqCst) + size_bytes > self.budget_bytes {
            let Some(victim) = self.lowest_score_key(now) else {
                break;
            };
            if self.remove(&victim) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %victim, "evicted cache entry");
            }
        }

        for entity in &entry.entities {
            self.index
                .entry(entity.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        self.used_bytes.fetch_add(size_bytes, Ordering::SeqCst);
        self.entries.insert(
            entry.key,
            MemoryEntry {
                value: entry.value,
                created_at: entry.created_at,
                expires_at: entry.expires_at,
                last_accessed_at: now,
                hit_count: 0,
                size_bytes,
                entities: entry.entities,
            },
        );
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((key, entry)) => {
                self.release(&key, &entry);
                true
            }
            None => false,
        }
    }

    pub fn keys_for_entity(&self, entity: &str) -> Vec<String> {
        self.index
            .get(entity)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn keys_containing(&self, pattern: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.key().contains(pattern))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut purged = 0;
        for key in expired {
            if let Some((key, entry)) = self.entries.remove_if(&key, |_, e| e.is_expired(now)) {
                self.release(&key, &entry);
                purged += 1;
            }
        }
        self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::SeqCst)
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    fn lowest_score_key(&self, now: DateTime<Utc>) -> Option<String> {
        self.entries
            .iter()
            .min_by(|a, b| a.value().score(now).total_cmp(&b.value().score(now)))
            .map(|entry| entry.key().clone())
    }

    fn release(&self, key: &str, entry: &MemoryEntry) {
        self.used_bytes.fetch_sub(entry.size_bytes, Ordering::SeqCst);
        for entity in &entry.entities {
            if let Some(mut keys) = self.index.get_mut(entity) {
                keys.remove(key);
            }
            self.index.remove_if(entity, |_, keys| keys.is_empty());
        }
    }
}
