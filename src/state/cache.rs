//! Capacity-bounded mirror of stored values.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::value::Value;

/// Which entry to drop when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently read or written.
    #[default]
    Lru,
    /// Oldest insertion, regardless of reads.
    Insertion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(value: Value, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { value, expires_at }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Write-through cache keyed by rendered storage keys. Expired entries are
/// dropped lazily when read.
#[derive(Debug)]
pub struct StateCache {
    capacity: usize,
    policy: EvictionPolicy,
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl StateCache {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        tracing::debug!(capacity, policy = %policy, "Creating new StateCache");
        Self {
            capacity: capacity.max(1),
            policy,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[tracing::instrument(skip(self), fields(cache_size = self.entries.len()))]
    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired() {
            tracing::debug!(key, "Cache entry expired");
            self.remove(key);
            return None;
        }
        if self.policy == EvictionPolicy::Lru {
            self.touch(key);
        }
        Some(entry)
    }

    #[tracing::instrument(skip(self, entry), fields(cache_size = self.entries.len()))]
    pub fn insert(&mut self, key: &str, entry: CacheEntry) {
        if self.entries.contains_key(key) {
            if self.policy == EvictionPolicy::Lru {
                self.touch(key);
            }
        } else {
            while self.entries.len() >= self.capacity {
                if !self.evict_one() {
                    break;
                }
            }
            self.order.push_back(key.to_string());
        }
        self.entries.insert(key.to_string(), entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn evict_one(&mut self) -> bool {
        match self.order.pop_front() {
            Some(key) => {
                tracing::debug!(key = %key, policy = %self.policy, "Evicting cache entry");
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }
}
