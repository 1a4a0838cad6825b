use crate::{codec, Result};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Result of the store's atomic holder-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The value was replaced and its TTL reset.
    Written,
    /// Someone else holds the lease; nothing was written.
    NotHolder,
    /// The key does not exist (never created, or evicted).
    Missing,
}

/// The operations the lock needs from a shared key-value store.
///
/// Every method must be atomic at the store; the lock never layers client-side
/// locking on top.
#[async_trait]
pub trait LeaseStore: Send + Sync + std::fmt::Debug {
    /// Short name of the backend, used in `describe()`.
    fn label(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` with `ttl` only if `key` is absent. Returns whether the
    /// write happened.
    async fn create(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// In one atomic step: read the stored holder, and if it is empty or equal
    /// to `identity`, replace the value and reset the TTL.
    async fn swap_if_holder(
        &self,
        key: &str,
        identity: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<SwapOutcome>;
}

// Cap for TTLs too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl StoredEntry {
    fn new(value: &[u8], ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value: value.to_vec(),
            expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local store with per-key atomicity and TTL eviction.
///
/// Expiry follows `tokio::time`, so paused-clock tests can step past a lease.
#[derive(Debug)]
pub struct InMemoryStore {
    data: DashMap<String, StoredEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Time left before `key` is evicted, if it is present.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at.duration_since(now))
    }

    /// Overwrites `key` unconditionally. Test seeding only; the lock never
    /// calls it.
    pub fn put(&self, key: &str, value: &[u8], ttl: Duration) {
        self.data.insert(key.to_string(), StoredEntry::new(value, ttl));
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    fn label(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        // Evict lazily so an expired key reads as absent.
        self.data.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(self.data.get(key).map(|entry| entry.value.clone()))
    }

    async fn create(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredEntry::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn swap_if_holder(
        &self,
        key: &str,
        identity: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<SwapOutcome> {
        let now = Instant::now();
        // The entry guard holds the shard write lock for the whole check-and-write.
        match self.data.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(SwapOutcome::Missing),
            Entry::Occupied(occupied) if occupied.get().is_expired(now) => {
                occupied.remove();
                Ok(SwapOutcome::Missing)
            }
            Entry::Occupied(mut occupied) => {
                let holder = codec::holder_of(&occupied.get().value)?;
                if !holder.is_empty() && holder != identity {
                    return Ok(SwapOutcome::NotHolder);
                }
                occupied.insert(StoredEntry::new(value, ttl));
                Ok(SwapOutcome::Written)
            }
        }
    }
}
