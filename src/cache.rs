//! In-memory TTL cache for API responses.
//!
//! `get` never returns an expired entry, but expired entries are kept in
//! the map until an occasional prune on write: `get_stale` deliberately
//! ignores expiry so callers can serve better-than-nothing data when the
//! backend is down, and an eager eviction on read would destroy exactly
//! the entries that fallback path needs.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// A cached value with expiration time.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> CacheEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Keyed response cache with per-entry TTL.
#[derive(Debug)]
pub struct ResponseCache<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    /// Prune expired entries on write once the map grows past this.
    prune_threshold: usize,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            prune_threshold: 256,
        }
    }

    /// Get a live value. Expired entries are skipped but kept in the map
    /// so [`get_stale`](Self::get_stale) can still see them.
    pub fn get(&self, key: &str) -> Option<T> {
        let guard = self.entries.read().ok()?;
        match guard.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Get a value even if expired. Used for the stale-cache fallback.
    pub fn get_stale(&self, key: &str) -> Option<T> {
        self.entries
            .read()
            .ok()
            .and_then(|guard| guard.get(key).map(|e| e.value.clone()))
    }

    /// Store a value with the given TTL.
    pub fn set(&self, key: &str, value: T, ttl: Duration) {
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(key.to_string(), CacheEntry::new(value, ttl));
            if guard.len() > self.prune_threshold {
                guard.retain(|_, entry| !entry.is_expired());
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }

    /// Number of entries physically present, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for ResponseCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic fingerprint of a logical request: SHA-256 over the
/// endpoint path and the canonical JSON body. Identical requests collide;
/// distinct requests collide only with cryptographic improbability.
pub fn fingerprint(endpoint: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.as_bytes());
    hasher.update(b"\n");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}
