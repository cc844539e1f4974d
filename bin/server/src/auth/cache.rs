//! In-process cache of recent token verification results.
//!
//! Entries are keyed by token digest and expire after a fixed TTL. Expired
//! entries are swept on every insert, so the map stays bounded by the number
//! of distinct tokens seen within one TTL window.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::store::token_digest;

/// Default lifetime of a cached verification result.
pub const DEFAULT_TTL_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    valid: bool,
    verified_at: DateTime<Utc>,
}

/// Token verification cache shared by all requests.
#[derive(Debug)]
pub struct TokenVerificationCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for TokenVerificationCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECONDS))
    }
}

impl TokenVerificationCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached result for `token`, or `None` if absent or expired.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<bool> {
        self.get_at(token, Utc::now())
    }

    #[must_use]
    pub fn get_at(&self, token: &str, now: DateTime<Utc>) -> Option<bool> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&token_digest(token))
            .filter(|entry| now - entry.verified_at < self.ttl)
            .map(|entry| entry.valid)
    }

    /// Records a verification result. Overwrites any previous entry.
    pub fn put(&self, token: &str, valid: bool) {
        self.put_at(token, valid, Utc::now());
    }

    pub fn put_at(&self, token: &str, valid: bool, now: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| now - entry.verified_at < self.ttl);
        entries.insert(
            token_digest(token),
            CacheEntry {
                valid,
                verified_at: now,
            },
        );
    }

    /// Drops the entry for `token`, e.g. after logout or rotation.
    pub fn invalidate(&self, token: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&token_digest(token));
    }

    /// Number of entries currently held, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
