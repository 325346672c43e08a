//! In-memory state store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::{StateStore, StoreError};
use crate::clock::{Clock, SystemClock};

/// A stored value and the instant it stops being visible.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// `None` means the entry never expires
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A process-local [`StateStore`] with Redis-like TTL semantics.
///
/// Expiry is measured against the injected [`Clock`], so tests can drive
/// eviction deterministically. Expired entries are dropped lazily on read.
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    get_calls: AtomicU64,
    set_calls: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store expiring entries against `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            get_calls: AtomicU64::new(0),
            set_calls: AtomicU64::new(0),
        }
    }

    /// Number of `get` invocations served so far.
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `set` invocations served so far.
    pub fn set_calls(&self) -> u64 {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a key without counting it as a store invocation.
    ///
    /// Lets tests plant arbitrary (including malformed) payloads.
    pub fn insert_raw(&self, key: &str, value: impl Into<String>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);

        let expires_at = if ttl.is_zero() {
            None
        } else {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
        };

        trace!(key = %key, ttl_ms = ttl.as_millis() as u64, "Storing entry");
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.clock.now();
        // Evict under the shard lock so a concurrent `set` is never lost.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));

        self.entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or(StoreError::NotFound)
    }
}
