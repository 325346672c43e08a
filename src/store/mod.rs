//! TTL-capable key-value stores holding flood control state.
//!
//! The limiter only ever needs two operations, so the store is abstracted
//! behind the [`StateStore`] trait. Production uses Redis; tests and offline
//! runs use the process-local [`InMemoryStore`].

mod memory;
mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no value (never written, or expired)
    #[error("Key not found")]
    NotFound,

    /// The Redis client reported a failure
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The store did not answer within the configured command timeout
    #[error("Store command timed out")]
    Timeout,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// A key-value store with per-key expiration.
///
/// Implementations must be safe for concurrent use. Neither operation is
/// expected to be transactional with the other.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    ///
    /// A zero `ttl` stores the value without expiry.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Load the value stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<String, StoreError>;
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis server (default)
    #[default]
    Redis,
    /// Process-local map, state is lost on exit
    Memory,
}
