//! Redis-backed state store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, trace};

use super::{StateStore, StoreError};
use crate::config::RedisConfig;

/// A [`StateStore`] talking to a Redis server.
///
/// Holds one multiplexed connection; each command works on a cheap clone of
/// it, so the store can be shared freely across tasks.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    command_timeout: Option<Duration>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to the server described by `config`.
    ///
    /// `command_timeout` bounds every `GET`/`SET`; `None` waits indefinitely.
    pub async fn connect(
        config: &RedisConfig,
        command_timeout: Option<Duration>,
    ) -> Result<Self, StoreError> {
        info!(
            host = %config.host,
            port = config.port,
            database = config.database,
            "Connecting to Redis"
        );

        let client = redis::Client::open(config.url())?;
        let conn = client.get_multiplexed_async_connection().await?;

        info!("Redis connection established");
        Ok(Self {
            conn,
            command_timeout,
        })
    }
}

/// Await a store command, giving up after `limit` when one is set.
async fn with_timeout<T, F>(limit: Option<Duration>, command: F) -> Result<T, StoreError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    let Some(limit) = limit else {
        return command.await.map_err(StoreError::from);
    };

    match tokio::time::timeout(limit, command).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => {
            debug!(timeout_ms = limit.as_millis() as u64, "Redis command timed out");
            Err(StoreError::Timeout)
        }
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            // Millisecond precision; a sub-millisecond TTL still gets one.
            let ttl_ms = (ttl.as_millis() as u64).max(1);
            cmd.arg("PX").arg(ttl_ms);
        }

        trace!(key = %key, ttl_ms = ttl.as_millis() as u64, "Redis SET");
        with_timeout(self.command_timeout, cmd.query_async::<()>(&mut conn)).await
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();

        trace!(key = %key, "Redis GET");
        let value = with_timeout(
            self.command_timeout,
            redis::cmd("GET")
                .arg(key)
                .query_async::<Option<String>>(&mut conn),
        )
        .await?;

        value.ok_or(StoreError::NotFound)
    }
}
