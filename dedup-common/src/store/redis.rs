use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::time::timeout;
use tracing::info;

use super::{DedupStore, StoreError};

// Keys requested per SCAN round trip, and per DEL command.
const SCAN_COUNT: usize = 500;
const DELETE_BATCH_SIZE: usize = 500;

pub struct RedisStore {
    connection: MultiplexedConnection,
    response_timeout: Duration,
}

impl RedisStore {
    /// Connect to redis and check the server answers a PING.
    ///
    /// Every command is bounded by `response_timeout`, which must not be zero.
    pub async fn new(addr: String, response_timeout: Duration) -> Result<RedisStore, StoreError> {
        if response_timeout.is_zero() {
            return Err(StoreError::InvalidConfiguration(
                "redis response timeout cannot be zero".to_owned(),
            ));
        }

        let client = redis::Client::open(addr.as_str())?;
        let connection = timeout(response_timeout, client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| StoreError::Timeout)??;

        let store = RedisStore {
            connection,
            response_timeout,
        };
        store.ping().await?;
        info!("connected to redis at {}", addr);

        Ok(store)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let pong: String = timeout(
            self.response_timeout,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        match pong.as_str() {
            "PONG" => Ok(()),
            other => Err(StoreError::Unavailable(format!(
                "unexpected PING reply: {other}"
            ))),
        }
    }
}

/// Escape the glob metacharacters of a literal prefix so SCAN MATCH only
/// returns keys that really start with it.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl DedupStore for RedisStore {
    async fn set_if_absent(&self, key: String, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;

        // SET with both NX and PX options, so creation and expiry are one atomic command
        let result: Option<String> = timeout(
            self.response_timeout,
            redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("PX")
                .arg(ttl_ms)
                .arg("NX")
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(result.is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let pattern = match_pattern(prefix);
        let mut cursor: u64 = 0;
        // SCAN may return a key more than once while the keyspace is rehashing
        let mut keys = BTreeSet::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = timeout(
                self.response_timeout,
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn),
            )
            .await
            .map_err(|_| StoreError::Timeout)??;

            keys.extend(batch);

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        Ok(keys.into_iter().collect())
    }

    async fn delete(&self, keys: Vec<String>) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let mut deleted = 0;

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let removed: u64 = timeout(
                self.response_timeout,
                redis::cmd("DEL").arg(chunk).query_async(&mut conn),
            )
            .await
            .map_err(|_| StoreError::Timeout)??;
            deleted += removed;
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_pattern_escapes_glob_characters() {
        assert_eq!(match_pattern("unique-id:"), "unique-id:*");
        assert_eq!(match_pattern("ids[a]*?:"), "ids\\[a\\]\\*\\?:*");
    }

    #[tokio::test]
    async fn zero_response_timeout_is_rejected() {
        let result = RedisStore::new("redis://localhost:6379/".to_string(), Duration::ZERO).await;

        assert!(matches!(result, Err(StoreError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let result =
            RedisStore::new("not-a-redis-url".to_string(), Duration::from_millis(100)).await;

        assert!(result.is_err());
    }
}
