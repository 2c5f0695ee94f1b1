use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, AsyncConnectionConfig};

use super::store::{DedupStore, DedupStoreError};

/// Dedup records live under `<prefix><namespace>:<device id>` and expire through `SET EX`.
pub struct RedisDedupStore {
    connection: MultiplexedConnection,
    prefix: String,
}

impl RedisDedupStore {
    pub async fn new(
        url: String,
        prefix: String,
        timeout: Duration,
    ) -> Result<Self, DedupStoreError> {
        let client = redis::Client::open(url)?;
        let config = AsyncConnectionConfig::new()
            .set_response_timeout(timeout)
            .set_connection_timeout(timeout);

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(Self { connection, prefix })
    }

    fn key(&self, namespace: &str, key: &str) -> String {
        format!("{}{}:{}", self.prefix, namespace, key)
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn get_timestamp(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<i64>, DedupStoreError> {
        let key = self.key(namespace, key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&key).await?;

        value
            .map(|value| {
                value
                    .parse::<i64>()
                    .map_err(|_| DedupStoreError::InvalidValue { key, value })
            })
            .transpose()
    }

    async fn set_timestamp(
        &self,
        namespace: &str,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), DedupStoreError> {
        let mut conn = self.connection.clone();

        // EX 0 is rejected by redis.
        conn.set_ex::<_, _, ()>(self.key(namespace, key), value, ttl.as_secs().max(1))
            .await?;

        Ok(())
    }
}
