//! # PgQueue
//!
//! A backing queue implemented on top of a PostgreSQL table, with per-message visibility
//! so that enqueue delays and dequeue leases behave like a cloud storage queue.
use std::str::FromStr;
use std::time;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::debug;

use super::{BackingQueue, QueueError, QueueMessage};

/// Connection settings applied to every endpoint of a queue when it is created.
#[derive(Debug, Clone)]
pub struct EndpointTuning {
    pub max_connections: u32,
    /// How long an idle connection is kept alive before being closed.
    pub idle_timeout: time::Duration,
    pub acquire_timeout: time::Duration,
}

impl Default for EndpointTuning {
    fn default() -> Self {
        Self {
            max_connections: 50,
            idle_timeout: time::Duration::from_secs(90),
            acquire_timeout: time::Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgQueueConfig {
    pub account: String,
    pub name: String,
    pub primary_url: String,
    /// A read replica. When set, size and age reads go there instead of the primary.
    pub secondary_url: Option<String>,
    pub tuning: EndpointTuning,
    pub app_name: &'static str,
}

pub struct PgQueue {
    account: String,
    name: String,
    primary: PgPool,
    secondary: Option<PgPool>,
}

impl PgQueue {
    /// Initialize a new PgQueue. Pools are lazy: nothing connects until the first query.
    pub fn new(config: PgQueueConfig) -> Result<Self, QueueError> {
        let primary = build_pool(
            &config.name,
            &config.primary_url,
            &config.tuning,
            config.app_name,
        )?;
        let secondary = config
            .secondary_url
            .as_deref()
            .map(|url| build_pool(&config.name, url, &config.tuning, config.app_name))
            .transpose()?;

        debug!(
            queue = config.name,
            has_secondary = secondary.is_some(),
            max_connections = config.tuning.max_connections,
            "configured queue endpoints"
        );

        Ok(Self {
            account: config.account,
            name: config.name,
            primary,
            secondary,
        })
    }

    /// Initialize a new PgQueue from a provided connection pool.
    pub fn new_from_pool(account: &str, name: &str, pool: PgPool) -> Self {
        Self {
            account: account.to_owned(),
            name: name.to_owned(),
            primary: pool,
            secondary: None,
        }
    }

    fn monitoring_pool(&self) -> &PgPool {
        self.secondary.as_ref().unwrap_or(&self.primary)
    }

    fn query_error(&self, command: &'static str) -> impl FnOnce(sqlx::Error) -> QueueError + '_ {
        move |error| QueueError::Database {
            queue: self.name.clone(),
            command,
            error,
        }
    }
}

fn build_pool(
    queue: &str,
    url: &str,
    tuning: &EndpointTuning,
    app_name: &'static str,
) -> Result<PgPool, QueueError> {
    let options = PgConnectOptions::from_str(url)
        .map_err(|error| QueueError::Database {
            queue: queue.to_owned(),
            command: "CONNECT",
            error,
        })?
        .application_name(app_name);

    Ok(PgPoolOptions::new()
        .max_connections(tuning.max_connections)
        .idle_timeout(tuning.idle_timeout)
        .acquire_timeout(tuning.acquire_timeout)
        .test_before_acquire(true)
        .connect_lazy_with(options))
}

#[async_trait]
impl BackingQueue for PgQueue {
    fn account(&self) -> &str {
        &self.account
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(
        &self,
        payload: Vec<u8>,
        visibility_delay: time::Duration,
    ) -> Result<(), QueueError> {
        let base_query = r#"
INSERT INTO device_delete_queue
    (queue, payload, created_at, visible_at, dequeue_count)
VALUES
    ($1, $2, NOW(), NOW() + make_interval(secs => $3), 0)
        "#;

        sqlx::query(base_query)
            .bind(&self.name)
            .bind(payload)
            .bind(visibility_delay.as_secs_f64())
            .execute(&self.primary)
            .await
            .map_err(self.query_error("INSERT"))?;

        Ok(())
    }

    async fn dequeue(
        &self,
        max_count: u32,
        lease: time::Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        // The query that follows uses a FOR UPDATE SKIP LOCKED clause so concurrent consumers
        // never lease the same row. Leasing pushes visible_at forward instead of deleting.
        let base_query = r#"
WITH visible_in_queue AS (
    SELECT
        id
    FROM
        device_delete_queue
    WHERE
        queue = $1
        AND visible_at <= NOW()
    ORDER BY
        visible_at
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
UPDATE
    device_delete_queue
SET
    visible_at = NOW() + make_interval(secs => $3),
    dequeue_count = device_delete_queue.dequeue_count + 1
FROM
    visible_in_queue
WHERE
    device_delete_queue.id = visible_in_queue.id
RETURNING
    device_delete_queue.id,
    device_delete_queue.payload,
    device_delete_queue.dequeue_count
        "#;

        let rows: Vec<(i64, Vec<u8>, i32)> = sqlx::query_as(base_query)
            .bind(&self.name)
            .bind(i64::from(max_count))
            .bind(lease.as_secs_f64())
            .fetch_all(&self.primary)
            .await
            .map_err(self.query_error("UPDATE"))?;

        Ok(rows
            .into_iter()
            .map(|(id, payload, dequeue_count)| QueueMessage {
                id,
                payload,
                dequeue_count,
            })
            .collect())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        sqlx::query(
            "DELETE FROM device_delete_queue WHERE id = $1 AND queue = $2 AND dequeue_count = $3",
        )
        .bind(message.id)
        .bind(&self.name)
        .bind(message.dequeue_count)
        .execute(&self.primary)
        .await
        .map_err(self.query_error("DELETE"))?;

        Ok(())
    }

    async fn size(&self) -> Result<u64, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM device_delete_queue WHERE queue = $1")
                .bind(&self.name)
                .fetch_one(self.monitoring_pool())
                .await
                .map_err(self.query_error("SELECT"))?;

        Ok(count.max(0) as u64)
    }

    async fn oldest_message_age(&self) -> Result<Option<time::Duration>, QueueError> {
        let age_seconds: Option<f64> = sqlx::query_scalar(
            r#"
SELECT
    EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::DOUBLE PRECISION
FROM
    device_delete_queue
WHERE
    queue = $1
            "#,
        )
        .bind(&self.name)
        .fetch_one(self.monitoring_pool())
        .await
        .map_err(self.query_error("SELECT"))?;

        Ok(age_seconds.map(|seconds| time::Duration::from_secs_f64(seconds.max(0.0))))
    }
}
