use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::instrument;

use crate::reading::SensorReading;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid stored document: {0}")]
    Document(#[from] serde_json::Error),
}

/// Filters for a history lookup. `since` is an ISO-8601 UTC timestamp in
/// the same format readings are stamped with, so it compares as a string.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub sensor_type: Option<String>,
    pub sensor_id: Option<String>,
    pub since: String,
    pub limit: usize,
}

impl HistoryQuery {
    pub fn matches(&self, reading: &SensorReading) -> bool {
        self.sensor_type
            .as_ref()
            .map_or(true, |sensor_type| &reading.sensor_type == sensor_type)
            && self
                .sensor_id
                .as_ref()
                .map_or(true, |sensor_id| &reading.sensor_id == sensor_id)
            && reading.timestamp >= self.since
    }
}

#[async_trait]
pub trait ReadingStore {
    /// Create or overwrite the reading with the same id.
    async fn upsert(&self, reading: &SensorReading) -> Result<(), StoreError>;

    /// Matching readings, newest first, at most `query.limit` of them.
    async fn query(&self, query: &HistoryQuery) -> Result<Vec<SensorReading>, StoreError>;
}

#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../migrations").run(&self.pool).await
    }

    /// Round-trip to the database, for liveness checks.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    #[instrument(skip_all, fields(id = %reading.id))]
    async fn upsert(&self, reading: &SensorReading) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO sensor_readings (id, sensor_id, sensor_type, timestamp, document)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (id) DO UPDATE SET
    sensor_id = EXCLUDED.sensor_id,
    sensor_type = EXCLUDED.sensor_type,
    timestamp = EXCLUDED.timestamp,
    document = EXCLUDED.document,
    updated_at = NOW()
            "#,
        )
        .bind(&reading.id)
        .bind(&reading.sensor_id)
        .bind(&reading.sensor_type)
        .bind(&reading.timestamp)
        .bind(Json(reading))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn query(&self, query: &HistoryQuery) -> Result<Vec<SensorReading>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT document FROM sensor_readings WHERE timestamp >= ");
        builder.push_bind(query.since.clone());

        if let Some(sensor_type) = &query.sensor_type {
            builder
                .push(" AND sensor_type = ")
                .push_bind(sensor_type.clone());
        }
        if let Some(sensor_id) = &query.sensor_id {
            builder.push(" AND sensor_id = ").push_bind(sensor_id.clone());
        }

        builder
            .push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX));

        let rows: Vec<(Json<SensorReading>,)> =
            builder.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|(Json(reading),)| reading).collect())
    }
}
