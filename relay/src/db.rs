use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::Result;
use crate::model::{Reading, StoredRecord};
use crate::store::Store;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// `pool_data` backed by PostgreSQL. The timestamp column defaults to
/// `clock_timestamp()`, so the database assigns it at commit.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct PoolDataRow {
    document: Json<Reading>,
    timestamp: DateTime<Utc>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert(&self, reading: Reading) -> Result<StoredRecord> {
        let document = reading.into_document();

        let timestamp: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO pool_data (document)
            VALUES ($1)
            RETURNING "timestamp"
            "#,
        )
        .bind(Json(&document))
        .fetch_one(&self.pool)
        .await?;

        debug!("Inserted pool_data row at {}", timestamp);
        Ok(StoredRecord {
            reading: document,
            timestamp,
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, PoolDataRow>(
            r#"
            SELECT document, "timestamp"
            FROM pool_data
            ORDER BY "timestamp" DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredRecord::new(row.document.0, row.timestamp))
            .collect())
    }
}
