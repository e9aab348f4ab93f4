use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    types::Json,
    Row,
};
use std::collections::BTreeMap;
use tracing::info;

use super::{RecordStore, RunLogStore};
use crate::error::PersistenceError;
use crate::types::{RecordFields, RecordType, RunStatus, ScrapeRun, StoredRecord};

const SCRAPING_LOGS_TABLE: &str = "bkgt_scraping_logs";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the record and log tables when they don't exist yet.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        for record_type in RecordType::ALL {
            let table = record_type.table_name();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL DEFAULT '',
                    source_id TEXT,
                    source_url TEXT,
                    category TEXT,
                    attributes JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    created_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_date TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#
            ))
            .execute(&self.pool)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {table}_source_id_idx ON {table} (source_id)"
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {SCRAPING_LOGS_TABLE} (
                id BIGSERIAL PRIMARY KEY,
                scrape_type TEXT NOT NULL,
                status TEXT NOT NULL,
                records_processed BIGINT NOT NULL DEFAULT 0,
                records_added BIGINT NOT NULL DEFAULT 0,
                records_updated BIGINT NOT NULL DEFAULT 0,
                records_failed BIGINT NOT NULL DEFAULT 0,
                started_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                duration_ms BIGINT,
                error_message TEXT,
                source_url TEXT
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        info!("Database schema ready");
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<StoredRecord, PersistenceError> {
    let Json(attributes): Json<BTreeMap<String, String>> = row.try_get("attributes")?;
    Ok(StoredRecord {
        id: row.try_get("id")?,
        fields: RecordFields {
            name: row.try_get("name")?,
            source_id: row.try_get("source_id")?,
            source_url: row.try_get("source_url")?,
            category: row.try_get("category")?,
            attributes,
        },
        created_date: row.try_get("created_date")?,
        updated_date: row.try_get("updated_date")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<ScrapeRun, PersistenceError> {
    let scrape_type: String = row.try_get("scrape_type")?;
    let status: String = row.try_get("status")?;
    Ok(ScrapeRun {
        id: row.try_get("id")?,
        scrape_type: scrape_type.parse().map_err(PersistenceError::Other)?,
        status: status.parse::<RunStatus>().map_err(PersistenceError::Other)?,
        records_processed: row.try_get("records_processed")?,
        records_added: row.try_get("records_added")?,
        records_updated: row.try_get("records_updated")?,
        records_failed: row.try_get("records_failed")?,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms: row.try_get("duration_ms")?,
        error_message: row.try_get("error_message")?,
        source_url: row.try_get("source_url")?,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn list(&self, record_type: RecordType) -> Result<Vec<StoredRecord>, PersistenceError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, name, source_id, source_url, category, attributes, created_date, updated_date
            FROM {}
            ORDER BY id
            "#,
            record_type.table_name()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn insert(&self, record_type: RecordType, fields: &RecordFields) -> Result<i64, PersistenceError> {
        let id: i64 = sqlx::query_scalar(&format!(
            r#"
            INSERT INTO {} (name, source_id, source_url, category, attributes, created_date, updated_date)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING id
            "#,
            record_type.table_name()
        ))
        .bind(&fields.name)
        .bind(&fields.source_id)
        .bind(&fields.source_url)
        .bind(&fields.category)
        .bind(Json(&fields.attributes))
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update(&self, record_type: RecordType, id: i64, fields: &RecordFields) -> Result<(), PersistenceError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET name = $2, source_id = $3, source_url = $4, category = $5, attributes = $6, updated_date = NOW()
            WHERE id = $1
            "#,
            record_type.table_name()
        ))
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.source_id)
        .bind(&fields.source_url)
        .bind(&fields.category)
        .bind(Json(&fields.attributes))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound { record_type, id });
        }
        Ok(())
    }

    async fn delete(&self, record_type: RecordType, id: i64) -> Result<(), PersistenceError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", record_type.table_name()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound { record_type, id });
        }
        Ok(())
    }
}

#[async_trait]
impl RunLogStore for PgStore {
    async fn append(&self, run: &ScrapeRun) -> Result<i64, PersistenceError> {
        let id: i64 = sqlx::query_scalar(&format!(
            r#"
            INSERT INTO {SCRAPING_LOGS_TABLE} (
                scrape_type, status, records_processed, records_added, records_updated,
                records_failed, started_at, completed_at, duration_ms, error_message, source_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#
        ))
        .bind(run.scrape_type.as_str())
        .bind(run.status.as_str())
        .bind(run.records_processed)
        .bind(run.records_added)
        .bind(run.records_updated)
        .bind(run.records_failed)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.duration_ms)
        .bind(&run.error_message)
        .bind(&run.source_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn recent(&self, limit: i64, record_type: Option<RecordType>) -> Result<Vec<ScrapeRun>, PersistenceError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, scrape_type, status, records_processed, records_added, records_updated,
                   records_failed, started_at, completed_at, duration_ms, error_message, source_url
            FROM {SCRAPING_LOGS_TABLE}
            WHERE $1::TEXT IS NULL OR scrape_type = $1
            ORDER BY started_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(record_type.map(|t| t.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(run_from_row).collect()
    }
}
