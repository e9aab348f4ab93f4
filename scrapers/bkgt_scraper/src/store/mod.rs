use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::types::{RecordFields, RecordType, ScrapeRun, StoredRecord};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// One relational table per record type, addressed by row id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All rows of a type, ordered by id.
    async fn list(&self, record_type: RecordType) -> Result<Vec<StoredRecord>, PersistenceError>;
    async fn insert(&self, record_type: RecordType, fields: &RecordFields) -> Result<i64, PersistenceError>;
    async fn update(&self, record_type: RecordType, id: i64, fields: &RecordFields) -> Result<(), PersistenceError>;
    async fn delete(&self, record_type: RecordType, id: i64) -> Result<(), PersistenceError>;
}

/// Append-only scrape run log.
#[async_trait]
pub trait RunLogStore: Send + Sync {
    async fn append(&self, run: &ScrapeRun) -> Result<i64, PersistenceError>;
    /// Newest first.
    async fn recent(&self, limit: i64, record_type: Option<RecordType>) -> Result<Vec<ScrapeRun>, PersistenceError>;
}
