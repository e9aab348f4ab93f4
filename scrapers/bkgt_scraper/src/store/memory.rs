use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{RecordStore, RunLogStore};
use crate::error::PersistenceError;
use crate::types::{RecordFields, RecordType, ScrapeRun, StoredRecord};

#[derive(Default)]
struct Tables {
    next_id: i64,
    records: HashMap<RecordType, BTreeMap<i64, StoredRecord>>,
    runs: Vec<ScrapeRun>,
}

/// In-memory store for tests and dry runs. Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, PersistenceError> {
        self.tables
            .lock()
            .map_err(|_| PersistenceError::Other("in-memory store lock poisoned".to_string()))
    }

    /// Inserts a row with an explicit id and creation date, for seeding fixtures.
    pub fn seed(
        &self,
        record_type: RecordType,
        id: i64,
        fields: RecordFields,
        created_date: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut tables = self.lock()?;
        tables.next_id = tables.next_id.max(id);
        tables.records.entry(record_type).or_default().insert(
            id,
            StoredRecord { id, fields, created_date, updated_date: created_date },
        );
        Ok(())
    }

    pub fn runs(&self) -> Result<Vec<ScrapeRun>, PersistenceError> {
        Ok(self.lock()?.runs.clone())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn list(&self, record_type: RecordType) -> Result<Vec<StoredRecord>, PersistenceError> {
        let tables = self.lock()?;
        Ok(tables
            .records
            .get(&record_type)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, record_type: RecordType, fields: &RecordFields) -> Result<i64, PersistenceError> {
        let mut tables = self.lock()?;
        tables.next_id += 1;
        let id = tables.next_id;
        let now = Utc::now();
        tables.records.entry(record_type).or_default().insert(
            id,
            StoredRecord { id, fields: fields.clone(), created_date: now, updated_date: now },
        );
        debug!(%record_type, id, "Inserted record");
        Ok(id)
    }

    async fn update(&self, record_type: RecordType, id: i64, fields: &RecordFields) -> Result<(), PersistenceError> {
        let mut tables = self.lock()?;
        let row = tables
            .records
            .get_mut(&record_type)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or(PersistenceError::NotFound { record_type, id })?;
        row.fields = fields.clone();
        row.updated_date = Utc::now();
        Ok(())
    }

    async fn delete(&self, record_type: RecordType, id: i64) -> Result<(), PersistenceError> {
        let mut tables = self.lock()?;
        tables
            .records
            .get_mut(&record_type)
            .and_then(|rows| rows.remove(&id))
            .map(|_| ())
            .ok_or(PersistenceError::NotFound { record_type, id })
    }
}

#[async_trait]
impl RunLogStore for InMemoryStore {
    async fn append(&self, run: &ScrapeRun) -> Result<i64, PersistenceError> {
        let mut tables = self.lock()?;
        let id = tables.runs.len() as i64 + 1;
        let mut run = run.clone();
        run.id = Some(id);
        tables.runs.push(run);
        Ok(id)
    }

    async fn recent(&self, limit: i64, record_type: Option<RecordType>) -> Result<Vec<ScrapeRun>, PersistenceError> {
        let tables = self.lock()?;
        let mut runs: Vec<ScrapeRun> = tables
            .runs
            .iter()
            .filter(|run| record_type.map_or(true, |t| run.scrape_type == t))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(source_id: &str) -> RecordFields {
        RecordFields {
            name: source_id.to_string(),
            source_id: Some(source_id.to_string()),
            ..RecordFields::default()
        }
    }

    #[tokio::test]
    async fn test_ids_continue_after_seeded_rows() {
        let store = InMemoryStore::new();
        store.seed(RecordType::Teams, 7, fields("P2013"), Utc::now()).unwrap();

        let id = store.insert(RecordType::Teams, &fields("P2014")).await.unwrap();
        assert_eq!(id, 8);

        let ids: Vec<i64> = store.list(RecordType::Teams).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 8]);
        assert!(store.list(RecordType::Players).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_rows() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.update(RecordType::Teams, 1, &fields("P2013")).await,
            Err(PersistenceError::NotFound { id: 1, .. })
        ));
        assert!(store.delete(RecordType::Teams, 1).await.is_err());
    }
}
