//! Convergent reconciliation of scraped records against the persisted table.
//!
//! A pass runs four phases in order: upsert, duplicate resolution, staleness
//! cleanup and invalid cleanup. Running it repeatedly against the same source
//! settles on the valid, deduplicated, non-stale set regardless of how
//! corrupted the table was to begin with.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::store::RecordStore;
use crate::types::{RecordFields, RecordType, ScrapedRecord, StoredRecord};
use crate::validator::{self, source_year, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub current_year: i32,
    pub retention_years: i32,
}

impl RetentionPolicy {
    /// Oldest source year that is still kept.
    pub fn oldest_kept_year(&self) -> i32 {
        self.current_year - self.retention_years
    }

    pub fn is_stale(&self, record_type: RecordType, fields: &RecordFields) -> bool {
        fields
            .source_id()
            .and_then(|id| source_year(record_type, id))
            .map_or(false, |year| year < self.oldest_kept_year())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Fresh records skipped because they failed validation or repeated a source id.
    pub rejected: usize,
    /// Fresh records already outside the retention window; never inserted.
    pub stale_skipped: usize,
    pub duplicates_removed: usize,
    pub stale_removed: usize,
    pub invalid_removed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ReconcileSummary {
    fn record_failure(&mut self, action: &str, id: Option<i64>, err: PersistenceError) {
        let message = match id {
            Some(id) => format!("{} record {}: {}", action, id, err),
            None => format!("{} record: {}", action, err),
        };
        warn!(error = %message, "Persistence failure");
        self.failed += 1;
        self.errors.push(message);
    }
}

pub struct Reconciler<'a> {
    store: &'a dyn RecordStore,
    validator: &'a Validator,
    policy: RetentionPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn RecordStore, validator: &'a Validator, policy: RetentionPolicy) -> Self {
        Self { store, validator, policy }
    }

    /// Per-row write failures are collected in the summary; only failing to
    /// read the table aborts the pass.
    pub async fn reconcile(
        &self,
        record_type: RecordType,
        scraped: &[ScrapedRecord],
    ) -> Result<ReconcileSummary, PersistenceError> {
        let mut summary = ReconcileSummary {
            processed: scraped.len(),
            ..ReconcileSummary::default()
        };

        self.upsert(record_type, scraped, &mut summary).await?;
        self.remove_duplicates(record_type, &mut summary).await?;
        self.remove_stale(record_type, &mut summary).await?;
        self.remove_invalid(record_type, &mut summary).await?;

        info!(
            %record_type,
            processed = summary.processed,
            inserted = summary.inserted,
            updated = summary.updated,
            stale_skipped = summary.stale_skipped,
            duplicates_removed = summary.duplicates_removed,
            stale_removed = summary.stale_removed,
            invalid_removed = summary.invalid_removed,
            failed = summary.failed,
            "Reconciliation finished"
        );
        Ok(summary)
    }

    async fn upsert(
        &self,
        record_type: RecordType,
        scraped: &[ScrapedRecord],
        summary: &mut ReconcileSummary,
    ) -> Result<(), PersistenceError> {
        // Lowest id per source id; that's the row duplicate resolution keeps.
        let mut existing: HashMap<String, StoredRecord> = HashMap::new();
        for row in self.store.list(record_type).await? {
            if let Some(source_id) = row.fields.source_id().map(str::to_string) {
                existing.entry(source_id).or_insert(row);
            }
        }

        let mut seen = HashSet::new();
        for record in scraped {
            let fields = RecordFields::from(record);
            let issues = self.validator.validate(record_type, &fields);
            if !validator::is_valid(&issues) {
                debug!(%record_type, ?issues, source_id = ?fields.source_id, "Skipping invalid record");
                summary.rejected += 1;
                continue;
            }

            // A valid record always has a source id.
            let Some(source_id) = fields.source_id().map(str::to_string) else { continue };
            if !seen.insert(source_id.clone()) {
                summary.rejected += 1;
                continue;
            }
            if self.policy.is_stale(record_type, &fields) {
                debug!(%record_type, %source_id, "Skipping stale record");
                summary.stale_skipped += 1;
                continue;
            }

            match existing.get(&source_id) {
                None => match self.store.insert(record_type, &fields).await {
                    Ok(id) => {
                        debug!(%record_type, id, %source_id, "Inserted record");
                        summary.inserted += 1;
                    }
                    Err(e) => summary.record_failure("insert", None, e),
                },
                Some(row) if merged(&row.fields, &fields) == row.fields => summary.unchanged += 1,
                Some(row) => match self.store.update(record_type, row.id, &merged(&row.fields, &fields)).await {
                    Ok(()) => {
                        debug!(%record_type, id = row.id, %source_id, "Updated record");
                        summary.updated += 1;
                    }
                    Err(e) => summary.record_failure("update", Some(row.id), e),
                },
            }
        }

        Ok(())
    }

    async fn remove_duplicates(
        &self,
        record_type: RecordType,
        summary: &mut ReconcileSummary,
    ) -> Result<(), PersistenceError> {
        let mut groups: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for row in self.store.list(record_type).await? {
            if let Some(source_id) = row.fields.source_id().filter(|s| !s.trim().is_empty()) {
                groups.entry(source_id.to_string()).or_default().push(row.id);
            }
        }

        for (source_id, mut ids) in groups.into_iter().filter(|(_, ids)| ids.len() > 1) {
            ids.sort_unstable();
            let keep = ids[0];
            info!(%record_type, %source_id, keep, removing = ?&ids[1..], "Resolving duplicate source id");
            for id in ids.into_iter().skip(1) {
                match self.store.delete(record_type, id).await {
                    Ok(()) => summary.duplicates_removed += 1,
                    Err(e) => summary.record_failure("delete duplicate", Some(id), e),
                }
            }
        }

        Ok(())
    }

    async fn remove_stale(
        &self,
        record_type: RecordType,
        summary: &mut ReconcileSummary,
    ) -> Result<(), PersistenceError> {
        for row in self.store.list(record_type).await? {
            if !self.policy.is_stale(record_type, &row.fields) {
                continue;
            }
            info!(%record_type, id = row.id, source_id = ?row.fields.source_id, "Removing stale record");
            match self.store.delete(record_type, row.id).await {
                Ok(()) => summary.stale_removed += 1,
                Err(e) => summary.record_failure("delete stale", Some(row.id), e),
            }
        }
        Ok(())
    }

    async fn remove_invalid(
        &self,
        record_type: RecordType,
        summary: &mut ReconcileSummary,
    ) -> Result<(), PersistenceError> {
        for row in self.store.list(record_type).await? {
            let issues = self.validator.validate(record_type, &row.fields);
            if validator::is_valid(&issues) {
                continue;
            }
            let labels: Vec<String> = issues.iter().map(ToString::to_string).collect();
            info!(%record_type, id = row.id, name = %row.fields.name, issues = ?labels, "Removing invalid record");
            match self.store.delete(record_type, row.id).await {
                Ok(()) => summary.invalid_removed += 1,
                Err(e) => summary.record_failure("delete invalid", Some(row.id), e),
            }
        }
        Ok(())
    }
}

/// Scraped values win; attributes the page no longer shows are kept.
fn merged(current: &RecordFields, scraped: &RecordFields) -> RecordFields {
    let mut attributes = current.attributes.clone();
    attributes.extend(scraped.attributes.clone());
    RecordFields {
        name: if scraped.name.is_empty() { current.name.clone() } else { scraped.name.clone() },
        source_id: scraped.source_id.clone().or_else(|| current.source_id.clone()),
        source_url: scraped.source_url.clone().or_else(|| current.source_url.clone()),
        category: scraped.category.clone().or_else(|| current.category.clone()),
        attributes,
    }
}
