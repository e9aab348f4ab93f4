//! Scrape run log: one append-only row per attempt.
//!
//! `start` only captures the start time in memory; `finish` writes the row once
//! with the final status, so a row is never mutated after it lands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::store::RunLogStore;
use crate::types::{RecordType, RunStatus, ScrapeRun};

/// Counts reported when a run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub processed: i64,
    pub added: i64,
    pub updated: i64,
    pub failed: i64,
}

/// An open run. Consumed by [`RunLogger::finish`].
#[derive(Debug)]
pub struct RunHandle {
    scrape_type: RecordType,
    source_url: Option<String>,
    started_at: DateTime<Utc>,
}

impl RunHandle {
    pub fn scrape_type(&self) -> RecordType {
        self.scrape_type
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[derive(Clone)]
pub struct RunLogger {
    store: Arc<dyn RunLogStore>,
}

impl RunLogger {
    pub fn new(store: Arc<dyn RunLogStore>) -> Self {
        Self { store }
    }

    pub fn start(&self, scrape_type: RecordType, source_url: Option<String>) -> RunHandle {
        info!(%scrape_type, source_url = ?source_url, "Starting scrape run");
        RunHandle { scrape_type, source_url, started_at: Utc::now() }
    }

    pub async fn finish(
        &self,
        handle: RunHandle,
        status: RunStatus,
        counts: RunCounts,
        error: Option<String>,
    ) -> Result<ScrapeRun, PersistenceError> {
        let completed_at = Utc::now();
        let mut run = ScrapeRun {
            id: None,
            scrape_type: handle.scrape_type,
            status,
            records_processed: counts.processed,
            records_added: counts.added,
            records_updated: counts.updated,
            records_failed: counts.failed,
            started_at: handle.started_at,
            completed_at: Some(completed_at),
            duration_ms: Some((completed_at - handle.started_at).num_milliseconds()),
            error_message: error,
            source_url: handle.source_url,
        };

        match self.store.append(&run).await {
            Ok(id) => run.id = Some(id),
            Err(e) => {
                warn!(scrape_type = %run.scrape_type, error = %e, "Failed to write run log row");
                return Err(e);
            }
        }

        match run.status {
            RunStatus::Failed => warn!(
                scrape_type = %run.scrape_type,
                error = run.error_message.as_deref().unwrap_or(""),
                duration_ms = run.duration_ms,
                "Scrape run failed"
            ),
            _ => info!(
                scrape_type = %run.scrape_type,
                processed = run.records_processed,
                added = run.records_added,
                updated = run.records_updated,
                failed = run.records_failed,
                duration_ms = run.duration_ms,
                "Scrape run completed"
            ),
        }
        Ok(run)
    }

    pub async fn recent(&self, limit: i64, record_type: Option<RecordType>) -> Result<Vec<ScrapeRun>, PersistenceError> {
        self.store.recent(limit, record_type).await
    }
}

/// Aggregate figures over a set of runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub last_run: Option<DateTime<Utc>>,
    /// Mean duration of completed runs, in seconds.
    pub avg_duration_secs: Option<f64>,
    pub total_records_processed: i64,
}

impl RunStats {
    pub fn from_runs(runs: &[ScrapeRun]) -> Self {
        let completed: Vec<i64> = runs
            .iter()
            .filter(|r| r.status == RunStatus::Completed)
            .filter_map(|r| r.duration_ms)
            .collect();

        Self {
            total_runs: runs.len(),
            successful_runs: runs.iter().filter(|r| r.status == RunStatus::Completed).count(),
            failed_runs: runs.iter().filter(|r| r.status == RunStatus::Failed).count(),
            last_run: runs.iter().map(|r| r.started_at).max(),
            avg_duration_secs: (!completed.is_empty())
                .then(|| completed.iter().sum::<i64>() as f64 / completed.len() as f64 / 1000.0),
            total_records_processed: runs.iter().map(|r| r.records_processed).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_finish_appends_one_row() {
        let store = InMemoryStore::new();
        let logger = RunLogger::new(Arc::new(store.clone()));

        let handle = logger.start(RecordType::Teams, Some("https://www.svenskalag.se/bkgt".into()));
        assert!(store.runs().unwrap().is_empty());

        let run = logger
            .finish(handle, RunStatus::Completed, RunCounts { processed: 8, added: 8, ..RunCounts::default() }, None)
            .await
            .unwrap();

        assert_eq!(run.id, Some(1));
        assert!(run.duration_ms.unwrap() >= 0);
        let rows = store.runs().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RunStatus::Completed);
        assert_eq!(rows[0].records_added, 8);
    }

    #[tokio::test]
    async fn test_failed_run_keeps_message() {
        let store = InMemoryStore::new();
        let logger = RunLogger::new(Arc::new(store.clone()));

        let handle = logger.start(RecordType::Events, None);
        let run = logger
            .finish(handle, RunStatus::Failed, RunCounts::default(), Some("timed out".into()))
            .await
            .unwrap();

        assert_eq!(run.error_message.as_deref(), Some("timed out"));
        assert_eq!(logger.recent(10, Some(RecordType::Teams)).await.unwrap().len(), 0);
        assert_eq!(logger.recent(10, Some(RecordType::Events)).await.unwrap().len(), 1);
    }

    fn run(status: RunStatus, day: u32, duration_ms: i64, processed: i64) -> ScrapeRun {
        let started_at = Utc.with_ymd_and_hms(2025, 5, day, 2, 0, 0).unwrap();
        ScrapeRun {
            id: None,
            scrape_type: RecordType::Teams,
            status,
            records_processed: processed,
            records_added: 0,
            records_updated: 0,
            records_failed: 0,
            started_at,
            completed_at: Some(started_at),
            duration_ms: Some(duration_ms),
            error_message: None,
            source_url: None,
        }
    }

    #[test]
    fn test_stats() {
        let runs = vec![
            run(RunStatus::Completed, 1, 2000, 8),
            run(RunStatus::Failed, 2, 30000, 0),
            run(RunStatus::Completed, 3, 4000, 6),
        ];
        let stats = RunStats::from_runs(&runs);
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.successful_runs, 2);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.last_run, Some(Utc.with_ymd_and_hms(2025, 5, 3, 2, 0, 0).unwrap()));
        assert_eq!(stats.avg_duration_secs, Some(3.0));
        assert_eq!(stats.total_records_processed, 14);

        assert_eq!(RunStats::from_runs(&[]), RunStats::default());
    }
}
