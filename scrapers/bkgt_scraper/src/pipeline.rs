//! Fetch → parse → reconcile → log, for one or all record types.

use chrono::{Datelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::ScraperConfig;
use crate::error::{PersistenceError, ScrapeError};
use crate::fetcher::PageFetcher;
use crate::parser::RecordParser;
use crate::reconciler::{ReconcileSummary, Reconciler, RetentionPolicy};
use crate::run_log::{RunCounts, RunLogger};
use crate::store::{RecordStore, RunLogStore};
use crate::types::{RecordType, RunStatus, ScrapeRun, ScrapeType};
use crate::validator::{self, ValidationIssue, Validator};

/// Outcome of one record type's run, as surfaced to the admin trigger.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub record_type: RecordType,
    pub run: ScrapeRun,
    /// Absent when the run failed before reconciliation finished.
    pub summary: Option<ReconcileSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordDiagnosis {
    pub id: i64,
    pub name: String,
    pub source_id: Option<String>,
    pub source_url: Option<String>,
    pub issues: Vec<ValidationIssue>,
    pub stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosisReport {
    pub total: usize,
    pub valid: usize,
    /// Only records with at least one issue or that are stale.
    pub flagged: Vec<RecordDiagnosis>,
    /// Source ids held by more than one row, with the row ids in ascending order.
    pub duplicates: BTreeMap<String, Vec<i64>>,
}

pub struct Pipeline {
    config: ScraperConfig,
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn RecordParser>,
    records: Arc<dyn RecordStore>,
    run_logger: RunLogger,
    validator: Validator,
    current_year: Option<i32>,
    // Overlapping triggers in one process take turns on the write phase.
    write_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        config: ScraperConfig,
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn RecordParser>,
        records: Arc<dyn RecordStore>,
        runs: Arc<dyn RunLogStore>,
    ) -> Self {
        let validator = Validator::new(config.source.domain.clone());
        Self {
            config,
            fetcher,
            parser,
            records,
            run_logger: RunLogger::new(runs),
            validator,
            current_year: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Pins the year staleness is measured against instead of reading the clock.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = Some(year);
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn run_logger(&self) -> &RunLogger {
        &self.run_logger
    }

    fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            current_year: self.current_year.unwrap_or_else(|| Utc::now().year()),
            retention_years: self.config.retention.years,
        }
    }

    /// Runs each requested record type in order. Every type gets exactly one
    /// run-log row; only a failure to write that row is returned as an error,
    /// and only after every type has had its attempt.
    pub async fn scrape(&self, scrape_type: ScrapeType) -> Result<Vec<RunReport>, PersistenceError> {
        let mut reports = Vec::new();
        let mut log_failure = None;
        for record_type in scrape_type.record_types() {
            match self.scrape_one(record_type).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(%record_type, error = %e, "Could not record scrape run");
                    log_failure.get_or_insert(e);
                }
            }
        }
        match log_failure {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    async fn scrape_one(&self, record_type: RecordType) -> Result<RunReport, PersistenceError> {
        let url = self.config.source.page_url(record_type);
        let handle = self.run_logger.start(record_type, Some(url.clone()));
        let mut parsed = 0usize;

        let result: Result<ReconcileSummary, ScrapeError> = async {
            let authenticated = self.config.source.credentials.is_some();
            let html = self.fetcher.fetch(&url, authenticated).await?;

            let records = self.parser.parse(&html, record_type);
            parsed = records.len();
            info!(%record_type, parsed, "Parsed records");

            let _guard = self.write_lock.lock().await;
            let summary = Reconciler::new(self.records.as_ref(), &self.validator, self.policy())
                .reconcile(record_type, &records)
                .await?;
            Ok::<_, ScrapeError>(summary)
        }
        .await;

        match result {
            Ok(summary) => {
                let counts = RunCounts {
                    processed: summary.processed as i64,
                    added: summary.inserted as i64,
                    updated: summary.updated as i64,
                    failed: summary.failed as i64,
                };
                let message = (!summary.errors.is_empty()).then(|| summary.errors.join("; "));
                let run = self
                    .run_logger
                    .finish(handle, RunStatus::Completed, counts, message)
                    .await?;
                Ok(RunReport { record_type, run, summary: Some(summary) })
            }
            Err(e) => {
                error!(%record_type, error = %e, "Scrape failed");
                let counts = RunCounts { processed: parsed as i64, ..RunCounts::default() };
                let run = self
                    .run_logger
                    .finish(handle, RunStatus::Failed, counts, Some(e.to_string()))
                    .await?;
                Ok(RunReport { record_type, run, summary: None })
            }
        }
    }

    /// Validates what is persisted without changing anything.
    pub async fn diagnose(&self, record_type: RecordType) -> Result<DiagnosisReport, PersistenceError> {
        let rows = self.records.list(record_type).await?;
        let policy = self.policy();
        let mut report = DiagnosisReport { total: rows.len(), ..DiagnosisReport::default() };

        for row in &rows {
            if let Some(source_id) = row.fields.source_id() {
                report.duplicates.entry(source_id.to_string()).or_default().push(row.id);
            }

            let issues = self.validator.validate(record_type, &row.fields);
            let stale = policy.is_stale(record_type, &row.fields);
            if validator::is_valid(&issues) && !stale {
                report.valid += 1;
            }
            if !issues.is_empty() || stale {
                report.flagged.push(RecordDiagnosis {
                    id: row.id,
                    name: row.fields.name.clone(),
                    source_id: row.fields.source_id.clone(),
                    source_url: row.fields.source_url.clone(),
                    issues: issues.into_iter().collect(),
                    stale,
                });
            }
        }

        report.duplicates.retain(|_, ids| ids.len() > 1);
        for ids in report.duplicates.values_mut() {
            ids.sort_unstable();
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::parser::SourceSiteParser;
    use crate::store::InMemoryStore;
    use crate::types::RecordFields;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FixedPage(&'static str);

    #[async_trait]
    impl PageFetcher for FixedPage {
        async fn fetch(&self, _url: &str, _authenticated: bool) -> Result<String, FetchError> {
            Ok(self.0.to_string())
        }
    }

    fn pipeline(store: &InMemoryStore, html: &'static str) -> Pipeline {
        let config = ScraperConfig::default();
        let parser = SourceSiteParser::new(&config.source.base_url);
        Pipeline::new(
            config,
            Arc::new(FixedPage(html)),
            Arc::new(parser),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
        .with_current_year(2025)
    }

    #[tokio::test]
    async fn test_scrape_all_logs_one_row_per_type() {
        let store = InMemoryStore::new();
        let html = r#"<a href="/bkgt-p2016">P2016</a><a href="/bkgt-p2017">P2017</a>"#;

        let reports = pipeline(&store, html).scrape(ScrapeType::All).await.unwrap();

        let types: Vec<_> = reports.iter().map(|r| r.record_type).collect();
        assert_eq!(types, RecordType::ALL.to_vec());
        assert_eq!(reports[0].run.records_added, 2);
        assert_eq!(store.runs().unwrap().len(), 3);
    }

    /// Run log whose appends fail for one record type.
    struct BrokenTeamLog(InMemoryStore);

    #[async_trait]
    impl RunLogStore for BrokenTeamLog {
        async fn append(&self, run: &ScrapeRun) -> Result<i64, PersistenceError> {
            if run.scrape_type == RecordType::Teams {
                return Err(PersistenceError::Other("log table locked".to_string()));
            }
            self.0.append(run).await
        }

        async fn recent(&self, limit: i64, record_type: Option<RecordType>) -> Result<Vec<ScrapeRun>, PersistenceError> {
            self.0.recent(limit, record_type).await
        }
    }

    #[tokio::test]
    async fn test_log_failure_does_not_skip_later_types() {
        let store = InMemoryStore::new();
        let config = ScraperConfig::default();
        let parser = SourceSiteParser::new(&config.source.base_url);
        let html = r#"<a href="/bkgt-p2016">P2016</a>
            <div class="player"><a href="/bkgt/spelare/7">Kim Ek</a></div>"#;
        let pipeline = Pipeline::new(
            config,
            Arc::new(FixedPage(html)),
            Arc::new(parser),
            Arc::new(store.clone()),
            Arc::new(BrokenTeamLog(store.clone())),
        )
        .with_current_year(2025);

        let result = pipeline.scrape(ScrapeType::All).await;

        assert!(matches!(result, Err(PersistenceError::Other(_))));
        let logged: Vec<RecordType> = store.runs().unwrap().iter().map(|r| r.scrape_type).collect();
        assert_eq!(logged, vec![RecordType::Players, RecordType::Events]);
        assert_eq!(store.list(RecordType::Players).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_diagnose_is_read_only() {
        let store = InMemoryStore::new();
        let team = |id: &str| RecordFields {
            name: id.to_string(),
            source_id: Some(id.to_string()),
            source_url: Some(format!("https://www.svenskalag.se/bkgt-{}", id.to_lowercase())),
            ..RecordFields::default()
        };
        store.seed(RecordType::Teams, 1, team("P2018"), Utc::now()).unwrap();
        store.seed(RecordType::Teams, 2, team("P2018"), Utc::now()).unwrap();
        store.seed(RecordType::Teams, 3, team("P2009"), Utc::now()).unwrap();
        store.seed(RecordType::Teams, 4, RecordFields { name: "Kansli".into(), ..RecordFields::default() }, Utc::now()).unwrap();

        let report = pipeline(&store, "").diagnose(RecordType::Teams).await.unwrap();

        assert_eq!(report.total, 4);
        assert_eq!(report.valid, 2);
        assert_eq!(report.duplicates.get("P2018"), Some(&vec![1, 2]));
        let flagged: Vec<(i64, bool)> = report.flagged.iter().map(|d| (d.id, d.stale)).collect();
        assert_eq!(flagged, vec![(3, true), (4, false)]);
        assert_eq!(store.list(RecordType::Teams).await.unwrap().len(), 4);
    }
}
