use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bkgt_scraper::fetcher::HttpFetcher;
use bkgt_scraper::parser::SourceSiteParser;
use bkgt_scraper::pipeline::{DiagnosisReport, Pipeline, RunReport};
use bkgt_scraper::run_log::RunStats;
use bkgt_scraper::store::{InMemoryStore, PgStore, RecordStore, RunLogStore};
use bkgt_scraper::types::{RecordType, ScrapeType};
use bkgt_scraper::ScraperConfig;

#[derive(Debug, Parser)]
#[command(author, version, about = "Scrape and reconcile BKGT club data", long_about = None)]
struct Cli {
    /// Use an in-memory store instead of Postgres (dry run)
    #[arg(long, global = true)]
    memory: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a scrape now and print the summary
    Scrape {
        /// teams, players, events or all
        #[arg(short, long, default_value = "all")]
        r#type: ScrapeType,
    },
    /// Scrape everything on the configured cadence until interrupted
    Schedule,
    /// Report validation issues and duplicates in persisted records
    Diagnose {
        #[arg(short, long, default_value = "teams")]
        r#type: RecordType,
    },
    /// Show recent scrape runs
    Logs {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
        #[arg(short, long)]
        r#type: Option<RecordType>,
    },
}

async fn build_pipeline(config: ScraperConfig, memory: bool) -> Result<Pipeline> {
    let records: Arc<dyn RecordStore>;
    let runs: Arc<dyn RunLogStore>;
    if memory {
        let store = InMemoryStore::new();
        records = Arc::new(store.clone());
        runs = Arc::new(store);
    } else {
        let url = config
            .database
            .url
            .clone()
            .context("DATABASE_URL must be set (or pass --memory)")?;
        let store = Arc::new(PgStore::connect(&url).await?);
        store.ensure_schema().await?;
        records = store.clone();
        runs = store;
    }

    let fetcher = HttpFetcher::new(&config)?;
    let parser = SourceSiteParser::new(&config.source.base_url);
    Ok(Pipeline::new(config, Arc::new(fetcher), Arc::new(parser), records, runs))
}

fn print_reports(reports: &[RunReport]) {
    for report in reports {
        let run = &report.run;
        println!(
            "{:<8} {:<10} processed={} added={} updated={} failed={} duration={}ms",
            report.record_type.as_str(),
            run.status.as_str(),
            run.records_processed,
            run.records_added,
            run.records_updated,
            run.records_failed,
            run.duration_ms.unwrap_or_default(),
        );
        if let Some(summary) = &report.summary {
            println!(
                "         duplicates_removed={} stale_removed={} invalid_removed={}",
                summary.duplicates_removed, summary.stale_removed, summary.invalid_removed
            );
        }
        if let Some(message) = &run.error_message {
            println!("         error: {}", message);
        }
    }
}

fn print_diagnosis(record_type: RecordType, report: &DiagnosisReport) {
    println!("{}: {} records, {} valid", record_type, report.total, report.valid);
    for record in &report.flagged {
        let issues: Vec<String> = record.issues.iter().map(ToString::to_string).collect();
        println!(
            "  #{} {:?} source_id={} stale={} issues=[{}]",
            record.id,
            record.name,
            record.source_id.as_deref().unwrap_or("-"),
            record.stale,
            issues.join(", ")
        );
    }
    for (source_id, ids) in &report.duplicates {
        println!("  duplicate {}: rows {:?}", source_id, ids);
    }
}

async fn run_schedule(pipeline: &Pipeline) -> Result<()> {
    let schedule = pipeline.config().schedule.clone();
    if !schedule.enabled {
        warn!("Scheduled scraping is disabled (BKGT_SCRAPING_ENABLED)");
        return Ok(());
    }

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_run_after(now) else { return Ok(()) };
        let wait = schedule.wait_from(now).unwrap_or_default();
        info!(next_run = %next, frequency = %schedule.frequency, "Waiting for next scheduled scrape");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping scheduler");
                return Ok(());
            }
        }

        let reports = pipeline.scrape(ScrapeType::All).await?;
        let failed = reports.iter().filter(|r| r.summary.is_none()).count();
        info!(runs = reports.len(), failed, "Scheduled scrape finished");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bkgt_scraper=info")))
        .init();

    let cli = Cli::parse();
    let config = ScraperConfig::from_env();
    let pipeline = build_pipeline(config, cli.memory).await?;

    match cli.command {
        Commands::Scrape { r#type } => {
            let reports = pipeline.scrape(r#type).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_reports(&reports);
            }
        }
        Commands::Schedule => run_schedule(&pipeline).await?,
        Commands::Diagnose { r#type } => {
            let report = pipeline.diagnose(r#type).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_diagnosis(r#type, &report);
            }
        }
        Commands::Logs { limit, r#type } => {
            let runs = pipeline.run_logger().recent(limit, r#type).await?;
            let stats = RunStats::from_runs(&runs);
            if cli.json {
                let body = serde_json::json!({ "runs": runs, "stats": stats });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                for run in &runs {
                    println!(
                        "{} {:<8} {:<10} processed={} added={} updated={} failed={}{}",
                        run.started_at.format("%Y-%m-%d %H:%M:%S"),
                        run.scrape_type.as_str(),
                        run.status.as_str(),
                        run.records_processed,
                        run.records_added,
                        run.records_updated,
                        run.records_failed,
                        run.error_message.as_deref().map(|m| format!(" error={}", m)).unwrap_or_default(),
                    );
                }
                println!(
                    "total={} successful={} failed={} avg_duration={:.1}s records_processed={}",
                    stats.total_runs,
                    stats.successful_runs,
                    stats.failed_runs,
                    stats.avg_duration_secs.unwrap_or_default(),
                    stats.total_records_processed
                );
            }
        }
    }

    Ok(())
}
