pub mod config;
pub mod error;
pub mod fetcher;
pub mod parser;
pub mod pipeline;
pub mod reconciler;
pub mod run_log;
pub mod schedule;
pub mod store;
pub mod types;
pub mod validator;

pub use config::ScraperConfig;
pub use pipeline::{Pipeline, RunReport};
pub use types::{RecordType, ScrapeType};
