use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field names shared by the parser, validator and stores.
pub mod field {
    pub const NAME: &str = "name";
    pub const SOURCE_ID: &str = "source_id";
    pub const SOURCE_URL: &str = "source_url";
    pub const CATEGORY: &str = "category";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Teams,
    Players,
    Events,
}

impl RecordType {
    pub const ALL: [RecordType; 3] = [RecordType::Teams, RecordType::Players, RecordType::Events];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Teams => "teams",
            RecordType::Players => "players",
            RecordType::Events => "events",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            RecordType::Teams => "bkgt_teams",
            RecordType::Players => "bkgt_players",
            RecordType::Events => "bkgt_events",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "teams" | "team" => Ok(RecordType::Teams),
            "players" | "player" => Ok(RecordType::Players),
            "events" | "event" => Ok(RecordType::Events),
            other => Err(format!("unknown record type '{}'", other)),
        }
    }
}

/// What a single trigger asks for: one record type or all of them in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeType {
    One(RecordType),
    All,
}

impl ScrapeType {
    pub fn record_types(&self) -> Vec<RecordType> {
        match self {
            ScrapeType::One(record_type) => vec![*record_type],
            ScrapeType::All => RecordType::ALL.to_vec(),
        }
    }
}

impl FromStr for ScrapeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(ScrapeType::All)
        } else {
            s.parse().map(ScrapeType::One)
        }
    }
}

impl fmt::Display for ScrapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeType::One(record_type) => record_type.fmt(f),
            ScrapeType::All => f.write_str("all"),
        }
    }
}

/// Loosely typed record as extracted from HTML: field name to string value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedRecord {
    pub fields: BTreeMap<String, String>,
}

impl ScrapedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Stores a trimmed value; blank values are dropped.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            self.fields.insert(key.to_string(), trimmed.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn source_id(&self) -> Option<&str> {
        self.get(field::SOURCE_ID)
    }
}

/// The persisted, mutable part of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub name: String,
    pub source_id: Option<String>,
    pub source_url: Option<String>,
    pub category: Option<String>,
    /// Type-specific fields (position, event_date, ...).
    pub attributes: BTreeMap<String, String>,
}

impl RecordFields {
    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }
}

impl From<&ScrapedRecord> for RecordFields {
    fn from(record: &ScrapedRecord) -> Self {
        let mut fields = RecordFields::default();
        for (key, value) in &record.fields {
            match key.as_str() {
                field::NAME => fields.name = value.clone(),
                field::SOURCE_ID => fields.source_id = Some(value.clone()),
                field::SOURCE_URL => fields.source_url = Some(value.clone()),
                field::CATEGORY => fields.category = Some(value.clone()),
                _ => {
                    fields.attributes.insert(key.clone(), value.clone());
                }
            }
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub fields: RecordFields,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" | "running" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// One row of the scrape run log. Written once, when the run finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: Option<i64>,
    pub scrape_type: RecordType,
    pub status: RunStatus,
    pub records_processed: i64,
    pub records_added: i64,
    pub records_updated: i64,
    pub records_failed: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub source_url: Option<String>,
}
