use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::types::{RecordFields, RecordType};

static TEAM_SOURCE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^P\d{4}$").expect("valid static regex"));
static NUMERIC_SOURCE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid static regex"));
static SOURCE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^P(\d{4})$").expect("valid static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ValidationIssue {
    MissingSourceId,
    InvalidSourceIdFormat,
    MissingSourceUrl,
    ForeignSourceUrl,
    /// Soft: flagged for operators but does not make the record invalid.
    SourceUrlMissingIdPath,
}

impl ValidationIssue {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ValidationIssue::SourceUrlMissingIdPath)
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValidationIssue::MissingSourceId => "Missing source_id",
            ValidationIssue::InvalidSourceIdFormat => "Invalid source_id format",
            ValidationIssue::MissingSourceUrl => "Missing source_url",
            ValidationIssue::ForeignSourceUrl => "Source URL not from source domain",
            ValidationIssue::SourceUrlMissingIdPath => "URL doesn't contain expected path",
        };
        f.write_str(label)
    }
}

pub type Issues = BTreeSet<ValidationIssue>;

pub fn is_valid(issues: &Issues) -> bool {
    issues.iter().all(|issue| !issue.is_fatal())
}

#[derive(Debug, Clone)]
pub struct Validator {
    domain: String,
}

impl Validator {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into().to_lowercase() }
    }

    /// Every rule is checked; nothing short-circuits.
    pub fn validate(&self, record_type: RecordType, record: &RecordFields) -> Issues {
        let mut issues = Issues::new();

        // Matched as stored: a padded id is malformed, not an alias of the clean one.
        let source_id = record.source_id().filter(|s| !s.trim().is_empty());
        match source_id {
            None => {
                issues.insert(ValidationIssue::MissingSourceId);
            }
            Some(id) if !source_id_pattern(record_type).is_match(id) => {
                issues.insert(ValidationIssue::InvalidSourceIdFormat);
            }
            Some(_) => {}
        }

        let source_url = record.source_url().map(str::trim).filter(|s| !s.is_empty());
        match source_url {
            None => {
                issues.insert(ValidationIssue::MissingSourceUrl);
            }
            Some(url) => {
                let url = url.to_lowercase();
                if !url.contains(&self.domain) {
                    issues.insert(ValidationIssue::ForeignSourceUrl);
                }
                if let Some(id) = source_id {
                    if !url_has_id_segment(&url, &id.to_lowercase()) {
                        issues.insert(ValidationIssue::SourceUrlMissingIdPath);
                    }
                }
            }
        }

        issues
    }

    pub fn is_valid(&self, record_type: RecordType, record: &RecordFields) -> bool {
        is_valid(&self.validate(record_type, record))
    }
}

fn source_id_pattern(record_type: RecordType) -> &'static Regex {
    match record_type {
        RecordType::Teams => &TEAM_SOURCE_ID,
        RecordType::Players | RecordType::Events => &NUMERIC_SOURCE_ID,
    }
}

/// Whether some path segment of `url` ends with `id` (`/bkgt-p2013`, `/spelare/101`).
/// Query parameters count too, since the site also links `?player=101`.
fn url_has_id_segment(url: &str, id: &str) -> bool {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let (path, query) = without_scheme.split_once('?').unwrap_or((without_scheme, ""));

    let in_path = path
        .split('/')
        .skip(1)
        .any(|segment| segment == id || segment.ends_with(&format!("-{}", id)));
    let in_query = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(_, value)| value == id);

    in_path || in_query
}

/// Year component of a team source id (`P2013` -> 2013); other ids carry none.
pub fn source_year(record_type: RecordType, source_id: &str) -> Option<i32> {
    match record_type {
        RecordType::Teams => SOURCE_YEAR
            .captures(source_id)
            .and_then(|cap| cap[1].parse().ok()),
        RecordType::Players | RecordType::Events => None,
    }
}
