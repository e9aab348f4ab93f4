use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::schedule::{Frequency, Schedule};
use crate::types::RecordType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub base_url: String,
    pub domain: String,
    pub login_url: String,
    pub credentials: Option<Credentials>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.svenskalag.se/bkgt".to_string(),
            domain: "svenskalag.se".to_string(),
            login_url: "https://www.svenskalag.se/login".to_string(),
            credentials: None,
        }
    }
}

impl SourceConfig {
    /// Page listing records of the given type.
    pub fn page_url(&self, record_type: RecordType) -> String {
        let base = self.base_url.trim_end_matches('/');
        match record_type {
            RecordType::Teams => base.to_string(),
            RecordType::Players => format!("{}/spelare", base),
            RecordType::Events => format!("{}/matcher", base),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapingConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            user_agent: "BKGT Data Scraping Plugin/1.0.0".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Records whose source-id year is older than `current_year - years` are stale.
    pub years: i32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { years: 10 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScraperConfig {
    pub source: SourceConfig,
    pub scraping: ScrapingConfig,
    pub retention: RetentionConfig,
    pub schedule: Schedule,
    pub database: DatabaseConfig,
}

impl ScraperConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("BKGT_SOURCE_URL") {
            config.source.base_url = url;
        }
        if let Some(domain) = lookup("BKGT_SOURCE_DOMAIN") {
            config.source.domain = domain;
        }
        if let Some(login_url) = lookup("BKGT_LOGIN_URL") {
            config.source.login_url = login_url;
        }
        if let (Some(username), Some(password)) = (lookup("BKGT_USERNAME"), lookup("BKGT_PASSWORD")) {
            if !username.is_empty() && !password.is_empty() {
                config.source.credentials = Some(Credentials { username, password });
            }
        }
        if let Some(user_agent) = lookup("SCRAPER_USER_AGENT") {
            config.scraping.user_agent = user_agent;
        }
        if let Some(timeout) = parse_var(&lookup, "SCRAPER_TIMEOUT_SECS") {
            config.scraping.request_timeout_secs = timeout;
        }
        if let Some(years) = parse_var(&lookup, "BKGT_RETENTION_YEARS") {
            config.retention.years = years;
        }
        if let Some(enabled) = lookup("BKGT_SCRAPING_ENABLED") {
            config.schedule.enabled = matches!(enabled.trim().to_lowercase().as_str(), "yes" | "true" | "1");
        }
        if let Some(frequency) = parse_var::<Frequency, _>(&lookup, "BKGT_SCRAPING_FREQUENCY") {
            config.schedule.frequency = frequency;
        }
        if let Some(time) = lookup("BKGT_SCRAPING_TIME") {
            match NaiveTime::parse_from_str(time.trim(), "%H:%M") {
                Ok(time) => config.schedule.time_of_day = time,
                Err(e) => warn!(value = %time, error = %e, "Ignoring invalid BKGT_SCRAPING_TIME"),
            }
        }
        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = Some(url);
        }

        config
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ScraperConfig::from_lookup(|_| None);
        assert_eq!(config, ScraperConfig::default());
        assert_eq!(config.scraping.request_timeout_secs, 30);
        assert_eq!(config.retention.years, 10);
        assert!(config.source.credentials.is_none());
        assert!(!config.schedule.enabled);
    }

    #[test]
    fn test_overrides() {
        let config = ScraperConfig::from_lookup(lookup_from(&[
            ("BKGT_SOURCE_URL", "http://localhost:1234/bkgt"),
            ("BKGT_USERNAME", "coach"),
            ("BKGT_PASSWORD", "secret"),
            ("SCRAPER_TIMEOUT_SECS", "5"),
            ("BKGT_RETENTION_YEARS", "4"),
            ("BKGT_SCRAPING_ENABLED", "yes"),
            ("BKGT_SCRAPING_FREQUENCY", "weekly"),
            ("BKGT_SCRAPING_TIME", "06:30"),
        ]));

        assert_eq!(config.source.base_url, "http://localhost:1234/bkgt");
        assert_eq!(
            config.source.credentials,
            Some(Credentials { username: "coach".into(), password: "secret".into() })
        );
        assert_eq!(config.scraping.request_timeout_secs, 5);
        assert_eq!(config.retention.years, 4);
        assert!(config.schedule.enabled);
        assert_eq!(config.schedule.frequency, Frequency::Weekly);
        assert_eq!(config.schedule.time_of_day, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ScraperConfig::from_lookup(lookup_from(&[
            ("SCRAPER_TIMEOUT_SECS", "soon"),
            ("BKGT_SCRAPING_FREQUENCY", "hourly"),
            ("BKGT_SCRAPING_TIME", "25:99"),
            ("BKGT_USERNAME", "coach"),
        ]));
        assert_eq!(config.scraping.request_timeout_secs, 30);
        assert_eq!(config.schedule, Schedule::default());
        assert!(config.source.credentials.is_none());
    }

    #[test]
    fn test_page_urls() {
        let source = SourceConfig {
            base_url: "https://www.svenskalag.se/bkgt/".into(),
            ..SourceConfig::default()
        };
        assert_eq!(source.page_url(RecordType::Teams), "https://www.svenskalag.se/bkgt");
        assert_eq!(source.page_url(RecordType::Players), "https://www.svenskalag.se/bkgt/spelare");
        assert_eq!(source.page_url(RecordType::Events), "https://www.svenskalag.se/bkgt/matcher");
    }
}
