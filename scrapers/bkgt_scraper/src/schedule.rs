//! Cadence for the recurring scrape trigger.
//!
//! Runs fire at a fixed wall-clock time (UTC): every day, every Monday, or on
//! the first day of each month.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown scraping frequency '{}'", other)),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub enabled: bool,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Daily,
            time_of_day: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl Schedule {
    /// First trigger strictly after `now`, or `None` when scheduling is off.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.enabled {
            return None;
        }

        let today = now.date_naive();
        let candidate = |date: NaiveDate| date.and_time(self.time_of_day).and_utc();

        let next = match self.frequency {
            Frequency::Daily => {
                let at = candidate(today);
                if at > now { at } else { candidate(today + Duration::days(1)) }
            }
            Frequency::Weekly => {
                let days_until_monday = (7 - today.weekday().num_days_from_monday()) % 7;
                let at = candidate(today + Duration::days(days_until_monday as i64));
                if at > now { at } else { at + Duration::days(7) }
            }
            Frequency::Monthly => {
                let first = today.with_day(1)?;
                let at = candidate(first);
                if at > now { at } else { candidate(first_of_next_month(first)?) }
            }
        };
        Some(next)
    }

    /// How long to sleep from `now` until the next trigger.
    pub fn wait_from(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let next = self.next_run_after(now)?;
        (next - now).to_std().ok()
    }
}

fn first_of_next_month(first: NaiveDate) -> Option<NaiveDate> {
    if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    }
}
