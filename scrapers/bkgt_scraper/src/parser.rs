use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;

use crate::types::{field, RecordType, ScrapedRecord};

/// Extraction strategy. Implementations must never fail: markup they do not
/// recognise yields fewer (or zero) records.
pub trait RecordParser: Send + Sync {
    fn parse(&self, html: &str, record_type: RecordType) -> Vec<ScrapedRecord>;
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid static selector")
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid static regex")
}

static LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static PLAYER_ROWS: Lazy<Selector> = Lazy::new(|| selector("div[class*='player'], tr[class*='player']"));
static PLAYER_NAME: Lazy<Selector> = Lazy::new(|| selector("h3, .name, td:nth-child(1)"));
static PLAYER_POSITION: Lazy<Selector> = Lazy::new(|| selector(".position, td:nth-child(2)"));
static PLAYER_JERSEY: Lazy<Selector> = Lazy::new(|| selector(".jersey, td:nth-child(3)"));
static EVENT_ROWS: Lazy<Selector> = Lazy::new(|| selector("div[class*='match'], tr[class*='event']"));
static EVENT_TITLE: Lazy<Selector> = Lazy::new(|| selector("h4, .title, td:nth-child(1)"));
static EVENT_DATE: Lazy<Selector> = Lazy::new(|| selector(".date, td:nth-child(2)"));
static EVENT_LOCATION: Lazy<Selector> = Lazy::new(|| selector(".location, td:nth-child(3)"));

// `/bkgt-p2013`, `/bkgt-P2013/truppen`, ...
static TEAM_PATH: Lazy<Regex> = Lazy::new(|| regex(r"(?i)/([a-z0-9]+)-p(\d{4})(?:[/?#]|$)"));
static PLAYER_ID: Lazy<Regex> = Lazy::new(|| regex(r"/spelare/(\d+)|[?&]player=(\d+)"));
static EVENT_ID: Lazy<Regex> = Lazy::new(|| regex(r"/match/(\d+)|[?&]match=(\d+)"));
static OPPONENT: Lazy<Regex> = Lazy::new(|| regex(r"(?i)\bvs\.?\s+(.+)"));

const TEAM_CATEGORY: &str = "Barn";
const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y"];

/// Parser for the markup conventions of svenskalag.se club pages.
pub struct SourceSiteParser {
    base: Option<Url>,
}

impl SourceSiteParser {
    /// `base_url` resolves relative links; an unparseable base leaves links as found.
    pub fn new(base_url: &str) -> Self {
        Self { base: Url::parse(base_url).ok() }
    }

    fn absolute(&self, href: &str) -> String {
        match &self.base {
            Some(base) => base.join(href).map(|u| u.to_string()).unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        }
    }

    fn parse_teams(&self, document: &Html) -> Vec<ScrapedRecord> {
        let mut seen = HashSet::new();
        let mut teams = Vec::new();

        for link in document.select(&LINK) {
            let Some(href) = link.value().attr("href") else { continue };
            let url = self.absolute(href);
            let Some(cap) = TEAM_PATH.captures(&url) else { continue };

            let source_id = format!("P{}", &cap[2]);
            if !seen.insert(source_id.clone()) {
                continue;
            }

            // Canonical team page: the matched `<club>-p<year>` segment with no sub-page.
            let segment = format!("{}-{}", cap[1].to_lowercase(), source_id.to_lowercase());
            let source_url = self.absolute(&format!("/{}", segment));

            teams.push(
                ScrapedRecord::new()
                    .with(field::NAME, source_id.clone())
                    .with(field::SOURCE_ID, source_id)
                    .with(field::SOURCE_URL, source_url)
                    .with(field::CATEGORY, TEAM_CATEGORY),
            );
        }

        teams
    }

    fn parse_players(&self, document: &Html) -> Vec<ScrapedRecord> {
        let mut seen = HashSet::new();
        let mut players = Vec::new();

        for element in document.select(&PLAYER_ROWS) {
            let Some((player_id, url)) = self.first_id_link(element, &PLAYER_ID) else { continue };
            if !seen.insert(player_id.clone()) {
                continue;
            }

            let mut record = ScrapedRecord::new()
                .with(field::SOURCE_ID, player_id)
                .with(field::SOURCE_URL, url)
                .with("status", "active");

            if let Some(full_name) = first_text(element, &PLAYER_NAME) {
                let mut parts = full_name.splitn(2, ' ');
                record.set("first_name", parts.next().unwrap_or_default());
                record.set("last_name", parts.next().unwrap_or_default());
                record.set(field::NAME, full_name);
            }
            if let Some(position) = first_text(element, &PLAYER_POSITION) {
                record.set("position", position);
            }
            if let Some(jersey) = first_text(element, &PLAYER_JERSEY) {
                if jersey.parse::<u32>().is_ok() {
                    record.set("jersey_number", jersey);
                }
            }

            players.push(record);
        }

        players
    }

    fn parse_events(&self, document: &Html) -> Vec<ScrapedRecord> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();

        for element in document.select(&EVENT_ROWS) {
            let Some((event_id, url)) = self.first_id_link(element, &EVENT_ID) else { continue };
            if !seen.insert(event_id.clone()) {
                continue;
            }

            let mut record = ScrapedRecord::new()
                .with(field::SOURCE_ID, event_id)
                .with(field::SOURCE_URL, url)
                .with(field::CATEGORY, "match")
                .with("home_away", "home")
                .with("status", "scheduled");

            if let Some(title) = first_text(element, &EVENT_TITLE) {
                if let Some(cap) = OPPONENT.captures(&title) {
                    record.set("opponent", &cap[1]);
                }
                record.set(field::NAME, title);
            }
            if let Some(date) = first_text(element, &EVENT_DATE).and_then(|d| parse_event_date(&d)) {
                record.set("event_date", date.format("%Y-%m-%d %H:%M:%S").to_string());
            }
            if let Some(location) = first_text(element, &EVENT_LOCATION) {
                record.set("location", location);
            }

            events.push(record);
        }

        events
    }

    /// First link inside `element` whose href carries an id matching `pattern`.
    fn first_id_link(&self, element: ElementRef<'_>, pattern: &Regex) -> Option<(String, String)> {
        element.select(&LINK).find_map(|link| {
            let href = link.value().attr("href")?;
            let cap = pattern.captures(href)?;
            let id = cap.get(1).or_else(|| cap.get(2))?.as_str().to_string();
            Some((id, self.absolute(href)))
        })
    }
}

impl RecordParser for SourceSiteParser {
    fn parse(&self, html: &str, record_type: RecordType) -> Vec<ScrapedRecord> {
        let document = Html::parse_document(html);
        let records = match record_type {
            RecordType::Teams => self.parse_teams(&document),
            RecordType::Players => self.parse_players(&document),
            RecordType::Events => self.parse_events(&document),
        };
        debug!(%record_type, count = records.len(), "Parsed records");
        records
    }
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|text| !text.is_empty())
}

fn parse_event_date(text: &str) -> Option<NaiveDateTime> {
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parser() -> SourceSiteParser {
        SourceSiteParser::new("https://www.svenskalag.se/bkgt")
    }

    #[test]
    fn test_team_links_are_canonicalised_and_deduplicated() {
        let html = r#"
            <nav><a href="/bkgt">Start</a><a href="/bkgt/kalender">Kalender</a></nav>
            <ul class="teams">
                <li><a href="/bkgt-p2013">P2013</a></li>
                <li><a href="https://www.svenskalag.se/bkgt-P2014/truppen">P2014</a></li>
                <li><a href="/bkgt-p2013/nyheter">P2013 nyheter</a></li>
            </ul>"#;

        let teams = parser().parse(html, RecordType::Teams);
        let ids: Vec<_> = teams.iter().filter_map(|t| t.source_id()).collect();
        assert_eq!(ids, vec!["P2013", "P2014"]);
        assert_eq!(teams[1].get(field::SOURCE_URL), Some("https://www.svenskalag.se/bkgt-p2014"));
        assert_eq!(teams[0].get(field::NAME), Some("P2013"));
        assert_eq!(teams[0].get(field::CATEGORY), Some("Barn"));
    }

    #[test]
    fn test_players_from_table_rows() {
        let html = r#"
            <table>
                <tr class="player"><td><a href="/bkgt/spelare/101">Anna Berg Lind</a></td><td>Forward</td><td>9</td></tr>
                <tr class="player"><td><a href="/bkgt/truppen?player=102">Erik Ek</a></td><td>Målvakt</td><td>-</td></tr>
                <tr class="player"><td>No link here</td><td>Back</td><td>4</td></tr>
            </table>"#;

        let players = parser().parse(html, RecordType::Players);
        assert_eq!(players.len(), 2);

        let anna = &players[0];
        assert_eq!(anna.source_id(), Some("101"));
        assert_eq!(anna.get(field::SOURCE_URL), Some("https://www.svenskalag.se/bkgt/spelare/101"));
        assert_eq!(anna.get("first_name"), Some("Anna"));
        assert_eq!(anna.get("last_name"), Some("Berg Lind"));
        assert_eq!(anna.get("position"), Some("Forward"));
        assert_eq!(anna.get("jersey_number"), Some("9"));

        assert_eq!(players[1].source_id(), Some("102"));
        assert_eq!(players[1].get("jersey_number"), None);
    }

    #[test]
    fn test_events_with_opponent_and_date() {
        let html = r#"
            <div class="match">
                <h4><a href="/bkgt/match/555">BKGT vs Hammarby IF</a></h4>
                <span class="date">2025-05-17 14:00</span>
                <span class="location">Gubbängens IP</span>
            </div>"#;

        let events = parser().parse(html, RecordType::Events);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.source_id(), Some("555"));
        assert_eq!(event.get(field::NAME), Some("BKGT vs Hammarby IF"));
        assert_eq!(event.get("opponent"), Some("Hammarby IF"));
        assert_eq!(event.get("event_date"), Some("2025-05-17 14:00:00"));
        assert_eq!(event.get("location"), Some("Gubbängens IP"));
    }

    #[test]
    fn test_unknown_markup_yields_nothing() {
        let html = "<html><body><p>Sidan kunde inte hittas</p></body></html>";
        for record_type in RecordType::ALL {
            assert!(parser().parse(html, record_type).is_empty());
        }
    }

    #[test]
    fn test_malformed_html_is_best_effort() {
        let html = r#"<div><a href="/bkgt-p2016">P2016<div><a href="/bkgt-p2017"><b>P2017"#;
        let teams = parser().parse(html, RecordType::Teams);
        assert_eq!(teams.len(), 2);
    }
}
