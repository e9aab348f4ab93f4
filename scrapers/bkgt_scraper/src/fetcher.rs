use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Credentials, ScraperConfig};
use crate::error::FetchError;

/// Text the source site shows instead of the requested page when the session is gone.
const LOGIN_REQUIRED_MARKER: &str = "Du måste logga in";

static CSRF_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)name="_token"\s+value="([^"]+)""#,
        r#"(?i)name="csrf_token"\s+value="([^"]+)""#,
        r#"(?i)name="_csrf"\s+value="([^"]+)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid static regex"))
    .collect()
});

/// Anything that can turn a URL into page HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, authenticated: bool) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    login_url: String,
    credentials: Option<Credentials>,
    logged_in: AtomicBool,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.scraping.user_agent)
            .timeout(Duration::from_secs(config.scraping.request_timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            login_url: config.source.login_url.clone(),
            credentials: config.source.credentials.clone(),
            logged_in: AtomicBool::new(false),
        })
    }

    async fn get_body(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::from_reqwest(url, e))?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody { url: url.to_string() });
        }
        Ok(body)
    }

    /// Logs in against the source site; the session cookie stays in the client's jar.
    pub async fn login(&self) -> Result<(), FetchError> {
        let credentials = self.credentials.as_ref().ok_or(FetchError::MissingCredentials)?;
        info!(login_url = %self.login_url, "Logging in to source site");

        let login_page = self.get_body(&self.login_url).await?;
        let mut form = vec![
            ("username", credentials.username.clone()),
            ("password", credentials.password.clone()),
        ];
        if let Some(token) = extract_csrf_token(&login_page) {
            debug!("Found CSRF token on login page");
            form.push(("_token", token));
        }

        let response = self
            .client
            .post(&self.login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&self.login_url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Auth(format!("login returned HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&self.login_url, e))?;
        let lowered = body.to_lowercase();
        if lowered.contains("login") && lowered.contains("error") {
            return Err(FetchError::Auth("credentials rejected by source site".to_string()));
        }

        self.logged_in.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, authenticated: bool) -> Result<String, FetchError> {
        if authenticated && !self.logged_in.load(Ordering::SeqCst) {
            self.login().await?;
        }

        debug!(url, authenticated, "Fetching page");
        let body = self.get_body(url).await?;

        if authenticated && body.contains(LOGIN_REQUIRED_MARKER) {
            warn!(url, "Session expired, logging in again");
            self.logged_in.store(false, Ordering::SeqCst);
            self.login().await?;
            let body = self.get_body(url).await?;
            if body.contains(LOGIN_REQUIRED_MARKER) {
                return Err(FetchError::Auth(format!("still not logged in when fetching {}", url)));
            }
            return Ok(body);
        }

        info!(url, bytes = body.len(), "Fetched page");
        Ok(body)
    }
}

pub fn extract_csrf_token(html: &str) -> Option<String> {
    CSRF_PATTERNS
        .iter()
        .find_map(|re| re.captures(html).map(|cap| cap[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_csrf_token() {
        let html = r#"<form><input type="hidden" name="_csrf" value="abc123"></form>"#;
        assert_eq!(extract_csrf_token(html), Some("abc123".to_string()));
        assert_eq!(extract_csrf_token("<form></form>"), None);
    }

    #[test]
    fn test_every_csrf_field_name_is_recognised() {
        assert_eq!(CSRF_PATTERNS.len(), 3);
        for name in ["_token", "csrf_token", "_csrf"] {
            let html = format!(r#"<input type="hidden" name="{}" value="v-{}">"#, name, name);
            assert_eq!(extract_csrf_token(&html), Some(format!("v-{}", name)));
        }
    }

    #[tokio::test]
    async fn test_authenticated_fetch_without_credentials() {
        let fetcher = HttpFetcher::new(&ScraperConfig::default()).unwrap();
        let result = fetcher.fetch("http://127.0.0.1:9/never", true).await;
        assert!(matches!(result, Err(FetchError::MissingCredentials)));
    }
}
