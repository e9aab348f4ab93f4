use crate::types::RecordType;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },
    #[error("Request to {url} failed with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },
    #[error("Empty response from {url}")]
    EmptyBody { url: String },
    #[error("Scraping credentials not configured")]
    MissingCredentials,
    #[error("Login failed: {0}")]
    Auth(String),
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout { url: url.to_string() }
        } else if let Some(status) = err.status() {
            FetchError::Status { url: url.to_string(), status: status.as_u16() }
        } else {
            FetchError::Connection { url: url.to_string(), message: err.to_string() }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Record {id} not found in {record_type}")]
    NotFound { record_type: RecordType, id: i64 },
    #[error("Storage error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}
