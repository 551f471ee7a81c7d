//! Typed error boundary for the crawler crate.
//!
//! Call sites inside this crate use `Result<T, CrawlerError>`; the `server`
//! binary converts these into the HTTP error envelope at its own boundary.

use thiserror::Error;

/// Taxonomy from the error handling design: validation errors are fatal to
/// the call and never retried, transient errors are retryable, fatal errors
/// indicate an invariant violation.
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("database error during {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CrawlerError {
    pub fn database(operation: &'static str, source: sqlx::Error) -> Self {
        match &source {
            sqlx::Error::RowNotFound => CrawlerError::NotFound,
            _ => CrawlerError::Database { operation, source },
        }
    }
}

impl From<url::ParseError> for CrawlerError {
    fn from(e: url::ParseError) -> Self {
        CrawlerError::Validation(format!("invalid url: {e}"))
    }
}
