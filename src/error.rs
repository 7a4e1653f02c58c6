use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    /// A metric is misconfigured (no granularity flag, unknown aggregation
    /// method, missing method when one is required).
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    /// A fact row could not be coerced into the canonical shape.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Invalid period format: {0}")]
    PeriodParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Unwrap an error raised inside a `Connection::call` closure that already
    /// returns a crate error, so its variant survives the trip through the
    /// connection thread.
    pub(crate) fn from_call(e: tokio_rusqlite::Error<Error>) -> Self {
        match e {
            tokio_rusqlite::Error::Error(inner) => inner,
            other => Error::Database(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
