use thiserror::Error;
use uuid::Uuid;

/// Application-wide error types for listwatch.
#[derive(Error, Debug)]
pub enum AppError {
    /// The categories manifest is missing, unreadable, or empty.
    #[error("{0}")]
    ManifestError(String),

    /// The manifest has no entry for the requested city.
    #[error("the city url data for '{0}' does not exist")]
    UnknownCity(String),

    /// The manifest has no source URL for the requested category in a city.
    #[error("the category '{category}' does not exist for city '{city}'")]
    UnknownCategory { city: String, category: String },

    /// Process configuration (environment) is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Navigating a browser page failed.
    #[error("Navigation error: {0}")]
    NavigationError(String),

    /// The browser process or a browser context misbehaved.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// A page did not contain the fields a listing needs.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The site kept serving its block page after every allowed retry.
    #[error("still blocked after {attempts} attempts at {url}")]
    Blocked { url: String, attempts: u32 },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// A job request was rejected at submission.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid job id '{0}'")]
    JobNotFound(Uuid),

    /// The dispatcher is gone; nothing will consume new jobs.
    #[error("Job queue is closed")]
    QueueClosed,

    /// Reading or writing persisted category state failed.
    #[error("Store error: {0}")]
    StoreError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true for errors caused by the manifest or the requested
    /// city/category rather than by the site.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            AppError::ManifestError(_)
                | AppError::UnknownCity(_)
                | AppError::UnknownCategory { .. }
                | AppError::ConfigError(_)
        )
    }

    /// Returns true if the job should be reported as `done` after recording
    /// this error, instead of `failed`.
    ///
    /// An absent city or category is a no-op for the job; a missing or
    /// empty manifest is not.
    pub fn ends_job_cleanly(&self) -> bool {
        matches!(
            self,
            AppError::UnknownCity(_) | AppError::UnknownCategory { .. }
        )
    }

    /// Returns true if this error belongs to a single listing fetch and
    /// must not abort the surrounding category run.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            AppError::NavigationError(_)
                | AppError::BrowserError(_)
                | AppError::ParseError(_)
                | AppError::Blocked { .. }
                | AppError::Timeout(_)
        )
    }
}
