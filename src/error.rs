//! Error types for omgsync
//!
//! All errors in the crate are converted to `AppError`. Gate skips are
//! not errors and never appear here; see `service::Outcome`.

use thiserror::Error;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Remote resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Remote rejected the credentials (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Invalid input from the caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote API answered with a failure envelope or status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport failure talking to the remote API
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Payload could not be encoded or decoded
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Persistent cache error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Local store failure that is not a database error
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not offered by this content type
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the failure came from the remote side (transport or API).
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AppError::NotFound
                | AppError::Unauthorized
                | AppError::Api { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Short label used for the error metric.
    pub fn label(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Validation(_) => "validation",
            AppError::Api { .. } => "api",
            AppError::HttpClient(_) => "http_client",
            AppError::Decode(_) => "decode",
            AppError::Database(_) => "database",
            AppError::Store(_) => "store",
            AppError::Config(_) => "config",
            AppError::NotImplemented(_) => "not_implemented",
            AppError::Internal(_) => "internal",
        }
    }

    /// Record this error in the error metric and hand it back.
    pub fn observed(self, operation: &str) -> Self {
        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[self.label(), operation])
            .inc();
        self
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
