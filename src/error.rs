// src/error.rs

//! Unified error handling for the crawl scheduler.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Site record failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cache directory or file could not be written
    #[error("Storage error at {path}: {message}")]
    Storage { path: String, message: String },

    /// Crawl engine could not be built or started
    #[error("Engine error for {context}: {message}")]
    Engine { context: String, message: String },

    /// The scheduler loop is no longer running
    #[error("Scheduler closed: {0}")]
    Closed(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error for the given path.
    pub fn storage(path: impl AsRef<Path>, message: impl fmt::Display) -> Self {
        Self::Storage {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create an engine error with context.
    pub fn engine(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Engine {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a closed-scheduler error.
    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed(message.into())
    }

    /// Whether this error came from rejecting a site record.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
