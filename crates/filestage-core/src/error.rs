//! Ambient error type for configuration, I/O, and storage-transport concerns.
//!
//! The job-engine domain taxonomy (validation/serviceBusy/notFound/...) lives
//! in [`crate::engine::error::EngineError`]; this type exists for everything
//! around it: config loading, filesystem access, object-store transport.

use serde::{Deserialize, Serialize};

/// Result type alias for ambient operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Validation(format!("Invalid UUID: {}", error))
    }
}

impl Error {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn storage<T: Into<String>>(msg: T) -> Self {
        Error::Storage(msg.into())
    }

    pub fn network<T: Into<String>>(msg: T) -> Self {
        Error::Network(msg.into())
    }

    pub fn not_implemented<T: Into<String>>(msg: T) -> Self {
        Error::Other(format!("Not implemented: {}", msg.into()))
    }

    /// HTTP status code, when surfaced directly. Rare; most client-facing
    /// responses go through `EngineError` instead.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Config(_) => 500,
            Error::Storage(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Network(_) => 503,
            Error::Other(_) => 500,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Network(_) => "network",
            Error::Other(_) => "other",
        }
    }
}

/// Field-level validation error aggregation, used by the façade's request
/// validation to report every violated field in one response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: Option<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
            code: None,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_error(self) -> Error {
        Error::Validation(
            serde_json::to_string(&self).unwrap_or_else(|_| "Validation failed".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_status_code() {
        let err = Error::validation("bad input");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn validation_errors_collects_fields() {
        let mut errors = ValidationErrors::new();
        assert!(errors.is_empty());
        errors.add("fileId", "must be non-negative");
        assert!(!errors.is_empty());
        assert_eq!(errors.errors[0].field, "fileId");
    }
}
