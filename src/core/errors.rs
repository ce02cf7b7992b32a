// src/core/errors.rs

//! Defines the primary error type for the entire application.

use crate::core::schema::ValidationReport;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the service.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum RefractError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backing KV store could not be reached or answered with a
    /// non-success status. Admin callers see this as backend-unavailable.
    #[error("KV store unavailable: {0}")]
    KvUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationReport),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RefractError {
    fn from(e: std::io::Error) -> Self {
        RefractError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for RefractError {
    fn from(e: reqwest::Error) -> Self {
        RefractError::HttpClient(e.to_string())
    }
}

impl From<serde_json::Error> for RefractError {
    fn from(e: serde_json::Error) -> Self {
        RefractError::Serialization(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for RefractError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        RefractError::Serialization(e.to_string())
    }
}
