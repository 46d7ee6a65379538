//! Error types for the sihbolt core

use thiserror::Error;

use crate::crypto::CryptoError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The peer has no usable key material, so no session can be established
    #[error("Cannot establish session: {0}")]
    MissingKeyMaterial(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
