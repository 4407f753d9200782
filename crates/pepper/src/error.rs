//! Error types for the pepper core library.

use thiserror::Error;

/// Errors produced by the filtering, search and web-bug logic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PepperError {
    #[error("Search query does not contain any words")]
    EmptyQuery,

    #[error("Invalid URL template for search engine '{keyword}': {reason}")]
    InvalidTemplate { keyword: String, reason: String },

    #[error("GIF decode error: {0}")]
    GifDecode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, PepperError>;
