//! Error types for the pepper-proxy crate.

use thiserror::Error;

/// Errors that can occur in the intercepting proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Proxy bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Host denied by filter: {host}: {reason}")]
    HostDenied { host: String, reason: String },

    #[error("Upstream connection failed to {host}: {reason}")]
    UpstreamConnect { host: String, reason: String },

    #[error("Upstream {host} timed out after {secs}s")]
    UpstreamTimeout { host: String, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP parse error: {0}")]
    HttpParse(String),

    #[error("Request rejected with {status}: {reason}")]
    Rejected { status: u16, reason: &'static str },

    #[error(transparent)]
    Core(#[from] pepper::PepperError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
