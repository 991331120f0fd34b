//! Error types for provenance resolution.
//!
//! Errors are grouped into the four kinds the resolver reacts to differently:
//! network, parse, filesystem and configuration. See [`ErrorKind`].

use crate::metadata::Provider;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the provenance library.
#[derive(Debug, Error)]
pub enum ProvenanceError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// HTTP status code when the server answered with a non-success status
        status: Option<u16>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{provider} has no record for {id}")]
    NotFound { provider: Provider, id: String },

    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: Provider,
        capability: &'static str,
    },

    // Response parsing
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for provenance operations.
pub type Result<T> = std::result::Result<T, ProvenanceError>;

/// Coarse error classification used by the propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Parse,
    FileSystem,
    Configuration,
    Other,
}

impl From<std::io::Error> for ProvenanceError {
    fn from(err: std::io::Error) -> Self {
        ProvenanceError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ProvenanceError {
    fn from(err: serde_json::Error) -> Self {
        ProvenanceError::Parse {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ProvenanceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProvenanceError::Timeout(std::time::Duration::from_secs(0))
        } else {
            ProvenanceError::Network {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

impl ProvenanceError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            return ProvenanceError::FileNotFound(path);
        }
        ProvenanceError::Io {
            message: err.to_string(),
            path: Some(path),
            source: Some(err),
        }
    }

    /// Create a parse error without an underlying serde error.
    pub fn parse(message: impl Into<String>) -> Self {
        ProvenanceError::Parse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        ProvenanceError::Config {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvenanceError::Network { .. }
            | ProvenanceError::Timeout(_)
            | ProvenanceError::NotFound { .. } => ErrorKind::Network,
            ProvenanceError::Parse { .. } => ErrorKind::Parse,
            ProvenanceError::Io { .. } | ProvenanceError::FileNotFound(_) => ErrorKind::FileSystem,
            ProvenanceError::Config { .. } => ErrorKind::Configuration,
            ProvenanceError::Unsupported { .. } | ProvenanceError::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether a direct lookup should be reported to its caller as "not found".
    ///
    /// Any network-level failure on a by-id lookup counts, not only a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network)
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvenanceError::Timeout(_) => true,
            ProvenanceError::Network { status, .. } => {
                matches!(status, None | Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}
