//! Error type definitions for the HDHomeRun proxy.
//!
//! A small hierarchy: `AppError` is the top level used at startup seams,
//! `StreamError` covers everything that can go wrong inside a stream
//! session, and `ExecutableError` carries the specific reason a configured
//! transcoder path was rejected.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors (invalid transcoder path, missing tuner)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stream session errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors arising inside a stream session
#[derive(Error, Debug)]
pub enum StreamError {
    /// The tuner could not be reached when opening the stream
    #[error("upstream unavailable: {url}: {source}")]
    UpstreamUnavailable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The tuner answered the stream open with a non-200 status
    #[error("invalid response from tuner: {status}")]
    UpstreamStatus { status: u16 },

    /// The downstream client went away mid-stream. Not a failure.
    #[error("client disconnected")]
    ClientDisconnect,

    /// The transcoder exited non-zero without any AC4 decoder errors
    /// recorded, so the exit cannot be blamed on lossy input.
    #[error("transcoder process failed ({status}): {detail}")]
    SubprocessFailure { status: String, detail: String },

    /// The configured transcoder binary failed validation
    #[error("invalid transcoder executable: {0}")]
    InvalidExecutable(#[from] ExecutableError),

    /// The transcoder could not be spawned
    #[error("failed to start transcoder: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

/// Reasons a configured executable path is rejected before spawning
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExecutableError {
    #[error("path contains directory traversal attempt")]
    Traversal,

    #[error("path contains invalid characters")]
    InvalidCharacters,

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("path is not executable: {0}")]
    NotExecutable(String),
}

impl AppError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// An I/O error message that indicates the peer went away rather than a
/// genuine failure. Both sides of a live TV stream produce these routinely
/// during channel changes.
pub fn is_disconnect_error(message: &str) -> bool {
    message.contains("connection reset by peer") || message.contains("broken pipe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_classification() {
        assert!(is_disconnect_error("write failed: broken pipe"));
        assert!(is_disconnect_error("read: connection reset by peer"));
        assert!(!is_disconnect_error("connection refused"));
        assert!(!is_disconnect_error("timed out"));
    }

    #[test]
    fn stream_error_display() {
        let err = StreamError::UpstreamStatus { status: 503 };
        assert_eq!(err.to_string(), "invalid response from tuner: 503");
    }
}
