//! Error types for the analysis-session runtime.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by an analysis session.
///
/// Only transport failures reach the caller. Cleanup failures are logged
/// inside the session and never converted into this type.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Session is not accepting requests in state {0}")]
    InvalidState(&'static str),
}

impl SessionError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        SessionError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

/// A frame payload that could not be classified into an event.
///
/// Non-fatal: the stream logs it and moves on to the next frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event payload is missing a type tag")]
    MissingTag,

    #[error("Unknown event type: {0}")]
    UnknownTag(String),
}

/// Errors surfaced by the repository cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to clone {url}: {message}")]
    Clone { url: String, message: String },

    #[error("Path {} is outside the cache root", .0.display())]
    OutsideRoot(PathBuf),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;
