//! Client side of the analysis backend.
//!
//! [`AnalysisBackend`] is the seam the session runtime talks through:
//! production code uses [`HttpBackend`], tests inject their own.

mod client;
mod http;
mod types;

pub use client::HttpBackend;
pub use types::SessionInfo;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::SessionError;

/// Raw response body of the event stream, chunked however the transport likes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, SessionError>> + Send>>;

/// Remote session lifecycle offered by the analysis backend
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Create a server-side session for `user_id`.
    async fn start_session(&self, user_id: &str) -> Result<SessionInfo, SessionError>;

    /// Request the event stream for an open session.
    async fn stream_session(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<ByteStream, SessionError>;

    /// Tear down a session. Callers treat failures as advisory.
    async fn end_session(&self, session_id: &str) -> Result<(), SessionError>;
}
