//! Analysis-session runtime for the vulnerability scanner.
//!
//! Two pieces live here:
//! - [`session`]: a client for the analysis backend's server-push event
//!   stream, with guaranteed end-of-session cleanup.
//! - [`repo_cache`]: the content-addressed store of cloned repositories that
//!   analysis jobs read from.

pub mod api;
pub mod config;
pub mod error;
pub mod repo_cache;
pub mod session;
pub mod stream;

pub use api::{AnalysisBackend, HttpBackend, SessionInfo};
pub use error::{CacheError, ProtocolError, SessionError};
pub use repo_cache::{RepoCache, RepoCacheEntry, RepoInfo};
pub use session::{analyze, AnalysisRequest, AnalysisSession, SessionState};
pub use stream::StreamEvent;
