//! Request and response types for the analysis backend.

use serde::{Deserialize, Serialize};

/// Start-session request body
#[derive(Debug, Serialize)]
pub(super) struct StartSessionRequest<'a> {
    pub user_id: &'a str,
}

/// Stream request body
#[derive(Debug, Serialize)]
pub(super) struct StreamSessionRequest<'a> {
    pub message: &'a str,
}

/// Session metadata returned by the start-session call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub agent_kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub started_at: String,
}
