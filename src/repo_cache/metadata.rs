//! Sidecar metadata stored next to each cached working copy.
//!
//! Stored as one file per entry: `<root>/<entry dir>.json`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::git::RepoInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// URL as given to the first materialize call
    pub source_url: String,
    pub normalized_url: String,
    pub key: String,
    pub commit: String,
    pub branch: String,
    pub last_refreshed: DateTime<Utc>,
    /// Set when the latest refresh attempt failed
    #[serde(default)]
    pub stale: bool,
}

impl EntryMetadata {
    pub fn new(source_url: &str, normalized_url: &str, key: &str, info: RepoInfo) -> Self {
        Self {
            source_url: source_url.to_string(),
            normalized_url: normalized_url.to_string(),
            key: key.to_string(),
            commit: info.commit,
            branch: info.branch,
            last_refreshed: Utc::now(),
            stale: false,
        }
    }

    /// Load metadata, returning `None` when the file is missing or unreadable.
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read cache metadata {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Failed to parse cache metadata {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize cache metadata")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write cache metadata to {}", path.display()))
    }
}

/// Sidecar path for an entry directory
pub fn metadata_path(entry_dir: &Path) -> PathBuf {
    let mut name = entry_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".json");
    entry_dir.with_file_name(name)
}
