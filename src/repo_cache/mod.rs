//! Content-addressed cache of cloned repositories.
//!
//! Each source URL maps to exactly one directory under the cache root, named
//! after the repository and the hash of its normalized URL. Work on a given
//! entry is serialized through a per-entry lock; different entries never wait
//! on each other.

mod git;
mod key;
mod metadata;
#[cfg(test)]
mod tests;

pub use git::{GitCli, GitOps, RepoInfo, DEFAULT_BRANCH};
pub use key::{cache_key, entry_dir_name, normalize_repo_url, repo_name};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use metadata::{metadata_path, EntryMetadata};

/// A materialized repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub commit: String,
    pub branch: String,
    pub last_refreshed: DateTime<Utc>,
    /// The latest refresh failed and this copy may be behind the remote
    pub stale: bool,
}

impl RepoCacheEntry {
    fn from_metadata(path: PathBuf, meta: EntryMetadata) -> Self {
        Self {
            key: meta.key,
            path,
            commit: meta.commit,
            branch: meta.branch,
            last_refreshed: meta.last_refreshed,
            stale: meta.stale,
        }
    }
}

/// Per-entry lock plus a counter of completed operations, so a caller that
/// queued behind an in-flight clone or refresh can reuse its result.
#[derive(Default)]
struct EntrySlot {
    lock: tokio::sync::Mutex<()>,
    completed: AtomicU64,
}

/// Everything derived from one source URL
struct Target {
    normalized: String,
    key: String,
    path: PathBuf,
}

pub struct RepoCache {
    root: PathBuf,
    git: Arc<dyn GitOps>,
    slots: Mutex<HashMap<String, Arc<EntrySlot>>>,
}

impl RepoCache {
    /// The root is resolved to its canonical form up front so entry paths
    /// compare equal however the caller spells them.
    pub fn new(root: impl Into<PathBuf>, git: Arc<dyn GitOps>) -> Self {
        Self {
            root: resolve_path(&root.into()),
            git,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Cache backed by the `git` command line
    pub fn with_git_cli(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(GitCli))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a URL materializes into
    pub fn path_for(&self, url: &str) -> CacheResult<PathBuf> {
        Ok(self.target(url)?.path)
    }

    /// Return an up-to-date local copy of `url`, cloning it on first use.
    ///
    /// An existing entry is refreshed; if the refresh fails the existing copy
    /// is served and marked stale. A failed or interrupted clone leaves
    /// nothing that a later call would mistake for a usable entry.
    pub async fn materialize(&self, url: &str) -> CacheResult<RepoCacheEntry> {
        let target = self.target(url)?;
        let slot = self.slot(&target.path);

        let observed = slot.completed.load(Ordering::Acquire);
        let _guard = slot.lock.lock().await;

        if let Some(previous) = load_valid_entry(&target.path) {
            if slot.completed.load(Ordering::Acquire) != observed {
                debug!("Reusing concurrent result for {}", target.path.display());
                return Ok(RepoCacheEntry::from_metadata(target.path, previous));
            }

            let entry = self.refresh(&target, previous).await;
            slot.completed.fetch_add(1, Ordering::Release);
            return Ok(entry);
        }

        let entry = self.clone_fresh(url, &target).await?;
        slot.completed.fetch_add(1, Ordering::Release);
        Ok(entry)
    }

    /// Current commit and branch of `path`, or defaults if it is not a repository.
    pub async fn get_info(&self, path: &Path) -> RepoInfo {
        if !path.join(".git").exists() {
            return RepoInfo::default();
        }
        match self.git.head(path).await {
            Ok(info) => info,
            Err(e) => {
                debug!("Could not read HEAD of {}: {}", path.display(), e);
                RepoInfo::default()
            }
        }
    }

    /// Remove a cached entry. Evicting a missing entry is a no-op.
    pub async fn evict(&self, path: &Path) -> CacheResult<()> {
        let resolved = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => resolve_path(parent).join(name),
            _ => path.to_path_buf(),
        };
        if !self.is_entry_path(&resolved) {
            return Err(CacheError::OutsideRoot(path.to_path_buf()));
        }
        let path = resolved.as_path();

        let slot = self.slot(path);
        let _guard = slot.lock.lock().await;

        remove_dir_if_exists(path).await?;
        match tokio::fs::remove_file(metadata_path(path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!("Evicted {}", path.display());
        Ok(())
    }

    /// Evict whatever entry `url` maps to.
    pub async fn evict_url(&self, url: &str) -> CacheResult<()> {
        let path = self.path_for(url)?;
        self.evict(&path).await
    }

    fn target(&self, url: &str) -> CacheResult<Target> {
        let normalized = normalize_repo_url(url)?;
        let key = cache_key(&normalized);
        let path = self.root.join(entry_dir_name(&normalized, &key));
        Ok(Target {
            normalized,
            key,
            path,
        })
    }

    /// Lock slot for an entry directory. The map lock is held only for the lookup.
    fn slot(&self, path: &Path) -> Arc<EntrySlot> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(name).or_default())
    }

    /// A direct child of the cache root, reached without `..` or `.`
    fn is_entry_path(&self, path: &Path) -> bool {
        let Ok(rest) = path.strip_prefix(&self.root) else {
            return false;
        };
        let mut components = rest.components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
    }

    async fn refresh(&self, target: &Target, previous: EntryMetadata) -> RepoCacheEntry {
        let meta = match self.git.pull(&target.path).await {
            Ok(()) => {
                let info = self.get_info(&target.path).await;
                debug!("Refreshed {} to {}", target.path.display(), info.commit);
                EntryMetadata::new(&previous.source_url, &target.normalized, &target.key, info)
            }
            Err(e) => {
                warn!(
                    "Failed to refresh {}; serving cached copy: {:#}",
                    target.path.display(),
                    e
                );
                EntryMetadata {
                    stale: true,
                    ..previous
                }
            }
        };

        if let Err(e) = meta.save(&metadata_path(&target.path)) {
            warn!("{:#}", e);
        }
        RepoCacheEntry::from_metadata(target.path.clone(), meta)
    }

    async fn clone_fresh(&self, url: &str, target: &Target) -> CacheResult<RepoCacheEntry> {
        tokio::fs::create_dir_all(&self.root).await?;

        // Whatever is here failed validation: the remains of an interrupted
        // clone or an entry whose sidecar was lost. The sidecar goes first so
        // a clone interrupted from here on never pairs with an old one.
        match tokio::fs::remove_file(metadata_path(&target.path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        remove_dir_if_exists(&target.path).await?;

        info!("Cloning {} into {}", url, target.path.display());
        if let Err(e) = self.git.clone_shallow(url, &target.path).await {
            if let Err(cleanup) = remove_dir_if_exists(&target.path).await {
                warn!(
                    "Failed to remove partial clone {}: {}",
                    target.path.display(),
                    cleanup
                );
            }
            return Err(CacheError::Clone {
                url: url.to_string(),
                message: format!("{:#}", e),
            });
        }

        let info = self.get_info(&target.path).await;
        let meta = EntryMetadata::new(url, &target.normalized, &target.key, info);
        if let Err(e) = meta.save(&metadata_path(&target.path)) {
            warn!("{:#}", e);
        }

        Ok(RepoCacheEntry::from_metadata(target.path.clone(), meta))
    }
}

/// Metadata of a completed clone at `path`. A checkout counts only when it has
/// a `.git` directory and its sidecar, which is written after the clone
/// finishes, loads.
fn load_valid_entry(path: &Path) -> Option<EntryMetadata> {
    if !path.join(".git").is_dir() {
        return None;
    }
    let meta = EntryMetadata::load(&metadata_path(path));
    if meta.is_none() {
        debug!("{} has no usable metadata; treating it as incomplete", path.display());
    }
    meta
}

/// Canonical form of `path`, resolved through its deepest existing ancestor
/// so roots that are not created yet still compare reliably.
fn resolve_path(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        let candidate = if existing.as_os_str().is_empty() {
            Path::new(".")
        } else {
            existing
        };
        if let Ok(base) = std::fs::canonicalize(candidate) {
            return missing.iter().rev().fold(base, |acc: PathBuf, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
