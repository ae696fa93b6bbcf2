//! Tests for the repository cache.

use super::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::Duration;
use tempfile::TempDir;

/// In-memory git double: "clones" by creating a `.git` directory
#[derive(Default)]
struct FakeGit {
    clones: AtomicUsize,
    pulls: AtomicUsize,
    fail_clone: bool,
    fail_pull: bool,
    /// Simulated network latency for clone
    clone_delay: Option<Duration>,
    /// Stall the next clone forever right after `.git` appears
    stall_next_clone: AtomicBool,
}

impl FakeGit {
    fn clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitOps for FakeGit {
    async fn clone_shallow(&self, url: &str, dest: &Path) -> Result<()> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.clone_delay {
            tokio::time::sleep(delay).await;
        }
        // Leave a half-written checkout behind like an interrupted clone would
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join("README.md"), url)?;
        if self.fail_clone {
            return Err(anyhow!("remote hung up unexpectedly"));
        }
        std::fs::create_dir_all(dest.join(".git"))?;
        if self.stall_next_clone.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn pull(&self, _repo: &Path) -> Result<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pull {
            return Err(anyhow!("Could not resolve host"));
        }
        Ok(())
    }

    async fn head(&self, repo: &Path) -> Result<RepoInfo> {
        let name = repo.file_name().unwrap().to_string_lossy().to_string();
        Ok(RepoInfo {
            commit: cache_key(&name)[..40].to_string(),
            branch: "main".to_string(),
        })
    }
}

fn cache_with(git: FakeGit) -> (TempDir, Arc<FakeGit>, RepoCache) {
    let tmp = TempDir::new().unwrap();
    let git = Arc::new(git);
    let cache = RepoCache::new(tmp.path().join("repos"), git.clone());
    (tmp, git, cache)
}

#[tokio::test]
async fn test_first_materialize_clones() {
    let (_tmp, git, cache) = cache_with(FakeGit::default());

    let entry = cache
        .materialize("https://github.com/acme/webapp.git")
        .await
        .unwrap();

    assert_eq!(git.clones(), 1);
    assert_eq!(git.pulls(), 0);
    assert!(entry.path.join(".git").is_dir());
    assert!(entry.path.starts_with(cache.root()));
    assert_eq!(entry.commit.len(), 40);
    assert_eq!(entry.branch, "main");
    assert!(!entry.stale);
    assert!(metadata_path(&entry.path).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_materialize_clones_once() {
    let (_tmp, git, cache) = cache_with(FakeGit {
        clone_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let cache = Arc::new(cache);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.materialize("https://github.com/acme/webapp").await })
        })
        .collect();

    let mut entries = Vec::new();
    for handle in handles {
        entries.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(git.clones(), 1);
    let first = &entries[0];
    for entry in &entries {
        assert_eq!(entry.path, first.path);
        assert!(!entry.commit.is_empty());
    }
}

#[tokio::test]
async fn test_sequential_materialize_refreshes_same_path() {
    let (_tmp, git, cache) = cache_with(FakeGit::default());

    let first = cache.materialize("https://github.com/acme/webapp").await.unwrap();
    let second = cache
        .materialize("https://github.com/acme/webapp/")
        .await
        .unwrap();

    assert_eq!(first.path, second.path);
    assert_eq!(git.clones(), 1);
    assert_eq!(git.pulls(), 1);
    assert!(second.last_refreshed >= first.last_refreshed);
    assert!(!second.stale);
}

#[tokio::test]
async fn test_refresh_failure_serves_stale_entry() {
    let (_tmp, git, cache) = cache_with(FakeGit {
        fail_pull: true,
        ..Default::default()
    });

    let first = cache.materialize("https://github.com/acme/webapp").await.unwrap();
    let second = cache.materialize("https://github.com/acme/webapp").await.unwrap();

    assert_eq!(git.clones(), 1);
    assert_eq!(second.path, first.path);
    assert_eq!(second.commit, first.commit);
    assert_eq!(second.last_refreshed, first.last_refreshed);
    assert!(second.stale);
}

#[tokio::test]
async fn test_clone_failure_removes_partial_directory() {
    let (_tmp, git, cache) = cache_with(FakeGit {
        fail_clone: true,
        ..Default::default()
    });
    let url = "https://github.com/acme/private";

    let err = cache.materialize(url).await.unwrap_err();
    assert!(matches!(err, CacheError::Clone { .. }));

    let path = cache.path_for(url).unwrap();
    assert!(!path.exists());
    assert!(!metadata_path(&path).exists());

    // A retry lands in the same path and tries again from scratch
    assert!(cache.materialize(url).await.is_err());
    assert_eq!(git.clones(), 2);
}

#[tokio::test]
async fn test_leftover_directory_without_git_is_recloned() {
    let (_tmp, git, cache) = cache_with(FakeGit::default());
    let url = "https://github.com/acme/webapp";
    let path = cache.path_for(url).unwrap();
    std::fs::create_dir_all(path.join("src")).unwrap();

    let entry = cache.materialize(url).await.unwrap();
    assert_eq!(entry.path, path);
    assert_eq!(git.clones(), 1);
    assert!(!path.join("src").exists());
}

#[tokio::test]
async fn test_interrupted_clone_is_recloned_not_served() {
    let (_tmp, git, cache) = cache_with(FakeGit {
        stall_next_clone: AtomicBool::new(true),
        ..Default::default()
    });
    let url = "https://github.com/acme/webapp";
    let path = cache.path_for(url).unwrap();

    let interrupted = tokio::time::timeout(Duration::from_millis(50), cache.materialize(url)).await;
    assert!(interrupted.is_err());
    assert!(path.join(".git").is_dir());
    assert!(!metadata_path(&path).exists());

    let entry = cache.materialize(url).await.unwrap();
    assert_eq!(git.clones(), 2);
    assert_eq!(git.pulls(), 0);
    assert_eq!(entry.path, path);
    assert_eq!(entry.commit.len(), 40);
    assert!(!entry.stale);
    assert!(metadata_path(&path).exists());
}

#[tokio::test]
async fn test_entry_with_lost_metadata_is_recloned() {
    let (_tmp, git, cache) = cache_with(FakeGit::default());
    let url = "https://github.com/acme/webapp";

    let first = cache.materialize(url).await.unwrap();
    std::fs::remove_file(metadata_path(&first.path)).unwrap();

    let second = cache.materialize(url).await.unwrap();
    assert_eq!(git.clones(), 2);
    assert_eq!(git.pulls(), 0);
    assert_eq!(second.commit, first.commit);
    assert!(metadata_path(&second.path).exists());
}

#[tokio::test]
async fn test_distinct_urls_never_share_directories() {
    let (_tmp, _git, cache) = cache_with(FakeGit::default());

    let a = cache.materialize("https://github.com/acme/webapp").await.unwrap();
    let b = cache.materialize("https://gitlab.com/acme/webapp").await.unwrap();
    assert_ne!(a.path, b.path);
    assert_ne!(a.key, b.key);

    cache.evict(&a.path).await.unwrap();
    assert!(!a.path.exists());
    assert!(!metadata_path(&a.path).exists());
    assert!(b.path.join(".git").is_dir());
    assert!(metadata_path(&b.path).exists());
}

#[tokio::test]
async fn test_evict_is_idempotent() {
    let (_tmp, _git, cache) = cache_with(FakeGit::default());
    let entry = cache.materialize("https://github.com/acme/webapp").await.unwrap();

    cache.evict(&entry.path).await.unwrap();
    cache.evict(&entry.path).await.unwrap();
    cache.evict_url("https://github.com/acme/never-cloned").await.unwrap();
}

#[tokio::test]
async fn test_evict_rejects_paths_outside_root() {
    let (tmp, _git, cache) = cache_with(FakeGit::default());

    let outside = tmp.path().join("elsewhere");
    assert!(matches!(
        cache.evict(&outside).await,
        Err(CacheError::OutsideRoot(_))
    ));
    assert!(matches!(
        cache.evict(&cache.root().join("..").join("elsewhere")).await,
        Err(CacheError::OutsideRoot(_))
    ));
    assert!(matches!(
        cache.evict(cache.root()).await,
        Err(CacheError::OutsideRoot(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_evict_accepts_paths_through_symlinked_root() {
    let tmp = TempDir::new().unwrap();
    let real = tmp.path().join("real");
    let link = tmp.path().join("link");
    std::fs::create_dir_all(&real).unwrap();
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let git = Arc::new(FakeGit::default());
    let cache = RepoCache::new(link.join("repos"), git.clone());
    let url = "https://github.com/acme/webapp";
    let name = cache.path_for(url).unwrap().file_name().unwrap().to_owned();

    // Missing entry under either spelling of the root is a no-op
    cache.evict(&link.join("repos").join(&name)).await.unwrap();
    cache.evict(&real.join("repos").join(&name)).await.unwrap();

    let entry = cache.materialize(url).await.unwrap();
    cache.evict(&link.join("repos").join(&name)).await.unwrap();
    assert!(!entry.path.exists());
    assert!(!metadata_path(&entry.path).exists());

    assert!(matches!(
        cache.evict(&link.join("elsewhere")).await,
        Err(CacheError::OutsideRoot(_))
    ));
}

#[tokio::test]
async fn test_evict_then_materialize_clones_again() {
    let (_tmp, git, cache) = cache_with(FakeGit::default());
    let url = "https://github.com/acme/webapp";

    let entry = cache.materialize(url).await.unwrap();
    cache.evict(&entry.path).await.unwrap();
    let again = cache.materialize(url).await.unwrap();

    assert_eq!(again.path, entry.path);
    assert_eq!(git.clones(), 2);
}

#[tokio::test]
async fn test_get_info_defaults_for_non_repository() {
    let (tmp, _git, cache) = cache_with(FakeGit::default());

    let info = cache.get_info(tmp.path()).await;
    assert_eq!(info, RepoInfo::default());

    let info = cache.get_info(&tmp.path().join("missing")).await;
    assert!(info.commit.is_empty());
    assert_eq!(info.branch, DEFAULT_BRANCH);
}

#[tokio::test]
async fn test_invalid_url_rejected() {
    let (_tmp, git, cache) = cache_with(FakeGit::default());
    assert!(matches!(
        cache.materialize("  ").await,
        Err(CacheError::InvalidUrl(_))
    ));
    assert_eq!(git.clones(), 0);
}
