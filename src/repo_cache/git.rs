//! Git operations used by the repository cache.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Branch reported for paths that are not repositories
pub const DEFAULT_BRANCH: &str = "main";

/// Current revision of a working copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub commit: String,
    pub branch: String,
}

impl Default for RepoInfo {
    fn default() -> Self {
        Self {
            commit: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
        }
    }
}

/// Clone, refresh and inspect working copies
#[async_trait]
pub trait GitOps: Send + Sync {
    /// Shallow-clone `url` into `dest`, which must not exist yet.
    async fn clone_shallow(&self, url: &str, dest: &Path) -> Result<()>;

    /// Fast-forward an existing working copy to the latest remote revision.
    async fn pull(&self, repo: &Path) -> Result<()>;

    /// Commit hash and branch name of `HEAD`.
    async fn head(&self, repo: &Path) -> Result<RepoInfo>;
}

/// [`GitOps`] backed by the `git` command line
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    async fn run(cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        debug!("Running git {}", args.join(" "));
        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitOps for GitCli {
    async fn clone_shallow(&self, url: &str, dest: &Path) -> Result<()> {
        let dest = dest
            .to_str()
            .with_context(|| format!("Non UTF-8 clone destination: {}", dest.display()))?;
        Self::run(None, &["clone", "--depth", "1", "--", url, dest]).await?;
        Ok(())
    }

    async fn pull(&self, repo: &Path) -> Result<()> {
        Self::run(Some(repo), &["pull", "--ff-only"]).await?;
        Ok(())
    }

    async fn head(&self, repo: &Path) -> Result<RepoInfo> {
        let commit = Self::run(Some(repo), &["rev-parse", "HEAD"]).await?;
        let branch = Self::run(Some(repo), &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(RepoInfo { commit, branch })
    }
}
