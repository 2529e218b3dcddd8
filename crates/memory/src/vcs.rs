//! Version-control backer: an append-only commit log over the store tree.
//!
//! All functions are best-effort.  If `git` is not installed the store runs
//! without history; genuine git failures are logged and surface as a `None`
//! commit reference rather than failing the calling operation.
//!
//! The repository lives in `.version-control/` inside the store (set via
//! `GIT_DIR`), with the store root as the work tree.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::PalaceError;
use crate::events::{EventHandler, MemoryEvent};
use crate::paths::StorePaths;

#[derive(Debug, Clone)]
pub struct GitBacker {
    work_tree: PathBuf,
    git_dir: PathBuf,
}

impl GitBacker {
    pub fn new(paths: &StorePaths) -> Self {
        Self {
            work_tree: paths.root().to_path_buf(),
            git_dir: paths.git_dir(),
        }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_DIR", &self.git_dir)
            .env("GIT_WORK_TREE", &self.work_tree)
            .env("GIT_AUTHOR_NAME", "Palace")
            .env("GIT_AUTHOR_EMAIL", "palace@localhost")
            .env("GIT_COMMITTER_NAME", "Palace")
            .env("GIT_COMMITTER_EMAIL", "palace@localhost")
            .current_dir(&self.work_tree);
        cmd
    }

    /// Create the repository unless it already exists.  Returns `true` when
    /// a new one was created.  Silently skips when `git` is not in `$PATH`.
    pub async fn init_if_needed(&self) -> Result<bool> {
        if self.git_dir.join("HEAD").exists() {
            return Ok(false);
        }

        let out = self.git().arg("init").output().await;
        match out {
            Ok(o) if o.status.success() => {
                info!(store = %self.work_tree.display(), "initialised version-control history");
                Ok(true)
            }
            Ok(o) => {
                let stderr = String::from_utf8_lossy(&o.stderr);
                warn!(%stderr, "git init failed (non-fatal)");
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Stage every tracked file in the store and commit as
    /// `{scope}: {summary}`.  Returns the short commit hash, or `None` when
    /// there was nothing to commit or git is unavailable.
    pub async fn commit_all(&self, scope: &str, summary: &str) -> Result<Option<String>> {
        if !self.git_dir.join("HEAD").exists() {
            return Ok(None);
        }

        let add = self.git().args(["add", "-A"]).output().await;
        match add {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
            Ok(o) if !o.status.success() => {
                warn!(
                    stderr = %String::from_utf8_lossy(&o.stderr),
                    "git add -A failed (non-fatal)"
                );
                return Ok(None);
            }
            Ok(_) => {}
        }

        // Nothing staged → nothing to record.
        let clean = self
            .git()
            .args(["diff", "--cached", "--quiet"])
            .status()
            .await?;
        if clean.success() {
            return Ok(None);
        }

        let message = format!("{scope}: {}", truncate_utf8(summary, 72));
        let commit = self
            .git()
            .args(["commit", "-m", &message, "--no-verify"])
            .output()
            .await?;
        if !commit.status.success() {
            let stderr = String::from_utf8_lossy(&commit.stderr).trim().to_string();
            return Err(PalaceError::VersionControl(stderr).into());
        }

        let head = self
            .git()
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .await?;
        let reference = if head.status.success() {
            let hash = String::from_utf8_lossy(&head.stdout).trim().to_string();
            (!hash.is_empty()).then_some(hash)
        } else {
            None
        };
        debug!(%message, reference = ?reference, "committed store change");
        Ok(reference)
    }

    /// `true` when the work tree has no uncommitted changes (or git is
    /// unavailable, which the health check reports separately).
    pub async fn is_clean(&self) -> Result<bool> {
        if !self.git_dir.join("HEAD").exists() {
            return Ok(true);
        }
        let out = self.git().args(["status", "--porcelain"]).output().await;
        match out {
            Ok(o) if o.status.success() => {
                Ok(String::from_utf8_lossy(&o.stdout).trim().is_empty())
            }
            Ok(o) => Err(PalaceError::VersionControl(
                String::from_utf8_lossy(&o.stderr).trim().to_string(),
            )
            .into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    pub fn history_exists(&self) -> bool {
        self.git_dir.join("HEAD").exists()
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Built-in post-write handler: commits the store after every event that
/// alters persistent state.  Registered first on the bus.
pub struct CommitHandler {
    git: Arc<GitBacker>,
}

impl CommitHandler {
    pub fn new(git: Arc<GitBacker>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl EventHandler for CommitHandler {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn wants(&self, event: &MemoryEvent) -> bool {
        event.alters_persistent_state()
    }

    async fn handle(&self, event: &MemoryEvent) -> Result<()> {
        match self.git.commit_all(event.scope(), event.summary()).await {
            Ok(_) => Ok(()),
            // Commit failures must not abort the operation; the bus logs us.
            Err(err) => {
                warn!(%err, scope = event.scope(), "commit handler: recording failed");
                Ok(())
            }
        }
    }
}
