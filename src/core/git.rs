#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::exec::{CommandOutput, CommandRunner, SystemRunner};
use crate::error::GwfleetError;

/// One record from `git worktree list --porcelain`. `branch` is empty for
/// a detached HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeListEntry {
    pub path: String,
    pub branch: String,
    pub head: String,
}

/// Thin git front end. All repository-touching commands in the crate go
/// through here so tests can swap the runner.
#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(SystemRunner))
    }

    pub async fn repository_root(&self, dir: &Path) -> Result<PathBuf, GwfleetError> {
        let out = self.run(dir, &["rev-parse", "--show-toplevel"]).await?;
        Ok(PathBuf::from(out.trim()))
    }

    pub async fn current_branch(&self, dir: &Path) -> Result<String, GwfleetError> {
        let out = self.run(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_owned())
    }

    pub async fn list_branches(&self, dir: &Path) -> Result<Vec<String>, GwfleetError> {
        let out = self
            .run(dir, &["branch", "--format=%(refname:short)"])
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    pub async fn add_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        create_branch: bool,
    ) -> Result<(), GwfleetError> {
        let path = path.to_string_lossy();
        if create_branch {
            let _ = self
                .run(repo, &["worktree", "add", "-b", branch, &path])
                .await?;
        } else {
            let _ = self.run(repo, &["worktree", "add", &path, branch]).await?;
        }
        Ok(())
    }

    pub async fn remove_worktree(
        &self,
        repo: &Path,
        path: &Path,
        force: bool,
    ) -> Result<(), GwfleetError> {
        let path = path.to_string_lossy();
        if force {
            let _ = self
                .run(repo, &["worktree", "remove", "--force", &path])
                .await?;
        } else {
            let _ = self.run(repo, &["worktree", "remove", &path]).await?;
        }
        Ok(())
    }

    pub async fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeListEntry>, GwfleetError> {
        let out = self.run(repo, &["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_porcelain(&out))
    }

    /// Re-points administrative records after a worktree directory moved.
    pub async fn repair_worktree(&self, repo: &Path, moved: &Path) -> Result<(), GwfleetError> {
        let moved = moved.to_string_lossy();
        let _ = self.run(repo, &["worktree", "repair", &moved]).await?;
        Ok(())
    }

    pub async fn rename_branch(
        &self,
        worktree_dir: &Path,
        old: &str,
        new: &str,
    ) -> Result<(), GwfleetError> {
        let _ = self.run(worktree_dir, &["branch", "-m", old, new]).await?;
        Ok(())
    }

    pub async fn is_dirty(&self, dir: &Path) -> Result<bool, GwfleetError> {
        let out = self.run(dir, &["status", "--porcelain"]).await?;
        Ok(!out.trim().is_empty())
    }

    /// Whether the directory still resolves to a git working copy. Any
    /// failure counts as invalid, including a missing directory.
    pub async fn is_valid_worktree(&self, dir: &Path) -> bool {
        match self.run(dir, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(out) => out.trim() == "true",
            Err(_) => false,
        }
    }

    pub async fn fetch(&self, dir: &Path) -> CommandOutput {
        self.raw(dir, &["fetch", "--all", "--prune"]).await
    }

    pub async fn pull_ff(&self, dir: &Path) -> CommandOutput {
        self.raw(dir, &["pull", "--ff-only"]).await
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GwfleetError> {
        let out = self.raw(dir, args).await;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(GwfleetError::Git {
                command: args.join(" "),
                message: out.error_text(),
            })
        }
    }

    async fn raw(&self, dir: &Path, args: &[&str]) -> CommandOutput {
        self.runner.run("git", args, dir).await
    }
}

fn parse_worktree_porcelain(out: &str) -> Vec<WorktreeListEntry> {
    let mut entries: Vec<WorktreeListEntry> = Vec::new();

    let mut cur_path: Option<String> = None;
    let mut cur_branch = String::new();
    let mut cur_head = String::new();

    for line in out.lines() {
        let line = line.trim_end();
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(p) = cur_path.take() {
                entries.push(WorktreeListEntry {
                    path: p,
                    branch: cur_branch.clone(),
                    head: cur_head.clone(),
                });
                cur_branch.clear();
                cur_head.clear();
            }
            cur_path = Some(path.to_owned());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            branch
                .trim()
                .trim_start_matches("refs/heads/")
                .clone_into(&mut cur_branch);
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            head.trim().clone_into(&mut cur_head);
        }
    }
    if let Some(p) = cur_path.take() {
        entries.push(WorktreeListEntry {
            path: p,
            branch: cur_branch,
            head: cur_head,
        });
    }

    entries
}
