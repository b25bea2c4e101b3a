#![forbid(unsafe_code)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::core::git::{Git, WorktreeListEntry};
use crate::core::naming;
use crate::error::GwfleetError;
use crate::events::{EventSender, FleetEvent};
use crate::store::FleetStore;
use crate::store::model::{Repository, Worktree};

/// Callback for carrying external session history along with a worktree
/// whose directory moved. Receives the old and the new path.
pub type SessionMigrator = dyn Fn(&Path, &Path) -> anyhow::Result<()> + Send + Sync;

/// Sequences the multi-step worktree operations: filesystem moves, git
/// calls and store mutations in the right order, with the store as the
/// single writer. Cheap to clone; clones share the same store and
/// runner.
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<FleetStore>,
    git: Git,
    config: Config,
    events: EventSender,
    migrator: Option<Arc<SessionMigrator>>,
}

/// Outcome of a delete request.
#[derive(Debug)]
pub enum DeleteRequest {
    /// The worktree was clean. Its record is already gone and the git
    /// removal runs in the background.
    Started,
    /// The worktree has local changes; the caller must resolve the
    /// pending request either way.
    NeedsConfirmation(PendingDelete),
    /// Nothing registered under that id.
    UnknownWorktree,
}

/// A delete waiting on the user. [`confirm`](PendingDelete::confirm)
/// proceeds with a forced removal, [`cancel`](PendingDelete::cancel)
/// discards the request and changes nothing.
pub struct PendingDelete {
    manager: LifecycleManager,
    repository_id: String,
    source_path: PathBuf,
    worktree: Worktree,
}

/// What an import pass did. Entries that could not be imported carry
/// the reason they were skipped.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<Worktree>,
    pub skipped: Vec<SkippedImport>,
}

#[derive(Debug)]
pub struct SkippedImport {
    pub path: PathBuf,
    pub reason: String,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(store: Arc<FleetStore>, git: Git, config: Config, events: EventSender) -> Self {
        Self {
            store,
            git,
            config,
            events,
            migrator: None,
        }
    }

    /// Installs the session-history callback. Set this up before
    /// handing out clones.
    pub fn set_session_migrator(
        &mut self,
        migrator: impl Fn(&Path, &Path) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.migrator = Some(Arc::new(migrator));
    }

    /// Registers the repository rooted at `path` and selects it. The
    /// path must be the top level of an existing git repository and not
    /// already registered.
    pub async fn add_repository(&self, path: &Path) -> Result<Repository, GwfleetError> {
        if !path.exists() {
            return Err(GwfleetError::SourcePathMissing(path.to_path_buf()));
        }
        let canonical = std::fs::canonicalize(path).map_err(|e| GwfleetError::IoPath {
            path: path.to_path_buf(),
            source: e,
        })?;
        if self.store.repository_by_source(&canonical).is_some() {
            return Err(GwfleetError::RepositoryExists(canonical));
        }

        let root = self
            .git
            .repository_root(&canonical)
            .await
            .map_err(|_| GwfleetError::NotAGitRepo(canonical.clone()))?;
        if !paths_equal(&root, &canonical) {
            // Inside a repository but not at its top level.
            return Err(GwfleetError::NotAGitRepo(canonical));
        }

        let name = naming::path_basename(&canonical);
        let repo = Repository::new(name, &canonical);
        if !self.store.add_repository(repo.clone()) {
            return Err(GwfleetError::RepositoryExists(canonical));
        }
        self.store.select_repository(&repo.id);
        info!("tracking repository {} at {}", repo.name, repo.source_path);
        Ok(repo)
    }

    /// Drops the repository record and all of its worktree records.
    /// The on-disk repository and worktree directories stay untouched.
    pub fn remove_repository(&self, id: &str) -> bool {
        self.store.remove_repository(id)
    }

    /// Materializes a new worktree under the managed directory and
    /// registers it. No store mutation happens unless git succeeds.
    pub async fn create_worktree(
        &self,
        repository_id: &str,
        name: &str,
        branch: &str,
        create_branch: bool,
    ) -> Result<Worktree, GwfleetError> {
        let repo = self
            .store
            .repository(repository_id)
            .ok_or_else(|| GwfleetError::RepositoryNotFound(repository_id.to_owned()))?;
        let source = PathBuf::from(&repo.source_path);
        // Source repositories move or disappear externally; check every
        // time.
        if !source.exists() {
            return Err(GwfleetError::SourcePathMissing(source));
        }

        let dir_name = naming::sanitize_for_filesystem(name);
        if dir_name.is_empty() {
            return Err(GwfleetError::InvalidName(name.to_owned()));
        }
        let managed = self.managed_dir(&repo)?;
        let target = managed.join(&dir_name);
        if target.exists() || self.store.worktree_path_taken(&target, None) {
            return Err(GwfleetError::PathTaken(target));
        }

        if self.config.fleet.auto_mkdir {
            std::fs::create_dir_all(&managed).map_err(|e| GwfleetError::IoPath {
                path: managed.clone(),
                source: e,
            })?;
        }

        self.git
            .add_worktree(&source, &target, branch, create_branch)
            .await?;

        let worktree = Worktree::new(name, branch, &target);
        self.store.add_worktree(&repo.id, worktree.clone());
        self.store.select_worktree(&worktree.id);
        info!("created worktree {} on {}", worktree.name, worktree.branch);
        Ok(worktree)
    }

    /// Starts deleting a worktree. Clean worktrees are removed right
    /// away (record first, directory in the background); dirty ones
    /// come back as [`DeleteRequest::NeedsConfirmation`].
    pub async fn delete_worktree(&self, id: &str) -> DeleteRequest {
        let Some((repo, worktree)) = self.store.find_worktree(id) else {
            return DeleteRequest::UnknownWorktree;
        };
        let source = PathBuf::from(&repo.source_path);

        // An unprobeable worktree is handled like a dirty one: the user
        // decides.
        let dirty = match self.git.is_dirty(Path::new(&worktree.path)).await {
            Ok(dirty) => dirty,
            Err(_) => true,
        };
        if dirty {
            return DeleteRequest::NeedsConfirmation(PendingDelete {
                manager: self.clone(),
                repository_id: repo.id,
                source_path: source,
                worktree,
            });
        }

        self.remove_and_spawn_removal(source, worktree, false);
        DeleteRequest::Started
    }

    /// Drops the record without touching git or the filesystem. For
    /// worktrees whose working copy is already gone.
    pub fn forget_worktree(&self, id: &str) -> bool {
        self.store.remove_worktree(id)
    }

    pub fn archive_worktree(&self, id: &str) -> bool {
        self.store.set_worktree_archived(id, true)
    }

    pub fn unarchive_worktree(&self, id: &str) -> bool {
        self.store.set_worktree_archived(id, false)
    }

    /// Renames a worktree: moves the directory to a sibling path, lets
    /// git repair its administrative links, migrates session history,
    /// then commits the new name and path to the store. A failure
    /// leaves the store on the old record; completed filesystem steps
    /// are not undone, and a retry picks up where the last attempt
    /// stopped.
    pub async fn rename_worktree(&self, id: &str, new_name: &str) -> Result<(), GwfleetError> {
        let (repo, worktree) = self
            .store
            .find_worktree(id)
            .ok_or_else(|| GwfleetError::WorktreeNotFound(id.to_owned()))?;

        let dir_name = naming::sanitize_for_filesystem(new_name);
        if dir_name.is_empty() {
            return Err(GwfleetError::InvalidName(new_name.to_owned()));
        }
        let old_path = PathBuf::from(&worktree.path);
        let parent = old_path.parent().ok_or_else(|| {
            GwfleetError::Other(format!("worktree path has no parent: {}", old_path.display()))
        })?;
        let new_path = parent.join(&dir_name);

        if new_path == old_path {
            // Same directory; only the display name changes.
            self.store.set_worktree_location(id, new_name, &old_path);
            return Ok(());
        }
        if self.store.worktree_path_taken(&new_path, Some(id)) {
            return Err(GwfleetError::PathTaken(new_path));
        }

        if old_path.exists() {
            if new_path.exists() {
                return Err(GwfleetError::PathTaken(new_path));
            }
            std::fs::rename(&old_path, &new_path).map_err(|e| GwfleetError::IoPath {
                path: old_path.clone(),
                source: e,
            })?;
        } else if !new_path.exists() {
            return Err(GwfleetError::WorktreeDirMissing(old_path));
        }
        // The directory is at new_path now. A retry after a failed
        // repair re-enters here with the move already done.

        let source = PathBuf::from(&repo.source_path);
        self.git.repair_worktree(&source, &new_path).await?;
        self.migrate_session(&old_path, &new_path);
        self.store.set_worktree_location(id, new_name, &new_path);
        info!(
            "renamed worktree {} -> {}",
            old_path.display(),
            new_path.display()
        );
        Ok(())
    }

    /// Moves the branch a worktree is on to a new name. Touches only
    /// the branch field; directory and display name stay.
    pub async fn rename_branch(&self, id: &str, new_branch: &str) -> Result<(), GwfleetError> {
        let (_, worktree) = self
            .store
            .find_worktree(id)
            .ok_or_else(|| GwfleetError::WorktreeNotFound(id.to_owned()))?;
        if worktree.branch == new_branch {
            return Ok(());
        }
        self.git
            .rename_branch(Path::new(&worktree.path), &worktree.branch, new_branch)
            .await?;
        self.store.set_worktree_branch(id, new_branch);
        Ok(())
    }

    /// Brings every worktree git knows about under management. Entries
    /// already inside the managed directory are registered in place;
    /// the rest are moved there first. One entry failing does not stop
    /// the batch; failures come back in the report.
    pub async fn import_worktrees(
        &self,
        repository_id: &str,
    ) -> Result<ImportReport, GwfleetError> {
        let repo = self
            .store
            .repository(repository_id)
            .ok_or_else(|| GwfleetError::RepositoryNotFound(repository_id.to_owned()))?;
        let source = PathBuf::from(&repo.source_path);
        if !source.exists() {
            return Err(GwfleetError::SourcePathMissing(source));
        }

        let entries = self.git.list_worktrees(&source).await?;
        let managed = self.managed_dir(&repo)?;
        if self.config.fleet.auto_mkdir {
            std::fs::create_dir_all(&managed).map_err(|e| GwfleetError::IoPath {
                path: managed.clone(),
                source: e,
            })?;
        }

        let mut report = ImportReport::default();
        for entry in entries {
            let entry_path = PathBuf::from(&entry.path);
            // The main working copy is never a managed worktree.
            if paths_equal(&entry_path, &source) {
                continue;
            }
            match self.import_entry(&repo, &source, &managed, &entry).await {
                Ok(Some(worktree)) => report.imported.push(worktree),
                Ok(None) => {}
                Err(e) => {
                    warn!("import skipped {}: {e}", entry_path.display());
                    report.skipped.push(SkippedImport {
                        path: entry_path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            "import finished: {} adopted, {} skipped",
            report.imported.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Whether the worktree's record still resolves to a git-recognized
    /// working copy. `None` for an unknown id.
    pub async fn worktree_is_valid(&self, id: &str) -> Option<bool> {
        let (_, worktree) = self.store.find_worktree(id)?;
        Some(self.git.is_valid_worktree(Path::new(&worktree.path)).await)
    }

    async fn import_entry(
        &self,
        repo: &Repository,
        source: &Path,
        managed: &Path,
        entry: &WorktreeListEntry,
    ) -> Result<Option<Worktree>, GwfleetError> {
        let entry_path = PathBuf::from(&entry.path);
        let name = naming::path_basename(&entry_path);

        if canonical_or_raw(&entry_path).starts_with(canonical_or_raw(managed)) {
            if self.store.worktree_path_taken(&entry_path, None) {
                // Already registered; nothing to do.
                return Ok(None);
            }
            let worktree = Worktree::new(name, entry.branch.clone(), &entry_path);
            self.store.add_worktree(&repo.id, worktree.clone());
            return Ok(Some(worktree));
        }

        let dir_name = naming::sanitize_for_filesystem(&name);
        if dir_name.is_empty() {
            return Err(GwfleetError::InvalidName(name));
        }
        let dest = managed.join(&dir_name);
        if self.store.worktree_path_taken(&dest, None) {
            return Err(GwfleetError::PathTaken(dest));
        }
        if entry_path.exists() {
            if dest.exists() {
                return Err(GwfleetError::PathTaken(dest));
            }
            std::fs::rename(&entry_path, &dest).map_err(|e| GwfleetError::IoPath {
                path: entry_path.clone(),
                source: e,
            })?;
        } else if !dest.exists() {
            return Err(GwfleetError::WorktreeDirMissing(entry_path));
        }
        // The directory is at dest now. A retry after a failed repair
        // re-enters here with the move already done.
        self.git.repair_worktree(source, &dest).await?;
        self.migrate_session(&entry_path, &dest);

        let worktree = Worktree::new(name, entry.branch.clone(), &dest);
        self.store.add_worktree(&repo.id, worktree.clone());
        Ok(Some(worktree))
    }

    /// Store record out first, then the slow git removal in the
    /// background. A failing removal does not bring the record back; it
    /// surfaces as [`FleetEvent::CleanupNeeded`].
    fn remove_and_spawn_removal(&self, source: PathBuf, worktree: Worktree, force: bool) {
        self.store.remove_worktree(&worktree.id);
        let git = self.git.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let path = PathBuf::from(&worktree.path);
            if let Err(e) = git.remove_worktree(&source, &path, force).await {
                warn!("worktree removal failed for {}: {e}", path.display());
                let _ = events.send(FleetEvent::CleanupNeeded {
                    worktree_name: worktree.name,
                    path,
                    error: e.to_string(),
                });
            }
        });
    }

    /// Base directory for this repository's managed worktrees.
    fn managed_dir(&self, repo: &Repository) -> Result<PathBuf, GwfleetError> {
        let base = self
            .config
            .worktree_base()
            .map_err(|e| GwfleetError::Other(e.to_string()))?;
        let namespace = naming::sanitize_for_filesystem(&repo.name);
        if namespace.is_empty() {
            return Ok(base.join(&repo.id));
        }
        Ok(base.join(namespace))
    }

    /// Best effort: migration trouble is logged, the operation that
    /// moved the directory still completes.
    fn migrate_session(&self, old: &Path, new: &Path) {
        if let Some(migrator) = &self.migrator
            && let Err(e) = migrator(old, new)
        {
            warn!(
                "session history migration {} -> {} failed: {e:#}",
                old.display(),
                new.display()
            );
        }
    }
}

impl PendingDelete {
    #[must_use]
    pub fn worktree(&self) -> &Worktree {
        &self.worktree
    }

    #[must_use]
    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Deletes despite local changes: record out now, forced git
    /// removal in the background.
    pub async fn confirm(self) {
        self.manager
            .remove_and_spawn_removal(self.source_path, self.worktree, true);
    }

    /// Drops the request. Store and disk stay as they were.
    pub fn cancel(self) {}
}

impl fmt::Debug for PendingDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDelete")
            .field("repository_id", &self.repository_id)
            .field("worktree", &self.worktree.name)
            .finish_non_exhaustive()
    }
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
