#![forbid(unsafe_code)]

pub mod model;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::{EventSender, FleetEvent};
use crate::order;
use crate::store::model::{RepoSettings, Repository, Selection, Worktree};

/// The single writer for repository and worktree records. All reads hand
/// out clones; all mutations persist to disk and emit
/// [`FleetEvent::StoreChanged`].
pub struct FleetStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    events: EventSender,
}

#[derive(Debug, Default)]
struct StoreState {
    repositories: Vec<Repository>,
    selection: Selection,
}

/// On-disk document. Selection is session state and stays out of it.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct FleetDocument {
    repositories: Vec<Repository>,
}

impl FleetStore {
    /// Opens the store at `path`, reading whatever is there. A missing
    /// or unreadable file starts the fleet empty rather than failing.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, events: EventSender) -> Self {
        let path = path.into();
        let repositories = load_document(&path);
        Self {
            path,
            state: Mutex::new(StoreState {
                repositories,
                selection: Selection::None,
            }),
            events,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn repositories(&self) -> Vec<Repository> {
        self.state().repositories.clone()
    }

    #[must_use]
    pub fn repository(&self, id: &str) -> Option<Repository> {
        self.state().repositories.iter().find(|r| r.id == id).cloned()
    }

    #[must_use]
    pub fn repository_by_source(&self, source: &Path) -> Option<Repository> {
        self.state()
            .repositories
            .iter()
            .find(|r| Path::new(&r.source_path) == source)
            .cloned()
    }

    /// The worktree with `id` together with its owning repository.
    #[must_use]
    pub fn find_worktree(&self, id: &str) -> Option<(Repository, Worktree)> {
        let state = self.state();
        for repo in &state.repositories {
            if let Some(wt) = repo.worktree(id) {
                return Some((repo.clone(), wt.clone()));
            }
        }
        None
    }

    /// Whether any registered worktree other than `except_worktree`
    /// already claims `path`.
    #[must_use]
    pub fn worktree_path_taken(&self, path: &Path, except_worktree: Option<&str>) -> bool {
        self.state()
            .repositories
            .iter()
            .flat_map(|r| r.worktrees.iter())
            .any(|w| Path::new(&w.path) == path && except_worktree != Some(w.id.as_str()))
    }

    #[must_use]
    pub fn selection(&self) -> Selection {
        self.state().selection.clone()
    }

    /// Registers a repository. Refuses a second entry for the same
    /// source path.
    pub fn add_repository(&self, repo: Repository) -> bool {
        self.mutate(|s| {
            if s.repositories
                .iter()
                .any(|r| r.source_path == repo.source_path)
            {
                return None;
            }
            s.repositories.push(repo);
            Some(())
        })
        .is_some()
    }

    /// Drops a repository and all of its worktree records. Clears the
    /// selection when it pointed inside the removed repository.
    pub fn remove_repository(&self, id: &str) -> bool {
        self.mutate(|s| {
            let i = s.repositories.iter().position(|r| r.id == id)?;
            let repo = s.repositories.remove(i);
            let selected_owned = match &s.selection {
                Selection::Repository(sel) => *sel == repo.id,
                Selection::Worktree(sel) => repo.worktrees.iter().any(|w| w.id == *sel),
                Selection::None => false,
            };
            if selected_owned {
                s.selection = Selection::None;
            }
            Some(())
        })
        .is_some()
    }

    pub fn set_repository_settings(&self, id: &str, settings: RepoSettings) -> bool {
        self.mutate(|s| {
            let repo = s.repositories.iter_mut().find(|r| r.id == id)?;
            repo.settings = settings;
            Some(())
        })
        .is_some()
    }

    pub fn add_worktree(&self, repo_id: &str, worktree: Worktree) -> bool {
        self.mutate(|s| {
            let repo = s.repositories.iter_mut().find(|r| r.id == repo_id)?;
            repo.worktrees.push(worktree);
            Some(())
        })
        .is_some()
    }

    /// Forgets a worktree record. Clears the selection when it pointed
    /// at the removed entry. The working copy on disk is not touched.
    pub fn remove_worktree(&self, id: &str) -> bool {
        self.mutate(|s| {
            let repo = s
                .repositories
                .iter_mut()
                .find(|r| r.worktrees.iter().any(|w| w.id == id))?;
            repo.worktrees.retain(|w| w.id != id);
            if matches!(&s.selection, Selection::Worktree(sel) if sel == id) {
                s.selection = Selection::None;
            }
            Some(())
        })
        .is_some()
    }

    /// Archiving hides the entry and drops it from the selection;
    /// every other field survives for a later unarchive.
    pub fn set_worktree_archived(&self, id: &str, archived: bool) -> bool {
        self.mutate(|s| {
            let wt = s.worktree_mut(id)?;
            if wt.archived == archived {
                return None;
            }
            wt.archived = archived;
            if archived && matches!(&s.selection, Selection::Worktree(sel) if sel == id) {
                s.selection = Selection::None;
            }
            Some(())
        })
        .is_some()
    }

    /// Commits a rename: new display name plus new directory path.
    pub fn set_worktree_location(&self, id: &str, name: &str, path: &Path) -> bool {
        self.mutate(|s| {
            let wt = s.worktree_mut(id)?;
            wt.name = name.to_owned();
            wt.path = path.to_string_lossy().into_owned();
            Some(())
        })
        .is_some()
    }

    pub fn set_worktree_branch(&self, id: &str, branch: &str) -> bool {
        self.mutate(|s| {
            let wt = s.worktree_mut(id)?;
            wt.branch = branch.to_owned();
            Some(())
        })
        .is_some()
    }

    pub fn select_repository(&self, id: &str) -> bool {
        let mut state = self.state();
        if !state.repositories.iter().any(|r| r.id == id) {
            return false;
        }
        set_selection(&mut state, Selection::Repository(id.to_owned()), &self.events);
        true
    }

    pub fn select_worktree(&self, id: &str) -> bool {
        let mut state = self.state();
        let exists = state
            .repositories
            .iter()
            .flat_map(|r| r.worktrees.iter())
            .any(|w| w.id == id);
        if !exists {
            return false;
        }
        set_selection(&mut state, Selection::Worktree(id.to_owned()), &self.events);
        true
    }

    pub fn clear_selection(&self) {
        let mut state = self.state();
        set_selection(&mut state, Selection::None, &self.events);
    }

    /// Moves a repository to `to_index` in the displayed list and
    /// rewrites every repository's manual position densely in the new
    /// order.
    pub fn move_repository(&self, id: &str, to_index: usize) -> bool {
        self.mutate(|s| {
            let shown = order::sorted_repositories(&s.repositories);
            let ids: Vec<String> = shown.iter().map(|r| r.id.clone()).collect();
            let new_order = order::moved_order(&ids, id, to_index)?;
            for (i, ordered_id) in new_order.iter().enumerate() {
                if let Some(repo) = s.repositories.iter_mut().find(|r| r.id == *ordered_id) {
                    repo.sort_order = Some(i as i64);
                }
            }
            Some(())
        })
        .is_some()
    }

    /// Moves a worktree within its repository's visible list, assigning
    /// dense manual positions to every visible entry. Archived entries
    /// keep whatever position they had.
    pub fn move_worktree(&self, repo_id: &str, worktree_id: &str, to_index: usize) -> bool {
        self.mutate(|s| {
            let repo = s.repositories.iter_mut().find(|r| r.id == repo_id)?;
            let visible = order::visible_worktrees(&repo.worktrees);
            let ids: Vec<String> = visible.iter().map(|w| w.id.clone()).collect();
            let new_order = order::moved_order(&ids, worktree_id, to_index)?;
            for (i, ordered_id) in new_order.iter().enumerate() {
                if let Some(wt) = repo.worktrees.iter_mut().find(|w| w.id == *ordered_id) {
                    wt.sort_order = Some(i as i64);
                }
            }
            Some(())
        })
        .is_some()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        // Poisoned only if a mutating closure panicked; the last state
        // is still the one to serve.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a mutation. `None` from the closure means nothing changed:
    /// no write, no event.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> Option<R>) -> Option<R> {
        let mut state = self.state();
        let result = f(&mut state)?;
        if let Err(e) = self.write_document(&state) {
            // The in-memory change stands; next successful save
            // catches the file up.
            warn!("failed to save {}: {e:#}", self.path.display());
        }
        let _ = self.events.send(FleetEvent::StoreChanged);
        Some(result)
    }

    fn write_document(&self, state: &StoreState) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let doc = FleetDocument {
            repositories: state.repositories.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&doc)?;
        std::fs::write(&tmp, &data)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!("failed to rename {} -> {}", tmp.display(), self.path.display())
        })?;
        Ok(())
    }
}

impl StoreState {
    fn worktree_mut(&mut self, id: &str) -> Option<&mut Worktree> {
        self.repositories
            .iter_mut()
            .flat_map(|r| r.worktrees.iter_mut())
            .find(|w| w.id == id)
    }
}

fn set_selection(state: &mut StoreState, selection: Selection, events: &EventSender) {
    if state.selection != selection {
        state.selection = selection;
        let _ = events.send(FleetEvent::StoreChanged);
    }
}

fn load_document(path: &Path) -> Vec<Repository> {
    if !path.exists() {
        return Vec::new();
    }
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!("failed to read {}: {e}; starting empty", path.display());
            return Vec::new();
        }
    };
    match serde_json::from_slice::<FleetDocument>(&data) {
        Ok(doc) => doc.repositories,
        Err(e) => {
            warn!("failed to parse {}: {e}; starting empty", path.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    use tempfile::TempDir;

    fn new_store(dir: &TempDir) -> (FleetStore, events::EventReceiver) {
        let (tx, rx) = events::channel();
        (FleetStore::open(dir.path().join("fleet.json"), tx), rx)
    }

    fn seeded(dir: &TempDir) -> (FleetStore, events::EventReceiver, Repository, Worktree) {
        let (store, mut rx) = new_store(dir);
        let mut repo = Repository::new("demo", &dir.path().join("src"));
        let wt = Worktree::new("feat", "feature/x", &dir.path().join("wt/feat"));
        repo.worktrees.push(wt.clone());
        assert!(store.add_repository(repo.clone()));
        while rx.try_recv().is_ok() {}
        (store, rx, repo, wt)
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let (store, _rx, repo, wt) = seeded(&dir);
        store.select_worktree(&wt.id);
        drop(store);

        let (reopened, _rx) = new_store(&dir);
        let repos = reopened.repositories();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].id, repo.id);
        assert_eq!(repos[0].worktrees[0].id, wt.id);
        // Selection is session state and does not survive a restart.
        assert_eq!(reopened.selection(), Selection::None);
    }

    #[test]
    fn corrupt_document_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fleet.json"), b"{ not json").unwrap();
        let (store, _rx) = new_store(&dir);
        assert!(store.repositories().is_empty());
    }

    #[test]
    fn duplicate_source_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (store, _rx, _repo, _wt) = seeded(&dir);
        let again = Repository::new("demo-again", &dir.path().join("src"));
        assert!(!store.add_repository(again));
        assert_eq!(store.repositories().len(), 1);
    }

    #[test]
    fn mutations_emit_store_changed() {
        let dir = TempDir::new().unwrap();
        let (store, mut rx) = new_store(&dir);
        assert!(store.add_repository(Repository::new("demo", &dir.path().join("src"))));
        assert_eq!(rx.try_recv().unwrap(), FleetEvent::StoreChanged);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn archive_clears_selection_and_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let (store, _rx, repo, wt) = seeded(&dir);
        assert!(store.select_worktree(&wt.id));

        assert!(store.set_worktree_archived(&wt.id, true));
        assert_eq!(store.selection(), Selection::None);

        let (_, archived) = store.find_worktree(&wt.id).unwrap();
        assert!(archived.archived);
        assert_eq!(archived.branch, wt.branch);
        assert_eq!(archived.path, wt.path);
        assert_eq!(archived.created_at, wt.created_at);

        // Unarchive restores visibility without reinstating selection.
        assert!(store.set_worktree_archived(&wt.id, false));
        assert_eq!(store.selection(), Selection::None);
        let (owner, restored) = store.find_worktree(&wt.id).unwrap();
        assert_eq!(owner.id, repo.id);
        assert!(!restored.archived);
    }

    #[test]
    fn settings_update_and_selection_clear() {
        let dir = TempDir::new().unwrap();
        let (store, _rx, repo, _wt) = seeded(&dir);

        let settings = RepoSettings {
            terminal: Some("alacritty".to_owned()),
            launch_command: None,
        };
        assert!(store.set_repository_settings(&repo.id, settings.clone()));
        assert_eq!(store.repository(&repo.id).unwrap().settings, settings);

        assert!(store.select_repository(&repo.id));
        store.clear_selection();
        assert_eq!(store.selection(), Selection::None);
    }

    #[test]
    fn archiving_twice_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let (store, mut rx, _repo, wt) = seeded(&dir);
        assert!(store.set_worktree_archived(&wt.id, true));
        let _ = rx.try_recv();
        assert!(!store.set_worktree_archived(&wt.id, true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removing_repository_clears_selection_of_owned_worktree() {
        let dir = TempDir::new().unwrap();
        let (store, _rx, repo, wt) = seeded(&dir);
        assert!(store.select_worktree(&wt.id));
        assert!(store.remove_repository(&repo.id));
        assert_eq!(store.selection(), Selection::None);
        assert!(store.repositories().is_empty());
    }

    #[test]
    fn removing_repository_keeps_unrelated_selection() {
        let dir = TempDir::new().unwrap();
        let (store, _rx, repo, _wt) = seeded(&dir);
        let other = Repository::new("other", &dir.path().join("other"));
        assert!(store.add_repository(other.clone()));
        assert!(store.select_repository(&other.id));

        assert!(store.remove_repository(&repo.id));
        assert_eq!(store.selection(), Selection::Repository(other.id));
    }

    #[test]
    fn removing_selected_worktree_clears_selection() {
        let dir = TempDir::new().unwrap();
        let (store, _rx, _repo, wt) = seeded(&dir);
        assert!(store.select_worktree(&wt.id));
        assert!(store.remove_worktree(&wt.id));
        assert_eq!(store.selection(), Selection::None);
        assert!(store.find_worktree(&wt.id).is_none());
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let dir = TempDir::new().unwrap();
        let (store, mut rx) = new_store(&dir);
        assert!(!store.remove_worktree("nope"));
        assert!(!store.set_worktree_archived("nope", true));
        assert!(!store.select_repository("nope"));
        assert!(!store.move_worktree("nope", "nope", 0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn move_worktree_assigns_dense_positions() {
        let dir = TempDir::new().unwrap();
        let (store, _rx) = new_store(&dir);
        let mut repo = Repository::new("demo", &dir.path().join("src"));
        for (name, created) in [
            ("a", "2025-01-01T00:00:00Z"),
            ("b", "2025-01-02T00:00:00Z"),
            ("c", "2025-01-03T00:00:00Z"),
        ] {
            let mut wt = Worktree::new(name, "main", &dir.path().join(name));
            wt.created_at = created.to_owned();
            repo.worktrees.push(wt);
        }
        assert!(store.add_repository(repo.clone()));

        // Visible order is newest-first: c, b, a.
        let id_of = |name: &str| {
            repo.worktrees
                .iter()
                .find(|w| w.name == name)
                .unwrap()
                .id
                .clone()
        };
        assert!(store.move_worktree(&repo.id, &id_of("a"), 0));

        let stored = store.repository(&repo.id).unwrap();
        let shown = order::visible_worktrees(&stored.worktrees);
        let names: Vec<&str> = shown.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["a", "c", "b"]);
        for (i, wt) in shown.iter().enumerate() {
            assert_eq!(wt.sort_order, Some(i as i64));
        }
    }

    #[test]
    fn moving_to_the_same_index_keeps_visible_order() {
        let dir = TempDir::new().unwrap();
        let (store, _rx) = new_store(&dir);
        let mut repo = Repository::new("demo", &dir.path().join("src"));
        for (name, created) in [
            ("a", "2025-01-01T00:00:00Z"),
            ("b", "2025-01-02T00:00:00Z"),
        ] {
            let mut wt = Worktree::new(name, "main", &dir.path().join(name));
            wt.created_at = created.to_owned();
            repo.worktrees.push(wt);
        }
        assert!(store.add_repository(repo.clone()));

        let before: Vec<String> = order::visible_worktrees(&store.repository(&repo.id).unwrap().worktrees)
            .iter()
            .map(|w| w.id.clone())
            .collect();
        assert!(store.move_worktree(&repo.id, &before[0], 0));
        let after: Vec<String> = order::visible_worktrees(&store.repository(&repo.id).unwrap().worktrees)
            .iter()
            .map(|w| w.id.clone())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn failed_save_keeps_the_memory_state() {
        let dir = TempDir::new().unwrap();
        // Parent of the store path is a file, so every save fails.
        std::fs::write(dir.path().join("blocker"), b"x").unwrap();
        let (tx, mut rx) = events::channel();
        let store = FleetStore::open(dir.path().join("blocker").join("fleet.json"), tx);

        assert!(store.add_repository(Repository::new("demo", &dir.path().join("src"))));
        assert_eq!(store.repositories().len(), 1);
        assert_eq!(rx.try_recv().unwrap(), FleetEvent::StoreChanged);
    }
}
