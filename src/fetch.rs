#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::core::git::Git;
use crate::events::{EventSender, FleetEvent};
use crate::store::FleetStore;

/// Where a repository's remote sync currently stands. `Warning` means
/// the fetch landed but the local branch could not fast-forward;
/// `Error` means the fetch itself failed. Both carry git's own words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FetchStatus {
    #[default]
    Idle,
    Fetching,
    Success,
    Warning(String),
    Error(String),
}

/// Per-repository fetch state machine. One fetch per repository at a
/// time; different repositories run independently. Success clears
/// itself after a delay, warnings and errors wait for [`clear`].
///
/// [`clear`]: FetchTracker::clear
#[derive(Clone)]
pub struct FetchTracker {
    store: Arc<FleetStore>,
    git: Git,
    success_clear: Duration,
    events: EventSender,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

/// `generation` counts transitions so a delayed clear can tell whether
/// anything happened since it was scheduled.
#[derive(Debug, Default)]
struct Slot {
    status: FetchStatus,
    generation: u64,
}

impl FetchTracker {
    #[must_use]
    pub fn new(
        store: Arc<FleetStore>,
        git: Git,
        success_clear: Duration,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            git,
            success_clear,
            events,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn status(&self, repository_id: &str) -> FetchStatus {
        self.slots()
            .get(repository_id)
            .map(|slot| slot.status.clone())
            .unwrap_or_default()
    }

    /// Runs [`fetch`](FetchTracker::fetch) on the runtime and returns
    /// immediately; progress arrives as events.
    pub fn spawn_fetch(&self, repository_id: &str) {
        let tracker = self.clone();
        let id = repository_id.to_owned();
        tokio::spawn(async move {
            tracker.fetch(&id).await;
        });
    }

    pub async fn fetch(&self, repository_id: &str) {
        let Some(repo) = self.store.repository(repository_id) else {
            return;
        };
        if !self.begin(repository_id) {
            // Already fetching this repository; the running pass will
            // report.
            return;
        }
        self.emit(repository_id, FetchStatus::Fetching);

        let source = PathBuf::from(&repo.source_path);
        let fetched = self.git.fetch(&source).await;
        if !fetched.success() {
            self.transition(repository_id, FetchStatus::Error(fetched.error_text()));
            return;
        }

        let pulled = self.git.pull_ff(&source).await;
        if !pulled.success() {
            self.transition(repository_id, FetchStatus::Warning(pulled.error_text()));
            return;
        }

        let generation = self.transition(repository_id, FetchStatus::Success);
        let tracker = self.clone();
        let id = repository_id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(tracker.success_clear).await;
            tracker.clear_if_unchanged(&id, generation);
        });
    }

    /// Acknowledges a finished state back to idle. A running fetch is
    /// left alone.
    pub fn clear(&self, repository_id: &str) {
        {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(repository_id) else {
                return;
            };
            if matches!(slot.status, FetchStatus::Idle | FetchStatus::Fetching) {
                return;
            }
            slot.generation += 1;
            slot.status = FetchStatus::Idle;
        }
        self.emit(repository_id, FetchStatus::Idle);
    }

    fn begin(&self, id: &str) -> bool {
        let mut slots = self.slots();
        let slot = slots.entry(id.to_owned()).or_default();
        if slot.status == FetchStatus::Fetching {
            return false;
        }
        slot.generation += 1;
        slot.status = FetchStatus::Fetching;
        true
    }

    fn transition(&self, id: &str, status: FetchStatus) -> u64 {
        let generation = {
            let mut slots = self.slots();
            let slot = slots.entry(id.to_owned()).or_default();
            slot.generation += 1;
            slot.status = status.clone();
            slot.generation
        };
        self.emit(id, status);
        generation
    }

    /// The delayed Success -> Idle hop. Any transition since `generation`
    /// owns the slot and the stale timer does nothing.
    fn clear_if_unchanged(&self, id: &str, generation: u64) {
        let cleared = {
            let mut slots = self.slots();
            match slots.get_mut(id) {
                Some(slot)
                    if slot.generation == generation && slot.status == FetchStatus::Success =>
                {
                    slot.generation += 1;
                    slot.status = FetchStatus::Idle;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            self.emit(id, FetchStatus::Idle);
        }
    }

    fn emit(&self, id: &str, status: FetchStatus) {
        let _ = self.events.send(FleetEvent::FetchStatusChanged {
            repository_id: id.to_owned(),
            status,
        });
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
