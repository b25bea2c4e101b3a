#![forbid(unsafe_code)]

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::fetch::FetchStatus;

/// Notifications pushed to the embedding UI whenever shared state changes
/// outside its direct call path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    /// The persisted store mutated; re-read whatever is displayed.
    StoreChanged,
    /// A repository's fetch indicator moved to a new state.
    FetchStatusChanged {
        repository_id: String,
        status: FetchStatus,
    },
    /// A background worktree removal failed after the entry was already
    /// dropped from the store. The directory may need manual cleanup.
    CleanupNeeded {
        worktree_name: String,
        path: PathBuf,
        error: String,
    },
}

pub type EventSender = mpsc::UnboundedSender<FleetEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<FleetEvent>;

#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
