#![forbid(unsafe_code)]

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::store::model::{Repository, Worktree};

/// Manual positions first (ascending), then the rest by case-insensitive
/// name. Stable, so equal keys keep their stored order.
pub fn sort_repositories(repos: &mut [Repository]) {
    repos.sort_by_cached_key(|r| match r.sort_order {
        Some(n) => (0u8, n, String::new()),
        None => (1u8, 0, r.name.to_lowercase()),
    });
}

/// Manual positions first (ascending), then most recently touched on
/// disk.
pub fn sort_worktrees(worktrees: &mut [Worktree]) {
    sort_worktrees_with(worktrees, modified_time);
}

/// Same contract with an injected activity clock, for deterministic
/// tests.
pub fn sort_worktrees_with<F>(worktrees: &mut [Worktree], activity: F)
where
    F: Fn(&Worktree) -> OffsetDateTime,
{
    worktrees.sort_by_cached_key(|w| match w.sort_order {
        Some(n) => (0u8, n, 0i128),
        // Negated so newer activity sorts first.
        None => (1u8, 0, -activity(w).unix_timestamp_nanos()),
    });
}

/// Repositories in display order, leaving the stored list untouched.
#[must_use]
pub fn sorted_repositories(repos: &[Repository]) -> Vec<Repository> {
    let mut sorted = repos.to_vec();
    sort_repositories(&mut sorted);
    sorted
}

/// Non-archived worktrees in display order.
#[must_use]
pub fn visible_worktrees(worktrees: &[Worktree]) -> Vec<Worktree> {
    let mut visible: Vec<Worktree> = worktrees.iter().filter(|w| !w.archived).cloned().collect();
    sort_worktrees(&mut visible);
    visible
}

/// The visible order after moving `id` to `to_index` (clamped to the
/// list). `None` when `id` is not in the list.
#[must_use]
pub fn moved_order(visible_ids: &[String], id: &str, to_index: usize) -> Option<Vec<String>> {
    let from = visible_ids.iter().position(|v| v == id)?;
    let mut ids = visible_ids.to_vec();
    let entry = ids.remove(from);
    ids.insert(to_index.min(ids.len()), entry);
    Some(ids)
}

fn modified_time(worktree: &Worktree) -> OffsetDateTime {
    if let Ok(meta) = std::fs::metadata(&worktree.path)
        && let Ok(modified) = meta.modified()
    {
        return OffsetDateTime::from(modified);
    }
    // Directory gone; fall back to when the entry was created.
    OffsetDateTime::parse(&worktree.created_at, &Rfc3339).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
