#![forbid(unsafe_code)]

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::naming;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    pub name: String,
    /// Main checkout location. Never rewritten after registration.
    pub source_path: String,
    #[serde(default)]
    pub worktrees: Vec<Worktree>,
    /// Manual list position. `None` until the user reorders.
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub settings: RepoSettings,
}

impl Repository {
    #[must_use]
    pub fn new(name: impl Into<String>, source_path: &Path) -> Self {
        Self {
            id: naming::unique_short_id(),
            name: name.into(),
            source_path: source_path.to_string_lossy().into_owned(),
            worktrees: Vec::new(),
            sort_order: None,
            settings: RepoSettings::default(),
        }
    }

    #[must_use]
    pub fn worktree(&self, id: &str) -> Option<&Worktree> {
        self.worktrees.iter().find(|w| w.id == id)
    }
}

/// Per-repository overrides for how sessions get opened. All optional;
/// the embedder falls back to its own defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepoSettings {
    pub terminal: Option<String>,
    pub launch_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worktree {
    pub id: String,
    /// Display name; the directory basename is derived from it.
    pub name: String,
    pub branch: String,
    pub path: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub sort_order: Option<i64>,
    pub created_at: String,
}

impl Worktree {
    #[must_use]
    pub fn new(name: impl Into<String>, branch: impl Into<String>, path: &Path) -> Self {
        Self {
            id: naming::unique_short_id(),
            name: name.into(),
            branch: branch.into(),
            path: path.to_string_lossy().into_owned(),
            archived: false,
            sort_order: None,
            created_at: now_rfc3339(),
        }
    }
}

/// What the UI currently highlights. At most one entity at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Selection {
    #[default]
    None,
    Repository(String),
    Worktree(String),
}

#[must_use]
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_owned())
}
