#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GwfleetError {
    #[error("config error: {0}")]
    Config(String),

    #[error("git {command}: {message}")]
    Git { command: String, message: String },

    #[error("not the root of a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("repository already registered: {0}")]
    RepositoryExists(PathBuf),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("worktree not found: {0}")]
    WorktreeNotFound(String),

    #[error("worktree directory missing: {0}")]
    WorktreeDirMissing(PathBuf),

    #[error("repository source path no longer exists: {0}")]
    SourcePathMissing(PathBuf),

    #[error("path already in use: {0}")]
    PathTaken(PathBuf),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}
