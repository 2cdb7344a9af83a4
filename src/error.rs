//! Error types for the descriptor database and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Static tables are empty or unusable. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Archive absent on every search root, or a requested item is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Archive unreadable or structurally broken.
    #[error("archive error ({path}): {reason}")]
    Archive { path: PathBuf, reason: String },

    /// Manifest present but not a valid descriptor database.
    #[error("parsing issue: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn archive(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Archive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
