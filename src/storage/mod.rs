//! Persistent storage
//!
//! Settings are the only thing written to disk; chat history lives in memory.

pub mod settings;

use std::path::PathBuf;

use directories::ProjectDirs;
use thiserror::Error;

/// Errors raised while reading or writing application data
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Could not determine the application data directory")]
    NoDataDir,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Platform data directory for the application
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("", "", "chatgen")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
