//! Error taxonomy surfaced to operation callers.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use vault_core::{FsError, IndexError};

use crate::context::WindowId;
use crate::watcher::WatcherError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("No vault bound to window {0}")]
    ContextNotFound(WindowId),

    #[error("Watcher on {} did not release within {timeout:?}", root.display())]
    PlatformLock { root: PathBuf, timeout: Duration },

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Path {} is outside vault {}", path.display(), root.display())]
    OutsideVault { path: PathBuf, root: PathBuf },
}

impl SyncError {
    /// Short machine-readable name for gateway responses.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotFound(_) => "notFound",
            SyncError::Io { .. } => "io",
            SyncError::Index(_) => "index",
            SyncError::ContextNotFound(_) => "contextNotFound",
            SyncError::PlatformLock { .. } => "platformLock",
            SyncError::Watcher(_) => "watcher",
            SyncError::OutsideVault { .. } => "outsideVault",
        }
    }
}

impl From<FsError> for SyncError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(path) => SyncError::NotFound(path),
            FsError::Io { path, source } => SyncError::Io { path, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
