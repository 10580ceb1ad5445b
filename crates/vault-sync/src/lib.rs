//! vault-sync library: keeps a watched vault and its content index in step.
//!
//! The daemon binary is a thin stdio layer over these modules; integration
//! tests drive the coordinator directly.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod rename;
pub mod watcher;

// Re-export key types for convenience
pub use config::SyncConfig;
pub use context::{VaultContext, WindowId, WindowRegistry};
pub use coordinator::{SyncCoordinator, WatchNotice};
pub use error::SyncError;
pub use gateway::{Operation, OperationResult, Request, Response};
pub use rename::{RenameState, RenameStrategy};
pub use watcher::{DirectoryWatcher, FileEvent, FileEventKind, WatcherError};
