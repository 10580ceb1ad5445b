//! Per-window vault bindings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use vault_core::IndexClient;

use crate::error::{Result, SyncError};
use crate::rename::PendingRename;
use crate::watcher::DirectoryWatcher;

/// Identity of an application window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a window needs to keep its vault and index in step.
pub struct VaultContext {
    pub window: WindowId,
    /// Canonicalized vault root
    pub root: PathBuf,
    /// `None` while torn down for a rename or after a failed restart
    pub watcher: Option<DirectoryWatcher>,
    pub index: Arc<dyn IndexClient>,
    pub rename: PendingRename,
}

impl VaultContext {
    pub fn new(window: WindowId, root: PathBuf, index: Arc<dyn IndexClient>) -> Self {
        Self {
            window,
            root,
            watcher: None,
            index,
            rename: PendingRename::default(),
        }
    }

    /// Reject paths that escape the vault root.
    pub fn check_inside(&self, path: &Path) -> Result<()> {
        let traverses = path.components().any(|c| matches!(c, Component::ParentDir));
        if traverses || !path.starts_with(&self.root) {
            return Err(SyncError::OutsideVault {
                path: path.to_path_buf(),
                root: self.root.clone(),
            });
        }
        Ok(())
    }
}

pub type SharedContext = Arc<Mutex<VaultContext>>;

/// Window -> VaultContext mapping.
///
/// Holding a context's mutex is what serializes work on that vault.
#[derive(Default)]
pub struct WindowRegistry {
    contexts: RwLock<HashMap<WindowId, SharedContext>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a context, returning the one it replaced.
    pub async fn insert(&self, context: VaultContext) -> Option<SharedContext> {
        let window = context.window;
        self.contexts
            .write()
            .await
            .insert(window, Arc::new(Mutex::new(context)))
    }

    pub async fn get(&self, window: WindowId) -> Option<SharedContext> {
        self.contexts.read().await.get(&window).cloned()
    }

    /// Like `get`, but an unbound window is an error.
    pub async fn resolve(&self, window: WindowId) -> Result<SharedContext> {
        self.get(window)
            .await
            .ok_or(SyncError::ContextNotFound(window))
    }

    pub async fn remove(&self, window: WindowId) -> Option<SharedContext> {
        self.contexts.write().await.remove(&window)
    }

    /// Currently bound windows, unordered.
    pub async fn windows(&self) -> Vec<WindowId> {
        self.contexts.read().await.keys().copied().collect()
    }
}
