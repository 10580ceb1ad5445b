//! Event infrastructure for vault change notifications.
//!
//! Provides `VaultEvent` (what a window's UI should refresh) and `EventBus`
//! for subscriptions. Subscribers run synchronously on the emitting task, so
//! callbacks should hand work off rather than block.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::fs::FileInfoNode;

/// Events published by the sync engine for UI consumption.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VaultEvent {
    /// Full re-scan of a window's vault after the watcher was rebuilt.
    TreeRefreshed {
        window: u64,
        root: PathBuf,
        /// Top-level entries of the vault root.
        tree: Vec<FileInfoNode>,
    },
    /// External changes picked up by the watcher.
    FilesChanged { window: u64, paths: Vec<PathBuf> },
    /// Explicit file operation completed (filesystem and index).
    FileOp {
        window: u64,
        /// Operation type: "delete", "rename", "move" or "reindex".
        operation: String,
        /// Path affected by the operation.
        path: PathBuf,
        /// New path (for rename and move only).
        #[serde(rename = "newPath")]
        new_path: Option<PathBuf>,
        /// When the operation finished, in milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// The window's vault has no live watcher until the next operation restores it.
    WatcherDegraded { window: u64, reason: String },
}

/// Milliseconds since Unix epoch, for event timestamps.
pub fn now_millis() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

/// Keeps a listener registered with its [`EventBus`] for as long as it lives.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_listener(self.id);
        }
    }
}

type Listener = Arc<dyn Fn(VaultEvent) + Send + Sync>;

/// Fan-out of vault refresh events to the windows' UI listeners.
///
/// Shared as `Arc<EventBus>` between the coordinator and whoever renders.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<BTreeMap<usize, Listener>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` until the returned [`Subscription`] is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(VaultEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn remove_listener(&self, id: usize) {
        // Dropping a subscription inside a listener must not block on emit's read lock
        if let Ok(mut listeners) = self.listeners.try_write() {
            listeners.remove(&id);
        }
    }

    /// Deliver `event` to every listener, oldest subscription first.
    pub fn emit(&self, event: VaultEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for listener in listeners {
            listener(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
