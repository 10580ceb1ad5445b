//! Directory watcher with debouncing for vault changes.
//!
//! Uses notify-debouncer-mini for efficient file change detection. Delivery is
//! at-least-once and coarse: a batch says which paths changed and whether they
//! still exist, nothing more.

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use vault_core::fs::is_hidden_below;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Failed to create watcher: {0}")]
    Create(#[source] notify::Error),

    #[error("Failed to watch path {}: {source}", path.display())]
    WatchPath {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// File event from the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Absolute path
    pub path: PathBuf,
    /// Type of event
    pub kind: FileEventKind,
}

/// Type of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// Created or modified (path exists)
    Modified,
    /// Deleted or renamed away (path is gone)
    Deleted,
}

/// Track last seen mtime to filter spurious events (Docker volume bug workaround)
type MtimeCache = Arc<Mutex<HashMap<PathBuf, SystemTime>>>;

/// Paths whose events are currently dropped
type Suspended = Arc<Mutex<HashSet<PathBuf>>>;

/// Completion signal returned by [`DirectoryWatcher::close`].
pub struct WatcherClosed {
    rx: oneshot::Receiver<()>,
}

impl WatcherClosed {
    /// Resolves once the OS watch handles are released. `false` if teardown
    /// died before acknowledging.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

/// Watcher over one vault root.
pub struct DirectoryWatcher {
    /// Vault root (canonicalized)
    root: PathBuf,
    /// Debouncer handle (must keep alive)
    debouncer: Debouncer<RecommendedWatcher>,
    /// Paths registered with the OS watcher
    watched: HashSet<PathBuf>,
    /// Registered paths removed by `unwatch`, restored by `resume_all`
    released: HashSet<PathBuf>,
    suspended: Suspended,
}

impl DirectoryWatcher {
    /// Start watching `root` recursively.
    ///
    /// `on_change` runs on the debouncer thread with each non-empty batch.
    pub fn watch<F>(root: &Path, debounce: Duration, on_change: F) -> Result<Self, WatcherError>
    where
        F: Fn(Vec<FileEvent>) + Send + 'static,
    {
        // FSEvents needs the real path (/var -> /private/var on macOS)
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));
        let suspended: Suspended = Arc::new(Mutex::new(HashSet::new()));

        let root_clone = root.clone();
        let suspended_clone = Arc::clone(&suspended);

        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    let mut seen = HashSet::new();
                    let batch: Vec<FileEvent> = events
                        .iter()
                        .filter_map(|event| {
                            Self::process_event(event, &root_clone, &suspended_clone, &mtime_cache)
                        })
                        .filter(|event| seen.insert(event.path.clone()))
                        .collect();
                    if !batch.is_empty() {
                        on_change(batch);
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )
        .map_err(WatcherError::Create)?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatcherError::WatchPath {
                path: root.clone(),
                source,
            })?;

        debug!("Watching {}", root.display());

        let mut watched = HashSet::new();
        watched.insert(root.clone());

        Ok(Self {
            root,
            debouncer,
            watched,
            released: HashSet::new(),
            suspended,
        })
    }

    /// Process a single debounced event, returning a FileEvent if relevant.
    fn process_event(
        event: &DebouncedEvent,
        root: &Path,
        suspended: &Suspended,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let path = &event.path;
        let relative = path.strip_prefix(root).ok()?;

        if relative.as_os_str().is_empty() {
            return None;
        }

        // Skip hidden files and anything inside hidden directories
        if is_hidden_below(root, path) {
            return None;
        }

        {
            let suspended = suspended.lock().unwrap_or_else(|e| e.into_inner());
            if suspended.iter().any(|s| path.starts_with(s)) {
                debug!("Suppressed event for suspended path {}", path.display());
                return None;
            }
        }

        // Debounced kinds only say "something happened"; existence decides
        let kind = if path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };

        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
        match kind {
            FileEventKind::Modified => {
                if let Some(mtime) = std::fs::metadata(path).ok().and_then(|m| m.modified().ok()) {
                    if cache.get(path) == Some(&mtime) {
                        // Mtime unchanged - spurious event, skip it
                        return None;
                    }
                    cache.insert(path.clone(), mtime);
                }
            }
            FileEventKind::Deleted => {
                cache.retain(|cached, _| !cached.starts_with(path));
            }
        }

        debug!("File event: {:?} - {}", kind, path.display());

        Some(FileEvent {
            path: path.clone(),
            kind,
        })
    }

    /// Get the watched vault root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop observing `path`.
    ///
    /// A registered watch path is removed from the OS watcher; a path inside
    /// one is suspended (its events are dropped). Unknown or missing paths are
    /// ignored.
    pub fn unwatch(&mut self, path: &Path) {
        if self.watched.remove(path) {
            if let Err(e) = self.debouncer.watcher().unwatch(path) {
                // The path may already be gone; the OS watch is dead either way
                debug!("Unwatch of {} reported: {}", path.display(), e);
            }
            self.released.insert(path.to_path_buf());
            return;
        }

        if self.watched.iter().any(|w| path.starts_with(w)) {
            self.suspended
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(path.to_path_buf());
        }
    }

    /// (Re)start observing `path`.
    pub fn add(&mut self, path: &Path) -> Result<(), WatcherError> {
        let was_suspended = self
            .suspended
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);

        let covered = self.watched.iter().any(|w| path.starts_with(w));
        if was_suspended || covered {
            return Ok(());
        }

        self.debouncer
            .watcher()
            .watch(path, RecursiveMode::Recursive)
            .map_err(|source| WatcherError::WatchPath {
                path: path.to_path_buf(),
                source,
            })?;
        self.released.remove(path);
        self.watched.insert(path.to_path_buf());
        Ok(())
    }

    /// Whether any path is currently unwatched or suspended.
    pub fn has_suspensions(&self) -> bool {
        !self.released.is_empty()
            || !self
                .suspended
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_empty()
    }

    /// Lift every suspension and re-register released paths that still exist.
    pub fn resume_all(&mut self) -> Result<(), WatcherError> {
        self.suspended
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        let released: Vec<PathBuf> = self.released.drain().collect();
        for path in released {
            if !path.exists() {
                warn!("Not re-watching vanished path {}", path.display());
                continue;
            }
            self.add(&path)?;
        }
        Ok(())
    }

    /// Release all OS resources.
    ///
    /// Teardown runs on its own thread; the returned signal resolves once the
    /// underlying watcher has been dropped.
    pub fn close(self) -> WatcherClosed {
        let (tx, rx) = oneshot::channel();
        let root = self.root;
        let debouncer = self.debouncer;

        let teardown = move || {
            drop(debouncer);
            debug!("Closed watcher for {}", root.display());
            let _ = tx.send(());
        };

        if let Err(e) = std::thread::Builder::new()
            .name("watcher-close".into())
            .spawn(teardown)
        {
            // Could not spawn: the closure (and the sender) is gone, so the
            // receiver resolves with an error
            warn!("Failed to spawn watcher teardown thread: {}", e);
        }

        WatcherClosed { rx }
    }
}
