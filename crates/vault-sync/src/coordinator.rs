//! Ordering of filesystem actions and their index counterparts.
//!
//! Every operation on a bound window runs under that vault's context lock, so
//! explicit operations and watcher notices for one vault never interleave.
//! Different windows proceed independently.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vault_core::events::now_millis;
use vault_core::fs::{self, FileInfoNode, FsError};
use vault_core::{EventBus, IndexClient, IndexEntry, VaultEvent};

use crate::config::SyncConfig;
use crate::context::{VaultContext, WindowId, WindowRegistry};
use crate::error::{Result, SyncError};
use crate::rename::{RenameState, RenameStrategy};
use crate::watcher::{DirectoryWatcher, FileEvent, FileEventKind};

/// A debounced watcher batch, tagged with the window whose vault produced it.
#[derive(Debug, Clone)]
pub struct WatchNotice {
    pub window: WindowId,
    pub events: Vec<FileEvent>,
}

pub struct SyncCoordinator {
    config: SyncConfig,
    registry: WindowRegistry,
    events: Arc<EventBus>,
    notices: mpsc::UnboundedSender<WatchNotice>,
}

impl SyncCoordinator {
    /// Create a coordinator and the receiving end of its watcher notices.
    ///
    /// Feed the receiver to [`SyncCoordinator::spawn_watch_loop`].
    pub fn new(
        config: SyncConfig,
        events: Arc<EventBus>,
    ) -> (Self, mpsc::UnboundedReceiver<WatchNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            config,
            registry: WindowRegistry::new(),
            events,
            notices,
        };
        (coordinator, rx)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    // ---- Window lifecycle ----

    /// Bind `root` to `window` and start watching it.
    ///
    /// Returns the canonical root. Any previous binding of the window is
    /// replaced and its watcher closed.
    pub async fn bind_vault(
        &self,
        window: WindowId,
        root: &Path,
        index: Arc<dyn IndexClient>,
    ) -> Result<PathBuf> {
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| FsError::from_io(root, e))?;
        if !fs::is_directory(&root).await? {
            return Err(SyncError::NotFound(root));
        }

        let mut context = VaultContext::new(window, root.clone(), index);
        context.watcher = Some(self.start_watcher(window, &root)?);

        if let Some(previous) = self.registry.insert(context).await {
            let mut previous = previous.lock().await;
            if let Some(watcher) = previous.watcher.take() {
                if let Err(e) = self.close_watcher(watcher).await {
                    warn!("Previous vault of window {} did not close cleanly: {}", window, e);
                }
            }
        }

        info!("Window {} bound to vault {}", window, root.display());
        Ok(root)
    }

    /// Drop the window's binding and wait for its watcher to close.
    pub async fn unbind(&self, window: WindowId) {
        let Some(context) = self.registry.remove(window).await else {
            return;
        };
        let mut context = context.lock().await;
        if let Some(watcher) = context.watcher.take() {
            if let Err(e) = self.close_watcher(watcher).await {
                warn!("Watcher of window {} did not close cleanly: {}", window, e);
            }
        }
        info!("Window {} unbound", window);
    }

    // ---- Watcher plumbing ----

    fn start_watcher(&self, window: WindowId, root: &Path) -> Result<DirectoryWatcher> {
        let notices = self.notices.clone();
        let watcher = DirectoryWatcher::watch(root, self.config.debounce, move |events| {
            // Receiver gone means the coordinator is shutting down
            let _ = notices.send(WatchNotice { window, events });
        })?;
        Ok(watcher)
    }

    async fn close_watcher(&self, watcher: DirectoryWatcher) -> Result<()> {
        let root = watcher.root().to_path_buf();
        await_release(root, watcher.close().wait(), self.config.close_timeout).await
    }

    /// Bring a degraded vault back to a fully watched state.
    async fn ensure_watcher(&self, ctx: &mut VaultContext) {
        match ctx.watcher.as_mut() {
            Some(watcher) if watcher.has_suspensions() => {
                if let Err(e) = watcher.resume_all() {
                    self.degraded(ctx.window, format!("resume failed: {e}"));
                } else {
                    debug!("Resumed suspended watch paths for window {}", ctx.window);
                }
            }
            Some(_) => {}
            None => match self.start_watcher(ctx.window, &ctx.root) {
                Ok(watcher) => {
                    ctx.watcher = Some(watcher);
                    info!("Restored watcher for {}", ctx.root.display());
                    // Changes made while unwatched were never reported
                    self.publish_tree(ctx).await;
                }
                Err(e) => self.degraded(ctx.window, format!("restart failed: {e}")),
            },
        }
    }

    /// Lock the window's vault if one is bound, restoring its watcher first.
    async fn lock_if_bound(&self, window: WindowId) -> Option<OwnedMutexGuard<VaultContext>> {
        let context = self.registry.get(window).await?;
        let mut guard = context.lock_owned().await;
        self.ensure_watcher(&mut guard).await;
        Some(guard)
    }

    /// Lock the window's vault; unbound windows are an error.
    async fn lock_bound(&self, window: WindowId) -> Result<OwnedMutexGuard<VaultContext>> {
        self.lock_if_bound(window)
            .await
            .ok_or(SyncError::ContextNotFound(window))
    }

    /// Drain watcher notices until the channel closes.
    pub fn spawn_watch_loop(
        self: &Arc<Self>,
        mut notices: mpsc::UnboundedReceiver<WatchNotice>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                coordinator.on_watch_notice(notice).await;
            }
            debug!("Watch loop finished");
        })
    }

    /// Apply one watcher batch to the index and tell the UI what changed.
    pub async fn on_watch_notice(&self, notice: WatchNotice) {
        let Some(context) = self.registry.get(notice.window).await else {
            debug!("Dropping notice for unbound window {}", notice.window);
            return;
        };
        let guard = context.lock().await;
        let ctx = &*guard;

        // Echoes of our own operations are reapplied; upsert and delete are idempotent
        let mut changed = Vec::new();
        for event in notice.events {
            // Late batches from a replaced binding point at another root
            if !event.path.starts_with(&ctx.root) {
                continue;
            }

            match event.kind {
                FileEventKind::Modified => {
                    if self.config.index_on_change {
                        Self::reindex_changed(ctx, &event.path).await;
                    }
                }
                FileEventKind::Deleted => {
                    if let Err(e) = ctx
                        .index
                        .delete_by_paths(std::slice::from_ref(&event.path))
                        .await
                    {
                        warn!("Failed to drop index entries for {}: {}", event.path.display(), e);
                    }
                }
            }
            changed.push(event.path);
        }

        if !changed.is_empty() {
            debug!("{} external change(s) in window {}", changed.len(), ctx.window);
            self.events.emit(VaultEvent::FilesChanged {
                window: ctx.window.0,
                paths: changed,
            });
        }
    }

    /// Reindex whatever now lives at `path`.
    ///
    /// A directory moved in from outside is reported as one event, so a
    /// directory reindexes every visible file under it.
    async fn reindex_changed(ctx: &VaultContext, path: &Path) {
        let files = match files_to_index(path).await {
            Ok(files) => files,
            // Gone again; a deletion notice follows
            Err(e) => {
                debug!("Skipping reindex of {}: {}", path.display(), e);
                return;
            }
        };

        for file in files {
            match fs::read_to_string(&file).await {
                Ok(content) => {
                    if let Err(e) = ctx.index.upsert(&file, &content).await {
                        warn!("Failed to reindex {}: {}", file.display(), e);
                    }
                }
                Err(e) => debug!("Skipping reindex of {}: {}", file.display(), e),
            }
        }
    }

    fn degraded(&self, window: WindowId, reason: String) {
        warn!("Watcher for window {} degraded: {}", window, reason);
        self.events
            .emit(VaultEvent::WatcherDegraded { window: window.0, reason });
    }

    async fn publish_tree(&self, ctx: &VaultContext) {
        match fs::build_tree(&ctx.root).await {
            Ok(tree) => self.events.emit(VaultEvent::TreeRefreshed {
                window: ctx.window.0,
                root: ctx.root.clone(),
                tree: tree.children,
            }),
            Err(e) => warn!("Failed to rescan {}: {}", ctx.root.display(), e),
        }
    }

    fn publish_file_op(&self, window: WindowId, operation: &str, path: &Path, new_path: Option<&Path>) {
        self.events.emit(VaultEvent::FileOp {
            window: window.0,
            operation: operation.to_string(),
            path: path.to_path_buf(),
            new_path: new_path.map(Path::to_path_buf),
            timestamp: now_millis(),
        });
    }

    // ---- Filesystem operations ----

    /// Top-level entries of the window's vault. Empty when nothing is bound.
    pub async fn list_tree(&self, window: WindowId) -> Result<Vec<FileInfoNode>> {
        let Some(ctx) = self.lock_if_bound(window).await else {
            return Ok(Vec::new());
        };
        let tree = fs::build_tree(&ctx.root).await?;
        Ok(tree.children)
    }

    pub async fn read_file(&self, window: WindowId, path: &Path) -> Result<String> {
        let _guard = self.lock_if_bound(window).await;
        Ok(fs::read_to_string(path).await?)
    }

    /// Never fails; anything unreadable counts as missing.
    pub async fn exists(&self, window: WindowId, path: &Path) -> bool {
        let _guard = self.lock_if_bound(window).await;
        fs::exists(path).await
    }

    pub async fn is_directory(&self, window: WindowId, path: &Path) -> Result<bool> {
        let _guard = self.lock_if_bound(window).await;
        Ok(fs::is_directory(path).await?)
    }

    pub async fn list_directory(&self, window: WindowId, dir: &Path) -> Result<Vec<String>> {
        let _guard = self.lock_if_bound(window).await;
        Ok(fs::list_directory(dir).await?)
    }

    /// Write `content`, creating parents. On a bound vault the new content is
    /// indexed before returning.
    pub async fn write_file(&self, window: WindowId, path: &Path, content: &str) -> Result<()> {
        self.write_and_index(window, path, content).await
    }

    /// Create a file and any missing ancestors.
    pub async fn create_file(&self, window: WindowId, path: &Path, content: &str) -> Result<()> {
        self.write_and_index(window, path, content).await
    }

    async fn write_and_index(&self, window: WindowId, path: &Path, content: &str) -> Result<()> {
        let guard = self.lock_if_bound(window).await;
        if let Some(ctx) = guard.as_deref() {
            ctx.check_inside(path)?;
        }

        fs::create_file_recursive(path, content).await?;

        if let Some(ctx) = guard.as_deref() {
            ctx.index.upsert(path, content).await?;
        }
        Ok(())
    }

    /// Create a directory and its ancestors. No-op if it exists.
    pub async fn create_directory(&self, window: WindowId, path: &Path) -> Result<()> {
        let guard = self.lock_if_bound(window).await;
        if let Some(ctx) = guard.as_deref() {
            ctx.check_inside(path)?;
        }
        Ok(fs::ensure_dir_all(path).await?)
    }

    // ---- Index-coupled operations ----

    /// Remove a file or directory tree, then drop its index entries.
    ///
    /// Missing paths succeed without touching anything. Removal failures are
    /// logged, not returned; the index call still runs and its failure is.
    ///
    /// A directory sends every file found under it, then the directory
    /// itself, which clears entries whose files were already gone.
    pub async fn delete(&self, window: WindowId, path: &Path) -> Result<()> {
        let guard = self.lock_if_bound(window).await;
        if let Some(ctx) = guard.as_deref() {
            ctx.check_inside(path)?;
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Nothing to delete at {}: {}", path.display(), e);
                return Ok(());
            }
        };

        let ctx = guard.as_deref().ok_or(SyncError::ContextNotFound(window))?;

        let paths = if metadata.is_dir() {
            let mut paths = fs::list_files_recursive(path).await.unwrap_or_else(|e| {
                warn!("Failed to enumerate {} before delete: {}", path.display(), e);
                Vec::new()
            });
            paths.push(path.to_path_buf());
            if let Err(e) = tokio::fs::remove_dir_all(path).await {
                warn!("Failed to remove directory {}: {}", path.display(), e);
            }
            paths
        } else {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("Failed to remove file {}: {}", path.display(), e);
            }
            vec![path.to_path_buf()]
        };

        ctx.index.delete_by_paths(&paths).await?;
        debug!("Deleted {} ({} index key(s))", path.display(), paths.len());
        self.publish_file_op(window, "delete", path, None);
        Ok(())
    }

    /// Rename on disk with the watcher out of the way, then move the index
    /// entries.
    ///
    /// A failed rename leaves the index alone and the watcher degraded; the
    /// next operation on the vault restores it.
    pub async fn rename(&self, window: WindowId, old_path: &Path, new_path: &Path) -> Result<()> {
        let mut guard = self.lock_bound(window).await?;
        let ctx = &mut *guard;
        ctx.check_inside(old_path)?;
        ctx.check_inside(new_path)?;

        ctx.rename.begin(old_path, new_path);

        let strategy = self.config.rename_strategy;
        match strategy {
            RenameStrategy::TeardownAndRestart => {
                if let Some(mut watcher) = ctx.watcher.take() {
                    watcher.unwatch(old_path);
                    if let Err(e) = self.close_watcher(watcher).await {
                        ctx.rename.abort();
                        self.degraded(window, e.to_string());
                        return Err(e);
                    }
                }
            }
            RenameStrategy::UnwatchTarget => {
                if let Some(watcher) = ctx.watcher.as_mut() {
                    watcher.unwatch(old_path);
                    watcher.unwatch(new_path);
                }
            }
        }

        ctx.rename.enter(RenameState::Renaming);
        if let Err(source) = tokio::fs::rename(old_path, new_path).await {
            ctx.rename.abort();
            self.degraded(
                window,
                format!("rename of {} failed: {}", old_path.display(), source),
            );
            return Err(SyncError::Io {
                path: old_path.to_path_buf(),
                source,
            });
        }

        match strategy {
            RenameStrategy::TeardownAndRestart => {
                match self.start_watcher(window, &ctx.root) {
                    Ok(watcher) => ctx.watcher = Some(watcher),
                    Err(e) => self.degraded(window, format!("restart failed: {e}")),
                }
                self.publish_tree(ctx).await;
            }
            RenameStrategy::UnwatchTarget => {
                if let Some(watcher) = ctx.watcher.as_mut() {
                    for target in [old_path, new_path] {
                        if let Err(e) = watcher.add(target) {
                            warn!("Failed to re-watch {}: {}", target.display(), e);
                        }
                    }
                }
            }
        }

        ctx.rename.enter(RenameState::Reindexing);
        let moved = ctx.index.move_entries(old_path, new_path).await;
        ctx.rename.enter(RenameState::Idle);
        moved?;

        info!("Renamed {} -> {}", old_path.display(), new_path.display());
        self.publish_file_op(window, "rename", old_path, Some(new_path));
        Ok(())
    }

    /// Relocate index entries after the caller moved `source` on disk.
    pub async fn move_entry(&self, window: WindowId, source: &Path, destination: &Path) -> Result<()> {
        let ctx = self.lock_bound(window).await?;
        ctx.check_inside(source)?;
        ctx.check_inside(destination)?;

        ctx.index.orchestrate_move(source, destination).await?;

        self.publish_file_op(window, "move", source, Some(destination));
        Ok(())
    }

    /// Rebuild the entries of a file, or of every visible file under a directory.
    pub async fn reindex(&self, window: WindowId, path: &Path) -> Result<()> {
        let guard = self.lock_bound(window).await?;
        guard.check_inside(path)?;

        let files = files_to_index(path).await?;

        for file in &files {
            let content = fs::read_to_string(file).await?;
            guard.index.upsert(file, &content).await?;
        }

        debug!("Reindexed {} file(s) under {}", files.len(), path.display());
        self.publish_file_op(window, "reindex", path, None);
        Ok(())
    }

    /// Entries the index would derive for `paths`, without storing them.
    pub async fn convert_paths(&self, window: WindowId, paths: &[PathBuf]) -> Result<Vec<IndexEntry>> {
        let guard = self.lock_bound(window).await?;
        for path in paths {
            guard.check_inside(path)?;
        }
        Ok(guard.index.bulk_convert(paths).await?)
    }
}

/// The file at `path`, or every visible file under the directory at `path`.
async fn files_to_index(path: &Path) -> fs::Result<Vec<PathBuf>> {
    if !fs::is_directory(path).await? {
        return Ok(vec![path.to_path_buf()]);
    }
    Ok(fs::list_files_recursive(path)
        .await?
        .into_iter()
        .filter(|file| !fs::is_hidden_below(path, file))
        .collect())
}

/// Wait for a closing watcher to release `root`, failing after `timeout`.
async fn await_release(
    root: PathBuf,
    released: impl Future<Output = bool>,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, released).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!("Watcher teardown for {} ended without acknowledging", root.display());
            Ok(())
        }
        Err(_) => Err(SyncError::PlatformLock { root, timeout }),
    }
}
