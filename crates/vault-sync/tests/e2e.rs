//! End-to-end tests for vault-sync.
//!
//! Drives the coordinator against real temp directories: filesystem effects,
//! index consistency, both rename protocols and watcher-originated changes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::timeout;
use vault_core::index::Result as IndexResult;
use vault_core::{EventBus, IndexClient, IndexEntry, IndexError, InMemoryIndex};
use vault_sync::{
    FileEvent, FileEventKind, RenameStrategy, SyncConfig, SyncCoordinator, SyncError,
    WatchNotice, WindowId,
};

const WINDOW: WindowId = WindowId(1);

/// Index wrapper that remembers every delete batch.
#[derive(Default)]
struct RecordingIndex {
    inner: InMemoryIndex,
    deletes: Mutex<Vec<Vec<PathBuf>>>,
}

#[async_trait]
impl IndexClient for RecordingIndex {
    async fn upsert(&self, path: &Path, content: &str) -> IndexResult<()> {
        self.inner.upsert(path, content).await
    }

    async fn delete_by_paths(&self, paths: &[PathBuf]) -> IndexResult<()> {
        self.deletes.lock().unwrap().push(paths.to_vec());
        self.inner.delete_by_paths(paths).await
    }

    async fn move_entries(&self, old_path: &Path, new_path: &Path) -> IndexResult<()> {
        self.inner.move_entries(old_path, new_path).await
    }

    async fn orchestrate_move(&self, source: &Path, destination: &Path) -> IndexResult<()> {
        self.inner.orchestrate_move(source, destination).await
    }

    async fn bulk_convert(&self, paths: &[PathBuf]) -> IndexResult<Vec<IndexEntry>> {
        self.inner.bulk_convert(paths).await
    }

    async fn entries_for(&self, path: &Path) -> IndexResult<Vec<IndexEntry>> {
        self.inner.entries_for(path).await
    }
}

/// Index whose every call fails.
struct OfflineIndex;

fn offline() -> IndexError {
    IndexError::Persistence("index offline".into())
}

#[async_trait]
impl IndexClient for OfflineIndex {
    async fn upsert(&self, _path: &Path, _content: &str) -> IndexResult<()> {
        Err(offline())
    }

    async fn delete_by_paths(&self, _paths: &[PathBuf]) -> IndexResult<()> {
        Err(offline())
    }

    async fn move_entries(&self, _old_path: &Path, _new_path: &Path) -> IndexResult<()> {
        Err(offline())
    }

    async fn orchestrate_move(&self, _source: &Path, _destination: &Path) -> IndexResult<()> {
        Err(offline())
    }

    async fn bulk_convert(&self, _paths: &[PathBuf]) -> IndexResult<Vec<IndexEntry>> {
        Err(offline())
    }

    async fn entries_for(&self, _path: &Path) -> IndexResult<Vec<IndexEntry>> {
        Err(offline())
    }
}

fn config(strategy: RenameStrategy) -> SyncConfig {
    SyncConfig {
        debounce: Duration::from_millis(50),
        rename_strategy: strategy,
        ..SyncConfig::default()
    }
}

/// Coordinator with a bound vault. Returns the canonical root.
async fn setup_with(
    strategy: RenameStrategy,
    index: Arc<dyn IndexClient>,
) -> (TempDir, SyncCoordinator, PathBuf) {
    let temp = TempDir::new().unwrap();
    let (coordinator, _notices) = SyncCoordinator::new(config(strategy), Arc::new(EventBus::new()));
    let root = coordinator.bind_vault(WINDOW, temp.path(), index).await.unwrap();
    (temp, coordinator, root)
}

async fn setup(strategy: RenameStrategy) -> (TempDir, SyncCoordinator, Arc<InMemoryIndex>, PathBuf) {
    let index = Arc::new(InMemoryIndex::new());
    let (temp, coordinator, root) = setup_with(strategy, index.clone()).await;
    (temp, coordinator, index, root)
}

fn notice(path: &Path, kind: FileEventKind) -> WatchNotice {
    WatchNotice {
        window: WINDOW,
        events: vec![FileEvent {
            path: path.to_path_buf(),
            kind,
        }],
    }
}

// ---- Filesystem semantics ----

#[tokio::test]
async fn test_missing_path_does_not_exist_and_deletes_cleanly() {
    let (_temp, coordinator, _index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let missing = root.join("nowhere/ghost.md");

    assert!(!coordinator.exists(WINDOW, &missing).await);
    coordinator.delete(WINDOW, &missing).await.unwrap();
    // Twice is still fine
    coordinator.delete(WINDOW, &missing).await.unwrap();

    // No vault bound: nothing to delete is still success
    coordinator.delete(WindowId(42), &missing).await.unwrap();
}

#[tokio::test]
async fn test_create_file_creates_ancestors() {
    let (_temp, coordinator, _index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let path = root.join("a/b/c/note.md");

    coordinator.create_file(WINDOW, &path, "content").await.unwrap();

    assert_eq!(coordinator.read_file(WINDOW, &path).await.unwrap(), "content");
    for ancestor in [root.join("a"), root.join("a/b"), root.join("a/b/c")] {
        assert!(coordinator.is_directory(WINDOW, &ancestor).await.unwrap());
    }
}

#[tokio::test]
async fn test_write_then_read_is_exact() {
    let (_temp, coordinator, _index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let path = root.join("unicode.md");
    let content = "# Überschrift\r\n\n日本語のテキスト 🚀\nlast line without newline";

    coordinator.write_file(WINDOW, &path, content).await.unwrap();

    assert_eq!(coordinator.read_file(WINDOW, &path).await.unwrap(), content);
}

#[tokio::test]
async fn test_read_missing_file_is_not_found() {
    let (_temp, coordinator, _index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let result = coordinator.read_file(WINDOW, &root.join("missing.md")).await;
    assert!(matches!(result, Err(SyncError::NotFound(_))));
}

#[tokio::test]
async fn test_list_tree_and_directory_skip_hidden() {
    let (_temp, coordinator, _index, root) = setup(RenameStrategy::UnwatchTarget).await;
    coordinator.create_directory(WINDOW, &root.join(".obsidian")).await.unwrap();
    coordinator.write_file(WINDOW, &root.join("b.md"), "b").await.unwrap();
    coordinator.write_file(WINDOW, &root.join("dir/a.md"), "a").await.unwrap();
    std::fs::write(root.join("Thumbs.db"), "junk").unwrap();

    let tree = coordinator.list_tree(WINDOW).await.unwrap();
    let mut names: Vec<&str> = tree.iter().map(|n| n.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["b.md", "dir"]);

    let dir = tree.iter().find(|n| n.name == "dir").unwrap();
    assert!(dir.is_dir);
    assert_eq!(dir.children.len(), 1);

    let mut listed = coordinator.list_directory(WINDOW, &root).await.unwrap();
    listed.sort();
    assert_eq!(listed, vec!["b.md".to_string(), "dir".to_string()]);
}

#[tokio::test]
async fn test_list_tree_empty_when_unbound() {
    let (coordinator, _notices) =
        SyncCoordinator::new(SyncConfig::default(), Arc::new(EventBus::new()));
    assert!(coordinator.list_tree(WINDOW).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_directory_is_idempotent() {
    let (_temp, coordinator, _index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let dir = root.join("x/y");
    coordinator.create_directory(WINDOW, &dir).await.unwrap();
    coordinator.create_directory(WINDOW, &dir).await.unwrap();
    assert!(coordinator.is_directory(WINDOW, &dir).await.unwrap());
}

// ---- Index consistency ----

#[tokio::test]
async fn test_reindex_twice_yields_identical_entries() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let path = root.join("stable.md");
    std::fs::write(&path, "one\ntwo\nthree").unwrap();

    coordinator.reindex(WINDOW, &path).await.unwrap();
    let first = index.entries_for(&path).await.unwrap();
    coordinator.reindex(WINDOW, &path).await.unwrap();
    let second = index.entries_for(&path).await.unwrap();

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_reindex_directory_skips_hidden_files() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    std::fs::create_dir_all(root.join("dir/.cache")).unwrap();
    std::fs::write(root.join("dir/a.md"), "a").unwrap();
    std::fs::write(root.join("dir/.cache/blob"), "hidden").unwrap();

    coordinator.reindex(WINDOW, &root.join("dir")).await.unwrap();

    assert_eq!(index.paths().await, vec![root.join("dir/a.md")]);
}

#[tokio::test]
async fn test_reindex_missing_path_is_not_found() {
    let (_temp, coordinator, _index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let result = coordinator.reindex(WINDOW, &root.join("missing.md")).await;
    assert!(matches!(result, Err(SyncError::NotFound(_))));
}

async fn assert_rename_moves_entries(strategy: RenameStrategy) {
    let (_temp, coordinator, index, root) = setup(strategy).await;
    let old = root.join("notes/a.md");
    let new = root.join("notes/b.md");
    coordinator.write_file(WINDOW, &old, "hello").await.unwrap();
    let before = index.entries_for(&old).await.unwrap();
    assert!(!before.is_empty());

    coordinator.rename(WINDOW, &old, &new).await.unwrap();

    assert!(!coordinator.exists(WINDOW, &old).await);
    assert_eq!(coordinator.read_file(WINDOW, &new).await.unwrap(), "hello");
    assert!(index.entries_for(&old).await.unwrap().is_empty());

    let after = index.entries_for(&new).await.unwrap();
    let expected: Vec<IndexEntry> = before
        .into_iter()
        .map(|mut entry| {
            entry.path = new.clone();
            entry
        })
        .collect();
    assert_eq!(after, expected);
}

#[tokio::test]
async fn test_rename_with_unwatch_target() {
    assert_rename_moves_entries(RenameStrategy::UnwatchTarget).await;
}

#[tokio::test]
async fn test_rename_with_teardown_and_restart() {
    assert_rename_moves_entries(RenameStrategy::TeardownAndRestart).await;
}

#[tokio::test]
async fn test_rename_directory_moves_child_entries() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    coordinator.write_file(WINDOW, &root.join("old/x.md"), "x").await.unwrap();
    coordinator.write_file(WINDOW, &root.join("old/deep/y.md"), "y").await.unwrap();

    coordinator
        .rename(WINDOW, &root.join("old"), &root.join("new"))
        .await
        .unwrap();

    assert_eq!(
        index.paths().await,
        vec![root.join("new/deep/y.md"), root.join("new/x.md")]
    );
}

async fn assert_failed_rename_leaves_index(strategy: RenameStrategy) {
    let (_temp, coordinator, index, root) = setup(strategy).await;
    let kept = root.join("kept.md");
    coordinator.write_file(WINDOW, &kept, "keep me").await.unwrap();
    let before = index.paths().await;

    let result = coordinator
        .rename(WINDOW, &root.join("missing.md"), &root.join("target.md"))
        .await;
    assert!(matches!(result, Err(SyncError::Io { .. })));
    assert_eq!(index.paths().await, before);

    // The vault is usable again straight away
    let next = root.join("next.md");
    coordinator.write_file(WINDOW, &next, "after").await.unwrap();
    assert_eq!(coordinator.read_file(WINDOW, &next).await.unwrap(), "after");

    let context = coordinator.registry().resolve(WINDOW).await.unwrap();
    let ctx = context.lock().await;
    let watcher = ctx.watcher.as_ref().expect("watcher restored");
    assert!(!watcher.has_suspensions());
    assert!(ctx.rename.is_idle());
}

#[tokio::test]
async fn test_failed_rename_with_unwatch_target() {
    assert_failed_rename_leaves_index(RenameStrategy::UnwatchTarget).await;
}

#[tokio::test]
async fn test_failed_rename_with_teardown_and_restart() {
    assert_failed_rename_leaves_index(RenameStrategy::TeardownAndRestart).await;
}

#[tokio::test]
async fn test_rename_over_indexed_destination_replaces_entries() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let source = root.join("a.md");
    let destination = root.join("b.md");
    coordinator.write_file(WINDOW, &destination, "old b").await.unwrap();
    // Never indexed
    std::fs::write(&source, "plain a").unwrap();

    coordinator.rename(WINDOW, &source, &destination).await.unwrap();

    assert_eq!(std::fs::read_to_string(&destination).unwrap(), "plain a");
    assert!(index.entries_for(&destination).await.unwrap().is_empty());

    coordinator.reindex(WINDOW, &destination).await.unwrap();
    let entries = index.entries_for(&destination).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "plain a");
}

#[tokio::test]
async fn test_move_relocates_directory_entries() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let dir_a = root.join("dirA");
    let dir_b = root.join("dirB");
    coordinator.write_file(WINDOW, &dir_a.join("x.md"), "x").await.unwrap();
    coordinator.write_file(WINDOW, &dir_a.join("sub/y.md"), "y").await.unwrap();
    coordinator.write_file(WINDOW, &root.join("dirAB.md"), "z").await.unwrap();

    // The caller moves the files; the coordinator only follows in the index
    std::fs::rename(&dir_a, &dir_b).unwrap();
    coordinator.move_entry(WINDOW, &dir_a, &dir_b).await.unwrap();

    let paths = index.paths().await;
    assert!(paths.contains(&dir_b.join("x.md")));
    assert!(paths.contains(&dir_b.join("sub/y.md")));
    assert!(paths.iter().all(|p| !p.starts_with(&dir_a)));
    // Sibling sharing a name prefix is untouched
    assert!(paths.contains(&root.join("dirAB.md")));
}

#[tokio::test]
async fn test_delete_directory_reports_every_file() {
    let recording = Arc::new(RecordingIndex::default());
    let (_temp, coordinator, root) =
        setup_with(RenameStrategy::UnwatchTarget, recording.clone()).await;
    let sub = root.join("sub");
    coordinator.write_file(WINDOW, &sub.join("one.md"), "1").await.unwrap();
    coordinator.write_file(WINDOW, &sub.join("two.md"), "2").await.unwrap();

    coordinator.delete(WINDOW, &sub).await.unwrap();

    assert!(!coordinator.exists(WINDOW, &sub).await);
    let deletes = recording.deletes.lock().unwrap().clone();
    let last = deletes.last().expect("delete_by_paths called");
    assert_eq!(last, &vec![sub.join("one.md"), sub.join("two.md"), sub.clone()]);
    assert_eq!(recording.inner.path_count().await, 0);
}

#[tokio::test]
async fn test_delete_directory_clears_entries_of_vanished_files() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let dir = root.join("dir");
    // Indexed earlier, since removed behind the daemon's back
    index.upsert(&dir.join("gone.md"), "gone").await.unwrap();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("kept.md"), "kept").unwrap();
    coordinator.reindex(WINDOW, &dir.join("kept.md")).await.unwrap();
    assert_eq!(index.path_count().await, 2);

    coordinator.delete(WINDOW, &dir).await.unwrap();

    assert!(!dir.exists());
    assert_eq!(index.path_count().await, 0);
}

#[tokio::test]
async fn test_delete_file_drops_entries() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let path = root.join("doomed.md");
    coordinator.write_file(WINDOW, &path, "bye").await.unwrap();

    coordinator.delete(WINDOW, &path).await.unwrap();

    assert!(!path.exists());
    assert!(index.entries_for(&path).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_index_failure_surfaces_after_removal() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("file.md");
    std::fs::write(&path, "data").unwrap();

    let (coordinator, _notices) =
        SyncCoordinator::new(config(RenameStrategy::UnwatchTarget), Arc::new(EventBus::new()));
    let root = coordinator
        .bind_vault(WINDOW, temp.path(), Arc::new(OfflineIndex))
        .await
        .unwrap();
    let path = root.join("file.md");

    let result = coordinator.delete(WINDOW, &path).await;
    assert!(matches!(result, Err(SyncError::Index(_))));
    // The filesystem action is not unwound
    assert!(!path.exists());
}

#[tokio::test]
async fn test_index_operations_require_bound_window() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.md");
    std::fs::write(&file, "a").unwrap();
    let (coordinator, _notices) =
        SyncCoordinator::new(SyncConfig::default(), Arc::new(EventBus::new()));
    let other = temp.path().join("b.md");

    let results = [
        coordinator.rename(WINDOW, &file, &other).await,
        coordinator.move_entry(WINDOW, &file, &other).await,
        coordinator.reindex(WINDOW, &file).await,
        coordinator.delete(WINDOW, &file).await,
        coordinator.convert_paths(WINDOW, &[file.clone()]).await.map(|_| ()),
    ];
    for result in results {
        assert!(matches!(result, Err(SyncError::ContextNotFound(WindowId(1)))));
    }

    // Plain filesystem operations still work without a vault
    assert!(file.exists());
    assert_eq!(coordinator.read_file(WINDOW, &file).await.unwrap(), "a");
}

#[tokio::test]
async fn test_convert_paths_does_not_store() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    std::fs::create_dir_all(root.join("dir")).unwrap();
    std::fs::write(root.join("dir/a.md"), "alpha").unwrap();
    std::fs::write(root.join("dir/b.md"), "beta").unwrap();

    let entries = coordinator
        .convert_paths(WINDOW, &[root.join("dir")])
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(index.path_count().await, 0);
}

// ---- Watcher-originated changes ----

#[tokio::test]
async fn test_duplicate_notices_do_not_duplicate_entries() {
    let (_temp, coordinator, index, root) = setup(RenameStrategy::UnwatchTarget).await;
    let path = root.join("twice.md");
    std::fs::write(&path, "same content").unwrap();

    coordinator
        .on_watch_notice(notice(&path, FileEventKind::Modified))
        .await;
    let once = index.entries_for(&path).await.unwrap();
    coordinator
        .on_watch_notice(notice(&path, FileEventKind::Modified))
        .await;
    let twice = index.entries_for(&path).await.unwrap();

    assert_eq!(once.len(), 1);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_notices_respect_index_on_change() {
    let temp = TempDir::new().unwrap();
    let index = Arc::new(InMemoryIndex::new());
    let config = SyncConfig {
        index_on_change: false,
        ..config(RenameStrategy::UnwatchTarget)
    };
    let (coordinator, _notices) = SyncCoordinator::new(config, Arc::new(EventBus::new()));
    let root = coordinator
        .bind_vault(WINDOW, temp.path(), index.clone())
        .await
        .unwrap();
    let path = root.join("quiet.md");
    std::fs::write(&path, "untracked").unwrap();

    coordinator
        .on_watch_notice(notice(&path, FileEventKind::Modified))
        .await;

    assert_eq!(index.path_count().await, 0);
}

#[tokio::test]
async fn test_external_edit_reaches_index_through_watcher() {
    let temp = TempDir::new().unwrap();
    let index = Arc::new(InMemoryIndex::new());
    let (coordinator, notices) =
        SyncCoordinator::new(config(RenameStrategy::UnwatchTarget), Arc::new(EventBus::new()));
    let coordinator = Arc::new(coordinator);
    let watch_loop = coordinator.spawn_watch_loop(notices);
    let root = coordinator
        .bind_vault(WINDOW, temp.path(), index.clone())
        .await
        .unwrap();

    let path = root.join("external.md");
    std::fs::write(&path, "written by another program").unwrap();

    let indexed = timeout(Duration::from_secs(5), async {
        loop {
            if !index.entries_for(&path).await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(indexed.is_ok(), "external edit never reached the index");

    std::fs::remove_file(&path).unwrap();
    let dropped = timeout(Duration::from_secs(5), async {
        loop {
            if index.entries_for(&path).await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(dropped.is_ok(), "external delete never reached the index");

    coordinator.unbind(WINDOW).await;
    watch_loop.abort();
}

// ---- Persistence ----

#[tokio::test]
async fn test_index_snapshot_survives_restart() {
    let temp = TempDir::new().unwrap();
    let snapshot = temp.path().join("state/index.json");
    let vault = temp.path().join("vault");
    std::fs::create_dir(&vault).unwrap();

    let index = Arc::new(InMemoryIndex::open(snapshot.clone(), 1000).await);
    let (coordinator, _notices) =
        SyncCoordinator::new(config(RenameStrategy::UnwatchTarget), Arc::new(EventBus::new()));
    let root = coordinator
        .bind_vault(WINDOW, &vault, index.clone())
        .await
        .unwrap();
    let path = root.join("kept.md");
    coordinator.write_file(WINDOW, &path, "persist me").await.unwrap();
    coordinator.unbind(WINDOW).await;
    index.save().await.unwrap();

    let reopened = InMemoryIndex::open(snapshot, 1000).await;
    assert_eq!(
        reopened.entries_for(&path).await.unwrap(),
        index.entries_for(&path).await.unwrap()
    );
}
