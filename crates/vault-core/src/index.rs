//! IndexClient trait abstraction for the derived content index.
//!
//! The index stores zero or more entries per file path (a file is split into
//! ordered chunks). How a chunk becomes a vector is the index engine's business;
//! this module only fixes which paths the entries belong to.
//!
//! Implementations:
//! - `InMemoryIndex` - Reference index with optional JSON snapshot persistence

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::fs::{self, FsError};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index rejected {operation} for {}: {reason}", path.display())]
    Rejected {
        operation: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Cannot read {} for indexing: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("Index persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_CHARS: usize = 1000;

/// One chunk of one file as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// File the chunk was derived from
    pub path: PathBuf,
    /// Position of the chunk within the file
    pub chunk: usize,
    /// Chunk text
    pub content: String,
    /// SHA-256 of `content`, hex encoded
    pub content_hash: String,
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split `content` into chunks of at most `max_chars` characters.
///
/// Chunks break on line boundaries where possible; a single over-long line is
/// split on character boundaries. Empty content yields no chunks.
pub fn chunk_content(content: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in content.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Derive the entries for one file's content. Deterministic.
pub fn derive_entries(path: &Path, content: &str, max_chars: usize) -> Vec<IndexEntry> {
    chunk_content(content, max_chars)
        .into_iter()
        .enumerate()
        .map(|(chunk, text)| IndexEntry {
            path: path.to_path_buf(),
            chunk,
            content_hash: compute_hash(&text),
            content: text,
        })
        .collect()
}

/// `path` rewritten from under `from` to under `to`, if it is `from` or a descendant.
pub fn relocate(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(from).ok()?;
    if rest.as_os_str().is_empty() {
        Some(to.to_path_buf())
    } else {
        Some(to.join(rest))
    }
}

/// Per-vault handle on the content index.
///
/// Every method fails with a distinguishable `IndexError` instead of dropping
/// data. Paths are absolute.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Replace all entries for `path` with entries derived from `content`.
    async fn upsert(&self, path: &Path, content: &str) -> Result<()>;

    /// Remove all entries for each path (and for anything beneath it).
    async fn delete_by_paths(&self, paths: &[PathBuf]) -> Result<()>;

    /// Re-key the entries of a renamed file or directory.
    async fn move_entries(&self, old_path: &Path, new_path: &Path) -> Result<()>;

    /// Cascade a file or directory move: every entry at `source` or under
    /// `source/` moves to the matching path under `destination`.
    async fn orchestrate_move(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Derive entries for files (directories expand to their files) without storing them.
    async fn bulk_convert(&self, paths: &[PathBuf]) -> Result<Vec<IndexEntry>>;

    /// Entries currently stored for exactly `path`, in chunk order.
    async fn entries_for(&self, path: &Path) -> Result<Vec<IndexEntry>>;
}

/// In-memory index keyed by path.
///
/// With a snapshot path set, `save` writes the whole index as JSON and `open`
/// reads it back.
pub struct InMemoryIndex {
    entries: RwLock<BTreeMap<PathBuf, Vec<IndexEntry>>>,
    chunk_chars: usize,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::with_chunk_chars(DEFAULT_CHUNK_CHARS)
    }

    pub fn with_chunk_chars(chunk_chars: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            chunk_chars,
            snapshot_path: None,
        }
    }

    /// Load the snapshot at `snapshot_path` if present, otherwise start empty.
    ///
    /// An unreadable or incompatible snapshot is discarded with a warning.
    pub async fn open(snapshot_path: PathBuf, chunk_chars: usize) -> Self {
        let mut index = Self::with_chunk_chars(chunk_chars);

        match tokio::fs::read_to_string(&snapshot_path).await {
            Ok(json) => match serde_json::from_str::<Vec<IndexEntry>>(&json) {
                Ok(loaded) => {
                    let mut map: BTreeMap<PathBuf, Vec<IndexEntry>> = BTreeMap::new();
                    for entry in loaded {
                        map.entry(entry.path.clone()).or_default().push(entry);
                    }
                    for entries in map.values_mut() {
                        entries.sort_by_key(|e| e.chunk);
                    }
                    tracing::debug!("Loaded index snapshot ({} paths)", map.len());
                    index.entries = RwLock::new(map);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse index snapshot {}: {}. Starting with empty index.",
                        snapshot_path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    "Failed to read index snapshot {}: {}",
                    snapshot_path.display(),
                    e
                );
            }
        }

        index.snapshot_path = Some(snapshot_path);
        index
    }

    /// Write the snapshot (temp file + rename). No-op without a snapshot path.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let all: Vec<IndexEntry> = self
            .entries
            .read()
            .await
            .values()
            .flatten()
            .cloned()
            .collect();
        let json =
            serde_json::to_string(&all).map_err(|e| IndexError::Persistence(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::ensure_dir_all(parent)
                .await
                .map_err(|e| IndexError::Persistence(e.to_string()))?;
        }
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|e| IndexError::Persistence(e.to_string()))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| IndexError::Persistence(e.to_string()))?;

        tracing::debug!("Saved index snapshot to {}", path.display());
        Ok(())
    }

    /// Number of paths with at least one entry.
    pub async fn path_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// All stored paths, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Re-key everything at or under `from` to sit under `to`.
    ///
    /// Whatever was indexed at or under `to` was replaced on disk and is
    /// dropped first.
    async fn relocate_all(&self, from: &Path, to: &Path) -> usize {
        if from == to {
            return 0;
        }
        let mut entries = self.entries.write().await;

        entries.retain(|key, _| !key.starts_with(to) || key.starts_with(from));

        let moving: Vec<PathBuf> = entries
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();

        for old in &moving {
            let Some(new) = relocate(old, from, to) else {
                continue;
            };
            if let Some(mut moved) = entries.remove(old) {
                for entry in &mut moved {
                    entry.path = new.clone();
                }
                entries.insert(new, moved);
            }
        }
        moving.len()
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexClient for InMemoryIndex {
    async fn upsert(&self, path: &Path, content: &str) -> Result<()> {
        let fresh = derive_entries(path, content, self.chunk_chars);
        let mut entries = self.entries.write().await;

        if entries.get(path) == Some(&fresh) {
            tracing::debug!("Index unchanged for {}", path.display());
            return Ok(());
        }

        if fresh.is_empty() {
            entries.remove(path);
        } else {
            entries.insert(path.to_path_buf(), fresh);
        }
        Ok(())
    }

    async fn delete_by_paths(&self, paths: &[PathBuf]) -> Result<()> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !paths.iter().any(|p| key.starts_with(p)));
        tracing::debug!("Deleted {} indexed path(s)", before - entries.len());
        Ok(())
    }

    async fn move_entries(&self, old_path: &Path, new_path: &Path) -> Result<()> {
        let moved = self.relocate_all(old_path, new_path).await;
        tracing::debug!(
            "Moved {} indexed path(s) {} -> {}",
            moved,
            old_path.display(),
            new_path.display()
        );
        Ok(())
    }

    async fn orchestrate_move(&self, source: &Path, destination: &Path) -> Result<()> {
        if destination.starts_with(source) && destination != source {
            return Err(IndexError::Rejected {
                operation: "move",
                path: source.to_path_buf(),
                reason: format!("destination {} is inside source", destination.display()),
            });
        }
        self.relocate_all(source, destination).await;
        Ok(())
    }

    async fn bulk_convert(&self, paths: &[PathBuf]) -> Result<Vec<IndexEntry>> {
        let mut converted = Vec::new();
        for path in paths {
            let files = fs::list_files_recursive(path)
                .await
                .map_err(|source| IndexError::Unreadable {
                    path: path.clone(),
                    source,
                })?;
            for file in files {
                if fs::is_hidden_below(path, &file) {
                    continue;
                }
                let content =
                    fs::read_to_string(&file)
                        .await
                        .map_err(|source| IndexError::Unreadable {
                            path: file.clone(),
                            source,
                        })?;
                converted.extend(derive_entries(&file, &content, self.chunk_chars));
            }
        }
        Ok(converted)
    }

    async fn entries_for(&self, path: &Path) -> Result<Vec<IndexEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .get(path)
            .cloned()
            .unwrap_or_default())
    }
}

// Lets one index be shared between a vault binding and its owner.
#[async_trait]
impl<T: IndexClient + ?Sized> IndexClient for std::sync::Arc<T> {
    async fn upsert(&self, path: &Path, content: &str) -> Result<()> {
        (**self).upsert(path, content).await
    }

    async fn delete_by_paths(&self, paths: &[PathBuf]) -> Result<()> {
        (**self).delete_by_paths(paths).await
    }

    async fn move_entries(&self, old_path: &Path, new_path: &Path) -> Result<()> {
        (**self).move_entries(old_path, new_path).await
    }

    async fn orchestrate_move(&self, source: &Path, destination: &Path) -> Result<()> {
        (**self).orchestrate_move(source, destination).await
    }

    async fn bulk_convert(&self, paths: &[PathBuf]) -> Result<Vec<IndexEntry>> {
        (**self).bulk_convert(paths).await
    }

    async fn entries_for(&self, path: &Path) -> Result<Vec<IndexEntry>> {
        (**self).entries_for(path).await
    }
}
