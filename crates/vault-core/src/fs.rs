//! Path helpers for vault file trees.
//!
//! Everything here is stateless and works on absolute paths through `tokio::fs`.
//! Higher layers decide ordering and locking; these functions only touch disk.

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// Classify an `io::Error` for `path`, keeping `NotFound` distinguishable.
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            FsError::NotFound(path.to_path_buf())
        } else {
            FsError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Names that never show up in listings even though they lack a leading dot.
const HIDDEN_NAMES: &[&str] = &[
    "Thumbs.db",
    "desktop.ini",
    "$RECYCLE.BIN",
    "System Volume Information",
    "Icon\r",
];

/// One entry of a vault file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfoNode {
    /// Absolute path
    pub path: PathBuf,
    /// File or directory name (last path component)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
    /// Children, sorted by name. Always empty for files.
    pub children: Vec<FileInfoNode>,
    /// Modification time in milliseconds since epoch (0 if unavailable)
    pub modified_millis: u64,
}

impl FileInfoNode {
    /// Depth-first iterator over this node and all descendants.
    pub fn walk(&self) -> impl Iterator<Item = &FileInfoNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Paths of every file (not directory) in the tree.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.walk()
            .filter(|node| !node.is_dir)
            .map(|node| node.path.clone())
            .collect()
    }
}

/// Whether a file name is conventionally hidden or an OS/editor artifact.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~') || HIDDEN_NAMES.contains(&name)
}

/// Whether any component of `path` below `base` is hidden.
///
/// Paths outside `base` count as visible.
pub fn is_hidden_below(base: &Path, path: &Path) -> bool {
    path.strip_prefix(base)
        .map(|rest| {
            rest.components()
                .any(|c| is_hidden(&c.as_os_str().to_string_lossy()))
        })
        .unwrap_or(false)
}

fn modified_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Build the full tree under `root`, skipping hidden entries.
///
/// Children are sorted by name so repeated scans of an unchanged tree compare
/// equal. Unreadable subdirectories are kept as empty nodes.
pub async fn build_tree(root: &Path) -> Result<FileInfoNode> {
    let metadata = fs::metadata(root)
        .await
        .map_err(|e| FsError::from_io(root, e))?;
    Ok(build_node(root.to_path_buf(), &metadata).await)
}

async fn build_node(path: PathBuf, metadata: &std::fs::Metadata) -> FileInfoNode {
    let mut node = FileInfoNode {
        name: file_name_of(&path),
        is_dir: metadata.is_dir(),
        children: Vec::new(),
        modified_millis: modified_millis(metadata),
        path,
    };

    if !node.is_dir {
        return node;
    }

    let mut dir = match fs::read_dir(&node.path).await {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!("Skipping unreadable directory {}: {}", node.path.display(), e);
            return node;
        }
    };

    loop {
        let entry = match dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Stopped listing {}: {}", node.path.display(), e);
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name) {
            continue;
        }
        // Entry may vanish between readdir and stat
        let Ok(child_meta) = entry.metadata().await else {
            continue;
        };
        let child = Box::pin(build_node(entry.path(), &child_meta)).await;
        node.children.push(child);
    }

    node.children.sort_by(|a, b| a.name.cmp(&b.name));
    node
}

/// Create `path` and every missing ancestor. No-op if it already exists.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await.map_err(|e| FsError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write `content` to `path`, creating missing ancestor directories first.
///
/// If the final write fails the ancestors stay behind; callers see the `Io`
/// error and a partially created directory chain.
pub async fn create_file_recursive(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir_all(parent).await?;
    }
    fs::write(path, content).await.map_err(|e| FsError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read a file as UTF-8 text.
pub async fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| FsError::from_io(path, e))
}

/// Check whether anything exists at `path`. Never fails.
pub async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Whether `path` is a directory. `NotFound` if nothing is there.
pub async fn is_directory(path: &Path) -> Result<bool> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| FsError::from_io(path, e))?;
    Ok(metadata.is_dir())
}

/// Names in `dir` (not recursive), hidden entries filtered, sorted.
pub async fn list_directory(dir: &Path) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| FsError::from_io(dir, e))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FsError::from_io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_hidden(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Every regular file at or under `path`, hidden ones included.
///
/// A file path yields itself. Used to find the index keys a directory owns.
pub async fn list_files_recursive(path: &Path) -> Result<Vec<PathBuf>> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| FsError::from_io(path, e))?;

    let mut files = Vec::new();
    if metadata.is_dir() {
        collect_files(path, &mut files).await?;
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }
    Ok(files)
}

async fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| FsError::from_io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FsError::from_io(dir, e))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| FsError::from_io(&path, e))?;
        if file_type.is_dir() {
            Box::pin(collect_files(&path, files)).await?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}
