//! Daemon configuration: engine tunables and vault path resolution.

use std::path::PathBuf;
use std::time::Duration;

use vault_core::index::DEFAULT_CHUNK_CHARS;

use crate::rename::RenameStrategy;

/// Environment variable consulted when no vault path is given on the command line.
pub const VAULT_PATH_ENV: &str = "VAULT_SYNC_PATH";

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Debounce window for watcher notifications
    pub debounce: Duration,
    /// How long a rename waits for watcher teardown before giving up
    pub close_timeout: Duration,
    /// Rename protocol, fixed for the process lifetime
    pub rename_strategy: RenameStrategy,
    /// Reindex files when the watcher reports external modifications
    pub index_on_change: bool,
    /// Index chunk size in characters
    pub chunk_chars: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            close_timeout: Duration::from_secs(5),
            rename_strategy: RenameStrategy::detect(),
            index_on_change: true,
            chunk_chars: DEFAULT_CHUNK_CHARS,
        }
    }
}

/// Resolve the vault path: explicit value first, then `VAULT_SYNC_PATH`.
pub fn resolve_vault_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(expand_tilde(&path.to_string_lossy()));
    }
    let from_env = std::env::var(VAULT_PATH_ENV).map_err(|_| ConfigError::MissingVaultPath)?;
    Ok(expand_tilde(&from_env))
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No vault path given and VAULT_SYNC_PATH is not set")]
    MissingVaultPath,
}
