//! Rename protocol state machine.
//!
//! Some platforms refuse to rename a path while a watcher holds it open, so a
//! rename first takes the watcher out of the way. How far it has to go is the
//! `RenameStrategy`, picked once per process:
//!
//! ```text
//! Idle -> Unwatching -> Renaming -> Reindexing -> Idle
//!          |
//!          +- TeardownAndRestart: unwatch target, close whole watcher, await release
//!          +- UnwatchTarget:      unwatch target paths only
//! ```
//!
//! A failed filesystem rename returns to `Idle` directly, skipping `Reindexing`.

use std::path::{Path, PathBuf};
use tracing::debug;

/// How the watcher is moved out of the way during a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameStrategy {
    /// Watched paths are locked by the OS: close the whole watcher and wait for
    /// the release, rename, then build a new watcher and re-scan.
    TeardownAndRestart,
    /// Watching does not lock paths: suspend the target paths only.
    UnwatchTarget,
}

impl RenameStrategy {
    /// Strategy for the current platform.
    pub fn detect() -> Self {
        if cfg!(windows) {
            RenameStrategy::TeardownAndRestart
        } else {
            RenameStrategy::UnwatchTarget
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "teardown-and-restart" | "teardown" => Some(RenameStrategy::TeardownAndRestart),
            "unwatch-target" | "unwatch" => Some(RenameStrategy::UnwatchTarget),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameState {
    Idle,
    Unwatching,
    Renaming,
    Reindexing,
}

impl RenameState {
    fn can_enter(self, next: RenameState) -> bool {
        use RenameState::*;
        matches!(
            (self, next),
            (Idle, Unwatching)
                | (Unwatching, Renaming)
                | (Renaming, Reindexing)
                | (Reindexing, Idle)
                // failure exits
                | (Unwatching, Idle)
                | (Renaming, Idle)
        )
    }
}

/// The single rename a vault may have in flight.
#[derive(Debug)]
pub struct PendingRename {
    state: RenameState,
    from: Option<PathBuf>,
    to: Option<PathBuf>,
}

impl Default for PendingRename {
    fn default() -> Self {
        Self {
            state: RenameState::Idle,
            from: None,
            to: None,
        }
    }
}

impl PendingRename {
    pub fn state(&self) -> RenameState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == RenameState::Idle
    }

    /// Start a rename. The vault lock guarantees the previous one finished.
    pub fn begin(&mut self, from: &Path, to: &Path) {
        debug_assert!(self.is_idle(), "rename started while {:?}", self.state);
        self.from = Some(from.to_path_buf());
        self.to = Some(to.to_path_buf());
        self.enter(RenameState::Unwatching);
    }

    pub fn enter(&mut self, next: RenameState) {
        debug_assert!(
            self.state.can_enter(next),
            "invalid rename transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            "rename {:?} -> {:?}: {:?} -> {:?}",
            self.from, self.to, self.state, next
        );
        self.state = next;
        if next == RenameState::Idle {
            self.from = None;
            self.to = None;
        }
    }

    /// Return to `Idle` from wherever the rename stopped.
    pub fn abort(&mut self) {
        if !self.is_idle() {
            self.enter(RenameState::Idle);
        }
    }
}
