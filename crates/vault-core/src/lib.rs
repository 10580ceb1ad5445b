//! vault-core: Shared building blocks for keeping a vault and its content index in step.
//!
//! This crate provides:
//! - Path helpers for listing, creating and scanning vault trees
//! - The `IndexClient` abstraction plus an in-memory reference index
//! - `EventBus` for publishing refresh notifications to UI layers

pub mod events;
pub mod fs;
pub mod index;

pub use events::{EventBus, Subscription, VaultEvent};
pub use fs::{FileInfoNode, FsError};
pub use index::{IndexClient, IndexEntry, IndexError, InMemoryIndex};
