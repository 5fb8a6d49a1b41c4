#![forbid(unsafe_code)]

//! Core: sectioned snapshots and the identity-aware diff engine.
//!
//! # Role in diffable
//! `diffable-core` is the pure-data layer. It owns the [`Snapshot`] structure
//! and its mutation API, the [`EditScript`] produced between two snapshots,
//! and the [`diff`] function itself. Nothing here blocks, spawns, or holds
//! shared state.
//!
//! # Primary responsibilities
//! - **Identity model**: [`Identifiable`] separates "which slot" from "what
//!   content".
//! - **Snapshot**: ordered sections of ordered identities plus their values,
//!   with atomic, invariant-preserving mutations.
//! - **Diff engine**: inserts, deletes, minimal moves (LIS rule), reloads and
//!   reconfigures, at both section and item level.
//!
//! # How it fits in the system
//! The runtime (`diffable-runtime`) owns the current snapshot, serializes
//! apply requests, and calls [`diff`] to produce the script it forwards to
//! the rendering collaborator.

pub mod diff;
pub mod edit_script;
pub mod error;
pub mod identity;
pub mod snapshot;

pub use diff::diff;
pub use edit_script::{
    EditOperation, EditScript, IndexPath, ItemChange, ItemMove, SectionChange, SectionMove,
};
pub use error::{Result, SnapshotError};
pub use identity::{Identifiable, ItemId, ItemKey, Record, SectionKey};
pub use snapshot::{ItemMark, Snapshot};
