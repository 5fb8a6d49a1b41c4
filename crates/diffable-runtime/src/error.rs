//! Errors surfaced by the apply controller.

use diffable_core::SnapshotError;

/// Failure of a single apply request.
///
/// A failed request leaves the current snapshot untouched and does not
/// affect requests queued behind it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// The candidate snapshot could not be built or is malformed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl ApplyError {
    /// The underlying snapshot error.
    #[must_use]
    pub fn snapshot_error(&self) -> &SnapshotError {
        match self {
            Self::Snapshot(err) => err,
        }
    }
}

/// Result of an apply request.
pub type Result<T, E = ApplyError> = std::result::Result<T, E>;
