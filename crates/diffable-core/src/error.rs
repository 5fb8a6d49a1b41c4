//! Structural errors raised by snapshot mutation.
//!
//! Every variant here is caller misuse: a mutation sequence that references
//! identities the snapshot does not hold, or that would break uniqueness.
//! Deleting something that is already absent is never an error.

use thiserror::Error;

/// Convenience alias for snapshot results.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// A fatal structural precondition violation.
///
/// Identities are rendered with their `Debug` form so the error type stays
/// independent of the snapshot's key types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("item {id} already exists in the snapshot")]
    DuplicateItem { id: String },

    #[error("item {id} is not in the snapshot")]
    UnknownItem { id: String },

    #[error("section {id} already exists in the snapshot")]
    DuplicateSection { id: String },

    #[error("section {id} is not in the snapshot")]
    UnknownSection { id: String },

    #[error("cannot append items: the snapshot has no sections")]
    NoSections,

    #[error("cannot position {id} relative to itself")]
    SelfRelative { id: String },

    #[error("snapshot invariant violated: {detail}")]
    InvariantViolation { detail: String },
}

impl SnapshotError {
    pub(crate) fn duplicate_item(id: &impl std::fmt::Debug) -> Self {
        Self::DuplicateItem {
            id: format!("{id:?}"),
        }
    }

    pub(crate) fn unknown_item(id: &impl std::fmt::Debug) -> Self {
        Self::UnknownItem {
            id: format!("{id:?}"),
        }
    }

    pub(crate) fn duplicate_section(id: &impl std::fmt::Debug) -> Self {
        Self::DuplicateSection {
            id: format!("{id:?}"),
        }
    }

    pub(crate) fn unknown_section(id: &impl std::fmt::Debug) -> Self {
        Self::UnknownSection {
            id: format!("{id:?}"),
        }
    }

    pub(crate) fn self_relative(id: &impl std::fmt::Debug) -> Self {
        Self::SelfRelative {
            id: format!("{id:?}"),
        }
    }

    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            detail: detail.into(),
        }
    }

    /// Whether the error names an identity that was expected to exist.
    #[must_use]
    pub fn is_unknown_reference(&self) -> bool {
        matches!(self, Self::UnknownItem { .. } | Self::UnknownSection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_debug_rendering_of_ids() {
        let err = SnapshotError::duplicate_item(&"a");
        assert_eq!(err.to_string(), "item \"a\" already exists in the snapshot");
    }

    #[test]
    fn unknown_reference_classification() {
        assert!(SnapshotError::unknown_item(&1).is_unknown_reference());
        assert!(SnapshotError::unknown_section(&1).is_unknown_reference());
        assert!(!SnapshotError::NoSections.is_unknown_reference());
    }
}
