//! Identity model: which record occupies a slot, independent of its content.
//!
//! A record exposes a stable identity through [`Identifiable`] and compares
//! content through `PartialEq`. Two records with the same identity but
//! unequal values are the same logical slot with changed content.
//!
//! Identity must stay stable for as long as the record is logically the same
//! to the user (a database row id, not a list index). Reusing an identity for
//! a semantically different record gives unspecified diff results.

use std::fmt;
use std::hash::Hash;

/// Key type usable as an item identity.
pub trait ItemKey: Clone + Eq + Hash + fmt::Debug {}

impl<T: Clone + Eq + Hash + fmt::Debug> ItemKey for T {}

/// Key type usable as a section identity.
pub trait SectionKey: Clone + Eq + Hash + fmt::Debug {}

impl<T: Clone + Eq + Hash + fmt::Debug> SectionKey for T {}

/// A record with a stable identity.
pub trait Identifiable {
    /// Identity key, unique across every section of a snapshot.
    type Id: ItemKey;

    /// The record's identity.
    fn id(&self) -> Self::Id;
}

/// Identity type of a record type.
pub type ItemId<V> = <V as Identifiable>::Id;

/// A record that carries its identity next to its content.
///
/// Useful when the value type has no natural identity of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record<K, T> {
    pub id: K,
    pub value: T,
}

impl<K, T> Record<K, T> {
    #[must_use]
    pub fn new(id: K, value: T) -> Self {
        Self { id, value }
    }
}

impl<K: ItemKey, T> Identifiable for Record<K, T> {
    type Id = K;

    fn id(&self) -> K {
        self.id.clone()
    }
}
