#![forbid(unsafe_code)]

//! Edit scripts: the structural changes between two snapshots.
//!
//! An [`EditScript`] is what the rendering collaborator consumes. Each
//! collection has set semantics (no identity appears twice in one list) and
//! a deterministic order:
//!
//! | Field             | Order               | Path refers to |
//! |-------------------|---------------------|----------------|
//! | `deleted`         | old display order   | old snapshot   |
//! | `inserted`        | new display order   | new snapshot   |
//! | `moved`           | new display order   | both           |
//! | `reloaded`        | new display order   | new snapshot   |
//! | `reconfigured`    | new display order   | new snapshot   |
//! | `section_deletes` | old order           | old snapshot   |
//! | `section_inserts` | new order           | new snapshot   |
//! | `section_moves`   | new order           | both           |
//! | `section_reloads` | new order           | new snapshot   |
//!
//! Movement and content change are independent facets: one identity may be
//! both moved and reloaded (or reconfigured).

use std::fmt;
use std::hash::Hash;

use ahash::AHashSet;

/// Zero-based `(section, item)` position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexPath {
    pub section: usize,
    pub item: usize,
}

impl IndexPath {
    #[must_use]
    pub const fn new(section: usize, item: usize) -> Self {
        Self { section, item }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.section, self.item)
    }
}

/// An item inserted, deleted, reloaded or reconfigured at `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemChange<I> {
    pub id: I,
    pub path: IndexPath,
}

/// An item whose position changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMove<I> {
    pub id: I,
    pub from: IndexPath,
    pub to: IndexPath,
}

/// A section inserted, deleted or reloaded at `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionChange<S> {
    pub id: S,
    pub index: usize,
}

/// A section whose position changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMove<S> {
    pub id: S,
    pub from: usize,
    pub to: usize,
}

/// One change, as a tagged variant the rendering collaborator dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOperation<'a, S, I> {
    DeleteSection { id: &'a S, index: usize },
    InsertSection { id: &'a S, index: usize },
    MoveSection { id: &'a S, from: usize, to: usize },
    ReloadSection { id: &'a S, index: usize },
    Delete { id: &'a I, path: IndexPath },
    Insert { id: &'a I, path: IndexPath },
    Move { id: &'a I, from: IndexPath, to: IndexPath },
    Reload { id: &'a I, path: IndexPath },
    Reconfigure { id: &'a I, path: IndexPath },
}

/// The changes that transform one snapshot into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditScript<S, I> {
    pub inserted: Vec<ItemChange<I>>,
    pub deleted: Vec<ItemChange<I>>,
    pub moved: Vec<ItemMove<I>>,
    pub reloaded: Vec<ItemChange<I>>,
    pub reconfigured: Vec<ItemChange<I>>,
    pub section_inserts: Vec<SectionChange<S>>,
    pub section_deletes: Vec<SectionChange<S>>,
    pub section_moves: Vec<SectionMove<S>>,
    pub section_reloads: Vec<SectionChange<S>>,
}

impl<S, I> Default for EditScript<S, I> {
    fn default() -> Self {
        Self {
            inserted: Vec::new(),
            deleted: Vec::new(),
            moved: Vec::new(),
            reloaded: Vec::new(),
            reconfigured: Vec::new(),
            section_inserts: Vec::new(),
            section_deletes: Vec::new(),
            section_moves: Vec::new(),
            section_reloads: Vec::new(),
        }
    }
}

impl<S, I> EditScript<S, I> {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the two snapshots were structurally and visually equal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// Number of item-level entries.
    #[must_use]
    pub fn item_change_count(&self) -> usize {
        self.inserted.len()
            + self.deleted.len()
            + self.moved.len()
            + self.reloaded.len()
            + self.reconfigured.len()
    }

    /// Number of section-level entries.
    #[must_use]
    pub fn section_change_count(&self) -> usize {
        self.section_inserts.len()
            + self.section_deletes.len()
            + self.section_moves.len()
            + self.section_reloads.len()
    }

    /// Total number of entries across every collection.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.item_change_count() + self.section_change_count()
    }

    /// Every change in replay order: section deletes, item deletes, section
    /// inserts and moves, item inserts and moves, then content changes.
    pub fn operations(&self) -> impl Iterator<Item = EditOperation<'_, S, I>> + '_ {
        let section_deletes = self
            .section_deletes
            .iter()
            .map(|c| EditOperation::DeleteSection { id: &c.id, index: c.index });
        let deletes = self
            .deleted
            .iter()
            .map(|c| EditOperation::Delete { id: &c.id, path: c.path });
        let section_inserts = self
            .section_inserts
            .iter()
            .map(|c| EditOperation::InsertSection { id: &c.id, index: c.index });
        let section_moves = self.section_moves.iter().map(|m| EditOperation::MoveSection {
            id: &m.id,
            from: m.from,
            to: m.to,
        });
        let inserts = self
            .inserted
            .iter()
            .map(|c| EditOperation::Insert { id: &c.id, path: c.path });
        let moves = self.moved.iter().map(|m| EditOperation::Move {
            id: &m.id,
            from: m.from,
            to: m.to,
        });
        let section_reloads = self
            .section_reloads
            .iter()
            .map(|c| EditOperation::ReloadSection { id: &c.id, index: c.index });
        let reloads = self
            .reloaded
            .iter()
            .map(|c| EditOperation::Reload { id: &c.id, path: c.path });
        let reconfigures = self
            .reconfigured
            .iter()
            .map(|c| EditOperation::Reconfigure { id: &c.id, path: c.path });

        section_deletes
            .chain(deletes)
            .chain(section_inserts)
            .chain(section_moves)
            .chain(inserts)
            .chain(moves)
            .chain(section_reloads)
            .chain(reloads)
            .chain(reconfigures)
    }
}

impl<S: PartialEq, I: PartialEq> EditScript<S, I> {
    #[must_use]
    pub fn is_inserted(&self, id: &I) -> bool {
        self.inserted.iter().any(|c| &c.id == id)
    }

    #[must_use]
    pub fn is_deleted(&self, id: &I) -> bool {
        self.deleted.iter().any(|c| &c.id == id)
    }

    #[must_use]
    pub fn is_moved(&self, id: &I) -> bool {
        self.moved.iter().any(|m| &m.id == id)
    }

    #[must_use]
    pub fn is_reloaded(&self, id: &I) -> bool {
        self.reloaded.iter().any(|c| &c.id == id)
    }

    #[must_use]
    pub fn is_reconfigured(&self, id: &I) -> bool {
        self.reconfigured.iter().any(|c| &c.id == id)
    }

    /// The move recorded for `id`, if any.
    #[must_use]
    pub fn move_of(&self, id: &I) -> Option<&ItemMove<I>> {
        self.moved.iter().find(|m| &m.id == id)
    }
}

impl<S, I> EditScript<S, I>
where
    S: Clone + Eq + Hash,
    I: Clone + Eq + Hash,
{
    /// Replay the structural part of the script onto an old layout.
    ///
    /// Batch-update semantics: deletions and move sources are removed first,
    /// then sections and items are inserted at ascending target indices.
    /// Replaying `diff(old, new)` onto `old.layout()` yields `new.layout()`.
    #[must_use]
    pub fn apply_to_layout(&self, old: &[(S, Vec<I>)]) -> Vec<(S, Vec<I>)> {
        let removed_sections: AHashSet<&S> = self
            .section_deletes
            .iter()
            .map(|c| &c.id)
            .chain(self.section_moves.iter().map(|m| &m.id))
            .collect();
        let removed_items: AHashSet<&I> = self
            .deleted
            .iter()
            .map(|c| &c.id)
            .chain(self.moved.iter().map(|m| &m.id))
            .collect();

        // Moved sections travel with their surviving items.
        let mut detached: Vec<(S, Vec<I>)> = Vec::new();
        let mut layout: Vec<(S, Vec<I>)> = Vec::with_capacity(old.len());
        for (section, items) in old {
            let kept: Vec<I> = items
                .iter()
                .filter(|id| !removed_items.contains(id))
                .cloned()
                .collect();
            if removed_sections.contains(section) {
                if self.section_moves.iter().any(|m| &m.id == section) {
                    detached.push((section.clone(), kept));
                }
            } else {
                layout.push((section.clone(), kept));
            }
        }

        let mut section_arrivals: Vec<(usize, S, Vec<I>)> = self
            .section_inserts
            .iter()
            .map(|c| (c.index, c.id.clone(), Vec::new()))
            .collect();
        for m in &self.section_moves {
            let items = detached
                .iter()
                .position(|(s, _)| s == &m.id)
                .map(|at| detached.swap_remove(at).1)
                .unwrap_or_default();
            section_arrivals.push((m.to, m.id.clone(), items));
        }
        section_arrivals.sort_by_key(|(index, _, _)| *index);
        for (index, section, items) in section_arrivals {
            let at = index.min(layout.len());
            layout.insert(at, (section, items));
        }

        let mut item_arrivals: Vec<(IndexPath, I)> = self
            .inserted
            .iter()
            .map(|c| (c.path, c.id.clone()))
            .chain(self.moved.iter().map(|m| (m.to, m.id.clone())))
            .collect();
        item_arrivals.sort_by_key(|(path, _)| *path);
        for (path, id) in item_arrivals {
            if let Some((_, items)) = layout.get_mut(path.section) {
                let at = path.item.min(items.len());
                items.insert(at, id);
            }
        }
        layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> EditScript<&'static str, &'static str> {
        EditScript {
            inserted: vec![ItemChange { id: "n", path: IndexPath::new(0, 1) }],
            deleted: vec![ItemChange { id: "b", path: IndexPath::new(0, 1) }],
            moved: vec![ItemMove {
                id: "c",
                from: IndexPath::new(0, 2),
                to: IndexPath::new(0, 0),
            }],
            reloaded: vec![ItemChange { id: "c", path: IndexPath::new(0, 0) }],
            ..EditScript::new()
        }
    }

    #[test]
    fn counts_and_lookups() {
        let s = script();
        assert_eq!(s.item_change_count(), 4);
        assert_eq!(s.change_count(), 4);
        assert!(!s.is_empty());
        assert!(s.is_moved(&"c") && s.is_reloaded(&"c"));
        assert!(s.is_inserted(&"n") && s.is_deleted(&"b"));
        assert!(!s.is_reconfigured(&"c"));
        assert_eq!(s.move_of(&"c").map(|m| m.to), Some(IndexPath::new(0, 0)));
        assert!(EditScript::<u8, u8>::new().is_empty());
    }

    #[test]
    fn operations_follow_replay_order() {
        let s = script();
        let ops: Vec<_> = s.operations().collect();
        assert!(matches!(ops[0], EditOperation::Delete { id: &"b", .. }));
        assert!(matches!(ops[1], EditOperation::Insert { id: &"n", .. }));
        assert!(matches!(ops[2], EditOperation::Move { id: &"c", .. }));
        assert!(matches!(ops[3], EditOperation::Reload { id: &"c", .. }));
        assert_eq!(ops.len(), 4);
    }

    #[test]
    fn apply_to_layout_replays_items() {
        let old = vec![("s", vec!["a", "b", "c"])];
        assert_eq!(
            script().apply_to_layout(&old),
            vec![("s", vec!["c", "n", "a"])]
        );
    }

    #[test]
    fn apply_to_layout_carries_items_with_moved_sections() {
        let old = vec![("s1", vec!["a"]), ("s2", vec!["b"]), ("gone", vec!["z"])];
        let script = EditScript {
            section_moves: vec![SectionMove { id: "s2", from: 1, to: 0 }],
            section_deletes: vec![SectionChange { id: "gone", index: 2 }],
            section_inserts: vec![SectionChange { id: "s3", index: 2 }],
            deleted: vec![ItemChange { id: "z", path: IndexPath::new(2, 0) }],
            inserted: vec![ItemChange { id: "q", path: IndexPath::new(2, 0) }],
            ..EditScript::new()
        };
        assert_eq!(
            script.apply_to_layout(&old),
            vec![("s2", vec!["b"]), ("s1", vec!["a"]), ("s3", vec!["q"])]
        );
    }

    #[test]
    fn index_path_display() {
        assert_eq!(IndexPath::new(2, 7).to_string(), "(2,7)");
    }
}
