#![forbid(unsafe_code)]

//! Sectioned, ordered snapshot of identity-bearing records.
//!
//! A [`Snapshot`] is pure data: an ordered list of section keys, the ordered
//! item identities inside each section, and a map from identity to value.
//! It holds no diff logic. Callers copy the current snapshot, mutate the copy
//! into a *candidate*, and hand the candidate to the apply controller.
//!
//! # Invariants
//!
//! 1. Every item identity appears in exactly one section, exactly once.
//! 2. Every item identity has a stored value.
//! 3. The section order has no duplicates and names exactly the sections
//!    that hold an item list (a section may be empty).
//!
//! # Errors
//!
//! Mutations that would break an invariant, or that reference an identity
//! the snapshot does not hold, return a [`SnapshotError`] and leave the
//! snapshot untouched: every input is validated before anything changes.
//! Deleting an absent item or section is a silent no-op.
//!
//! # Marks
//!
//! [`reload_items`](Snapshot::reload_items) and
//! [`reconfigure_items`](Snapshot::reconfigure_items) do not change values;
//! they record how the diff engine should classify those items. The last
//! mark applied to an identity wins. Marks belong to the mutation history of
//! one candidate and are dropped once the snapshot is accepted
//! ([`settled`](Snapshot::settled)).

use std::fmt;

use ahash::{AHashMap, AHashSet};

use crate::edit_script::IndexPath;
use crate::error::{Result, SnapshotError};
use crate::identity::{Identifiable, SectionKey};

/// Pending classification requested for an item by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemMark {
    /// Treat the slot as replaced.
    Reload,
    /// Swap the content in place.
    Reconfigure,
}

/// An ordered, sectioned collection of identifiable records.
#[derive(Clone)]
pub struct Snapshot<S, V: Identifiable> {
    sections: Vec<S>,
    items: AHashMap<S, Vec<V::Id>>,
    values: AHashMap<V::Id, V>,
    owners: AHashMap<V::Id, S>,
    item_marks: AHashMap<V::Id, ItemMark>,
    section_reloads: AHashSet<S>,
}

impl<S, V: Identifiable> Default for Snapshot<S, V> {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
            items: AHashMap::new(),
            values: AHashMap::new(),
            owners: AHashMap::new(),
            item_marks: AHashMap::new(),
            section_reloads: AHashSet::new(),
        }
    }
}

impl<S: fmt::Debug, V: Identifiable> fmt::Debug for Snapshot<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sections", &self.sections)
            .field("items", &self.values.len())
            .field("marked_items", &self.item_marks.len())
            .field("marked_sections", &self.section_reloads.len())
            .finish()
    }
}

impl<S, V> PartialEq for Snapshot<S, V>
where
    S: SectionKey,
    V: Identifiable + PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.sections == other.sections
            && self.items == other.items
            && self.values == other.values
            && self.item_marks == other.item_marks
            && self.section_reloads == other.section_reloads
    }
}

impl<S: SectionKey, V: Identifiable> Snapshot<S, V> {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ====================================================================
    // Read API
    // ====================================================================

    /// Section keys in display order.
    #[must_use]
    pub fn section_identifiers(&self) -> &[S] {
        &self.sections
    }

    #[must_use]
    pub fn number_of_sections(&self) -> usize {
        self.sections.len()
    }

    /// Total number of items across all sections.
    #[must_use]
    pub fn number_of_items(&self) -> usize {
        self.values.len()
    }

    /// Number of items in `section`, or `None` if the section is absent.
    #[must_use]
    pub fn number_of_items_in(&self, section: &S) -> Option<usize> {
        self.items.get(section).map(Vec::len)
    }

    /// Every item identity, section by section, in display order.
    #[must_use]
    pub fn item_identifiers(&self) -> Vec<V::Id> {
        let mut out = Vec::with_capacity(self.values.len());
        for section in &self.sections {
            if let Some(ids) = self.items.get(section) {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    /// Item identities of one section, in display order.
    #[must_use]
    pub fn item_identifiers_in(&self, section: &S) -> Option<&[V::Id]> {
        self.items.get(section).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains_item(&self, id: &V::Id) -> bool {
        self.values.contains_key(id)
    }

    #[must_use]
    pub fn contains_section(&self, section: &S) -> bool {
        self.items.contains_key(section)
    }

    /// The stored value for an identity.
    #[must_use]
    pub fn value(&self, id: &V::Id) -> Option<&V> {
        self.values.get(id)
    }

    /// Values in display order.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.sections
            .iter()
            .filter_map(|section| self.items.get(section))
            .flatten()
            .filter_map(|id| self.values.get(id))
    }

    /// The section currently holding `id`.
    #[must_use]
    pub fn section_of(&self, id: &V::Id) -> Option<&S> {
        self.owners.get(id)
    }

    #[must_use]
    pub fn index_of_section(&self, section: &S) -> Option<usize> {
        self.sections.iter().position(|s| s == section)
    }

    #[must_use]
    pub fn section_at(&self, index: usize) -> Option<&S> {
        self.sections.get(index)
    }

    /// Position of `id` within its own section.
    #[must_use]
    pub fn index_of_item(&self, id: &V::Id) -> Option<usize> {
        let section = self.owners.get(id)?;
        self.items.get(section)?.iter().position(|i| i == id)
    }

    /// `(section index, item index)` of `id`.
    #[must_use]
    pub fn index_path_of(&self, id: &V::Id) -> Option<IndexPath> {
        let section = self.owners.get(id)?;
        Some(IndexPath::new(
            self.index_of_section(section)?,
            self.index_of_item(id)?,
        ))
    }

    /// The identity displayed at `path`.
    #[must_use]
    pub fn item_at(&self, path: IndexPath) -> Option<&V::Id> {
        let section = self.sections.get(path.section)?;
        self.items.get(section)?.get(path.item)
    }

    /// Ordered `(section, items)` pairs describing the structure only.
    #[must_use]
    pub fn layout(&self) -> Vec<(S, Vec<V::Id>)> {
        self.sections
            .iter()
            .map(|s| (s.clone(), self.items.get(s).cloned().unwrap_or_default()))
            .collect()
    }

    /// Mark recorded for `id` in this candidate, if any.
    #[must_use]
    pub fn item_mark(&self, id: &V::Id) -> Option<ItemMark> {
        self.item_marks.get(id).copied()
    }

    /// Whether `section` was passed to [`reload_sections`](Self::reload_sections).
    #[must_use]
    pub fn is_section_marked_for_reload(&self, section: &S) -> bool {
        self.section_reloads.contains(section)
    }

    /// Whether any reload or reconfigure marks are pending.
    #[must_use]
    pub fn has_pending_marks(&self) -> bool {
        !self.item_marks.is_empty() || !self.section_reloads.is_empty()
    }

    // ====================================================================
    // Item mutation
    // ====================================================================

    /// Append records to `to_section`, or to the last section when `None`.
    pub fn append_items(
        &mut self,
        values: impl IntoIterator<Item = V>,
        to_section: Option<&S>,
    ) -> Result<()> {
        let section = match to_section {
            Some(section) => self.require_section(section)?.clone(),
            None => self
                .sections
                .last()
                .cloned()
                .ok_or(SnapshotError::NoSections)?,
        };
        let batch = self.new_item_batch(values, None)?;
        let end = self.items.get(&section).map_or(0, Vec::len);
        self.place(&section, end, batch);
        Ok(())
    }

    /// Insert records into `section` at `index`, appending when the index is
    /// past the end of the section.
    pub fn insert_items_at(
        &mut self,
        values: impl IntoIterator<Item = V>,
        section: &S,
        index: usize,
    ) -> Result<()> {
        let section = self.require_section(section)?.clone();
        let batch = self.new_item_batch(values, None)?;
        let len = self.items.get(&section).map_or(0, Vec::len);
        self.place(&section, index.min(len), batch);
        Ok(())
    }

    /// Insert records immediately before an existing item.
    pub fn insert_items_before(
        &mut self,
        values: impl IntoIterator<Item = V>,
        before: &V::Id,
    ) -> Result<()> {
        let (section, index) = self.require_item_position(before)?;
        let batch = self.new_item_batch(values, None)?;
        self.place(&section, index, batch);
        Ok(())
    }

    /// Insert records immediately after an existing item.
    pub fn insert_items_after(
        &mut self,
        values: impl IntoIterator<Item = V>,
        after: &V::Id,
    ) -> Result<()> {
        let (section, index) = self.require_item_position(after)?;
        let batch = self.new_item_batch(values, None)?;
        self.place(&section, index + 1, batch);
        Ok(())
    }

    /// Replace the stored values of items that already exist.
    ///
    /// Position and marks are untouched; the diff engine notices the changed
    /// content by comparing values.
    pub fn update_items(&mut self, values: impl IntoIterator<Item = V>) -> Result<()> {
        let batch: Vec<(V::Id, V)> = values.into_iter().map(|v| (v.id(), v)).collect();
        if let Some((id, _)) = batch.iter().find(|(id, _)| !self.values.contains_key(id)) {
            return Err(SnapshotError::unknown_item(id));
        }
        for (id, value) in batch {
            self.values.insert(id, value);
        }
        Ok(())
    }

    /// Remove items wherever they occur. Absent identities are ignored.
    ///
    /// Returns how many items were removed.
    pub fn delete_items(&mut self, ids: &[V::Id]) -> usize {
        let mut doomed: AHashSet<V::Id> = AHashSet::with_capacity(ids.len());
        let mut touched: AHashSet<S> = AHashSet::new();
        for id in ids {
            if let Some(section) = self.owners.get(id) {
                touched.insert(section.clone());
                doomed.insert(id.clone());
            }
        }
        if doomed.len() < ids.len() {
            tracing::trace!(
                target: "diffable.snapshot",
                requested = ids.len(),
                present = doomed.len(),
                "delete_items ignored absent identities"
            );
        }
        for section in &touched {
            if let Some(list) = self.items.get_mut(section) {
                list.retain(|id| !doomed.contains(id));
            }
        }
        for id in &doomed {
            self.forget_item(id);
        }
        doomed.len()
    }

    /// Remove every item and every section.
    pub fn delete_all_items(&mut self) {
        self.sections.clear();
        self.items.clear();
        self.values.clear();
        self.owners.clear();
        self.item_marks.clear();
        self.section_reloads.clear();
    }

    /// Move an existing item so it sits immediately before `target`.
    pub fn move_item_before(&mut self, id: &V::Id, target: &V::Id) -> Result<()> {
        self.move_item(id, target, 0)
    }

    /// Move an existing item so it sits immediately after `target`.
    pub fn move_item_after(&mut self, id: &V::Id, target: &V::Id) -> Result<()> {
        self.move_item(id, target, 1)
    }

    /// Mark items as replaced. Every identity must exist.
    pub fn reload_items(&mut self, ids: &[V::Id]) -> Result<()> {
        self.mark_items(ids, ItemMark::Reload)
    }

    /// Mark items for an in-place content update. Every identity must exist.
    pub fn reconfigure_items(&mut self, ids: &[V::Id]) -> Result<()> {
        self.mark_items(ids, ItemMark::Reconfigure)
    }

    /// Mark every item for an in-place content update.
    pub fn reconfigure_all_items(&mut self) {
        let all: Vec<V::Id> = self.values.keys().cloned().collect();
        for id in all {
            self.item_marks.insert(id, ItemMark::Reconfigure);
        }
    }

    /// Reload the item at `index` in `section`; does nothing if there is none.
    pub fn reload_item_at(&mut self, index: usize, section: &S) {
        self.mark_item_at(index, section, ItemMark::Reload);
    }

    /// Reconfigure the item at `index` in `section`; does nothing if there is none.
    pub fn reconfigure_item_at(&mut self, index: usize, section: &S) {
        self.mark_item_at(index, section, ItemMark::Reconfigure);
    }

    /// Replace a section's contents, appending the section first if absent.
    ///
    /// Records may reuse identities already in `section`; identities living
    /// in any other section are rejected.
    pub fn set_items(&mut self, values: impl IntoIterator<Item = V>, section: &S) -> Result<()> {
        let batch = self.new_item_batch(values, Some(section))?;
        if !self.contains_section(section) {
            self.sections.push(section.clone());
            self.items.insert(section.clone(), Vec::new());
        }
        let existing = self.items.get(section).cloned().unwrap_or_default();
        self.delete_items(&existing);
        self.place(section, 0, batch);
        Ok(())
    }

    // ====================================================================
    // Section mutation
    // ====================================================================

    /// Append empty sections to the end of the section order.
    pub fn append_sections(&mut self, ids: impl IntoIterator<Item = S>) -> Result<()> {
        let batch = self.new_section_batch(ids)?;
        let end = self.sections.len();
        self.place_sections(end, batch);
        Ok(())
    }

    /// Insert empty sections immediately before `before`.
    pub fn insert_sections_before(
        &mut self,
        ids: impl IntoIterator<Item = S>,
        before: &S,
    ) -> Result<()> {
        let index = self.require_section_index(before)?;
        let batch = self.new_section_batch(ids)?;
        self.place_sections(index, batch);
        Ok(())
    }

    /// Insert empty sections immediately after `after`.
    pub fn insert_sections_after(
        &mut self,
        ids: impl IntoIterator<Item = S>,
        after: &S,
    ) -> Result<()> {
        let index = self.require_section_index(after)?;
        let batch = self.new_section_batch(ids)?;
        self.place_sections(index + 1, batch);
        Ok(())
    }

    /// Remove sections and all their items. Absent sections are ignored.
    ///
    /// Returns how many sections were removed.
    pub fn delete_sections(&mut self, ids: &[S]) -> usize {
        let mut removed = 0;
        for section in ids {
            let Some(list) = self.items.remove(section) else {
                continue;
            };
            for id in &list {
                self.forget_item(id);
            }
            self.sections.retain(|s| s != section);
            self.section_reloads.remove(section);
            removed += 1;
        }
        removed
    }

    /// Move a section so it sits immediately before `target`.
    pub fn move_section_before(&mut self, id: &S, target: &S) -> Result<()> {
        self.move_section(id, target, 0)
    }

    /// Move a section so it sits immediately after `target`.
    pub fn move_section_after(&mut self, id: &S, target: &S) -> Result<()> {
        self.move_section(id, target, 1)
    }

    /// Mark sections as replaced. Every section must exist.
    pub fn reload_sections(&mut self, ids: &[S]) -> Result<()> {
        for section in ids {
            self.require_section(section)?;
        }
        self.section_reloads.extend(ids.iter().cloned());
        Ok(())
    }

    // ====================================================================
    // Lifecycle
    // ====================================================================

    /// Drop every pending reload and reconfigure mark.
    pub fn clear_marks(&mut self) {
        self.item_marks.clear();
        self.section_reloads.clear();
    }

    /// This snapshot with its marks dropped, as stored once accepted.
    #[must_use]
    pub fn settled(mut self) -> Self {
        self.clear_marks();
        self
    }

    /// Verify the structural invariants.
    pub fn check_invariants(&self) -> Result<()> {
        let mut seen_sections: AHashSet<&S> = AHashSet::with_capacity(self.sections.len());
        for section in &self.sections {
            if !seen_sections.insert(section) {
                return Err(SnapshotError::invariant(format!(
                    "section {section:?} appears twice in the section order"
                )));
            }
            if !self.items.contains_key(section) {
                return Err(SnapshotError::invariant(format!(
                    "section {section:?} has no item list"
                )));
            }
        }
        if self.items.len() != self.sections.len() {
            return Err(SnapshotError::invariant(
                "item lists exist for sections missing from the section order",
            ));
        }

        let mut seen_items = 0usize;
        for section in &self.sections {
            for id in &self.items[section] {
                seen_items += 1;
                match self.owners.get(id) {
                    Some(owner) if owner == section => {}
                    _ => {
                        return Err(SnapshotError::invariant(format!(
                            "item {id:?} is listed in {section:?} but owned elsewhere"
                        )));
                    }
                }
                if !self.values.contains_key(id) {
                    return Err(SnapshotError::invariant(format!(
                        "item {id:?} has no value"
                    )));
                }
            }
        }
        if seen_items != self.owners.len() || seen_items != self.values.len() {
            return Err(SnapshotError::invariant(format!(
                "{seen_items} listed items but {} owners and {} values",
                self.owners.len(),
                self.values.len()
            )));
        }
        if let Some(id) = self.item_marks.keys().find(|id| !self.values.contains_key(id)) {
            return Err(SnapshotError::invariant(format!(
                "mark recorded for absent item {id:?}"
            )));
        }
        if let Some(s) = self.section_reloads.iter().find(|s| !self.items.contains_key(s)) {
            return Err(SnapshotError::invariant(format!(
                "reload recorded for absent section {s:?}"
            )));
        }
        Ok(())
    }

    // ====================================================================
    // Internals
    // ====================================================================

    fn require_section<'a>(&self, section: &'a S) -> Result<&'a S> {
        if self.items.contains_key(section) {
            Ok(section)
        } else {
            Err(SnapshotError::unknown_section(section))
        }
    }

    fn require_section_index(&self, section: &S) -> Result<usize> {
        self.index_of_section(section)
            .ok_or_else(|| SnapshotError::unknown_section(section))
    }

    fn require_item_position(&self, id: &V::Id) -> Result<(S, usize)> {
        let section = self
            .owners
            .get(id)
            .ok_or_else(|| SnapshotError::unknown_item(id))?;
        let index = self.items[section]
            .iter()
            .position(|i| i == id)
            .ok_or_else(|| SnapshotError::invariant(format!("{id:?} missing from its section")))?;
        Ok((section.clone(), index))
    }

    /// Validate a batch of new records. Identities already owned by
    /// `replacing` are allowed, for [`set_items`](Self::set_items).
    fn new_item_batch(
        &self,
        values: impl IntoIterator<Item = V>,
        replacing: Option<&S>,
    ) -> Result<Vec<(V::Id, V)>> {
        let mut seen = AHashSet::new();
        let mut batch = Vec::new();
        for value in values {
            let id = value.id();
            let clashes = match self.owners.get(&id) {
                Some(owner) => replacing != Some(owner),
                None => false,
            };
            if clashes || !seen.insert(id.clone()) {
                return Err(SnapshotError::duplicate_item(&id));
            }
            batch.push((id, value));
        }
        Ok(batch)
    }

    fn new_section_batch(&self, ids: impl IntoIterator<Item = S>) -> Result<Vec<S>> {
        let mut seen = AHashSet::new();
        let mut batch = Vec::new();
        for section in ids {
            if self.items.contains_key(&section) || !seen.insert(section.clone()) {
                return Err(SnapshotError::duplicate_section(&section));
            }
            batch.push(section);
        }
        Ok(batch)
    }

    fn place(&mut self, section: &S, index: usize, batch: Vec<(V::Id, V)>) {
        let mut ids = Vec::with_capacity(batch.len());
        for (id, value) in batch {
            self.owners.insert(id.clone(), section.clone());
            self.values.insert(id.clone(), value);
            ids.push(id);
        }
        let list = self.items.entry(section.clone()).or_default();
        list.splice(index..index, ids);
    }

    fn place_sections(&mut self, index: usize, batch: Vec<S>) {
        for section in &batch {
            self.items.insert(section.clone(), Vec::new());
        }
        self.sections.splice(index..index, batch);
    }

    fn forget_item(&mut self, id: &V::Id) {
        self.values.remove(id);
        self.owners.remove(id);
        self.item_marks.remove(id);
    }

    fn move_item(&mut self, id: &V::Id, target: &V::Id, offset: usize) -> Result<()> {
        if id == target {
            return Err(SnapshotError::self_relative(id));
        }
        let (from_section, from_index) = self.require_item_position(id)?;
        self.require_item_position(target)?;

        if let Some(list) = self.items.get_mut(&from_section) {
            list.remove(from_index);
        }
        let (to_section, to_index) = self.require_item_position(target)?;
        if let Some(list) = self.items.get_mut(&to_section) {
            list.insert(to_index + offset, id.clone());
        }
        self.owners.insert(id.clone(), to_section);
        Ok(())
    }

    fn move_section(&mut self, id: &S, target: &S, offset: usize) -> Result<()> {
        if id == target {
            return Err(SnapshotError::self_relative(id));
        }
        let from = self.require_section_index(id)?;
        self.require_section_index(target)?;
        let section = self.sections.remove(from);
        let to = self.require_section_index(target)?;
        self.sections.insert(to + offset, section);
        Ok(())
    }

    fn mark_items(&mut self, ids: &[V::Id], mark: ItemMark) -> Result<()> {
        if let Some(id) = ids.iter().find(|id| !self.values.contains_key(id)) {
            return Err(SnapshotError::unknown_item(id));
        }
        for id in ids {
            self.item_marks.insert(id.clone(), mark);
        }
        Ok(())
    }

    fn mark_item_at(&mut self, index: usize, section: &S, mark: ItemMark) {
        let id = self
            .items
            .get(section)
            .and_then(|list| list.get(index))
            .cloned();
        if let Some(id) = id {
            self.item_marks.insert(id, mark);
        }
    }
}
