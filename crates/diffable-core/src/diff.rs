#![forbid(unsafe_code)]

//! Identity-aware diff between two snapshots.
//!
//! [`diff`] is a pure function: no shared state, callable from any thread.
//!
//! # Algorithm
//!
//! Records carry identity independent of position, so this is not a text
//! diff. Per level (sections, then items):
//!
//! 1. `deleted = old − new`, `inserted = new − old` by identity.
//! 2. Retained identities whose value changed are `reloaded`, unless the
//!    candidate marked them with `reconfigure_items`, in which case they are
//!    `reconfigured`. Explicit marks apply even when the value is equal.
//! 3. Retained identities are `moved` only if they fall outside the longest
//!    subsequence whose relative order is unchanged. An item that changed
//!    section is always moved. Items staying in their section are compared
//!    by their old indices, and the longest increasing subsequence of those
//!    indices (in new order) stays put.
//!
//! Insertions and deletions of other items never cause spurious moves,
//! because only the relative order of retained identities is compared.
//!
//! # Complexity
//!
//! | Step                  | Time           |
//! |-----------------------|----------------|
//! | Position indexing     | O(n)           |
//! | Set differences       | O(n)           |
//! | LIS per section       | O(k log k)     |
//! | Value comparison      | O(n) × `eq`    |
//!
//! where `n` is the total number of items and `k` the retained items of one
//! section.

use ahash::AHashMap;

use crate::edit_script::{
    EditScript, IndexPath, ItemChange, ItemMove, SectionChange, SectionMove,
};
use crate::identity::{Identifiable, SectionKey};
use crate::snapshot::{ItemMark, Snapshot};

/// Compute the edit script that transforms `old` into `new`.
///
/// Both snapshots must be well formed; the snapshot mutation API guarantees
/// this. Diffing a settled snapshot against itself yields an empty script.
///
/// # Example
///
/// ```
/// use diffable_core::{Record, Snapshot, IndexPath, diff};
///
/// let mut old = Snapshot::new();
/// old.append_sections(["s"]).unwrap();
/// old.append_items([Record::new("a", 1), Record::new("b", 2), Record::new("c", 3)], None)
///     .unwrap();
///
/// let mut new = old.clone();
/// new.move_item_before(&"c", &"a").unwrap();
/// new.update_items([Record::new("c", 9)]).unwrap();
///
/// let script = diff(&old, &new);
/// assert!(script.inserted.is_empty() && script.deleted.is_empty());
/// assert!(script.is_reloaded(&"c"));
/// let m = script.move_of(&"c").unwrap();
/// assert_eq!((m.from, m.to), (IndexPath::new(0, 2), IndexPath::new(0, 0)));
/// assert!(!script.is_moved(&"a") && !script.is_moved(&"b"));
/// ```
#[must_use]
pub fn diff<S, V>(old: &Snapshot<S, V>, new: &Snapshot<S, V>) -> EditScript<S, V::Id>
where
    S: SectionKey,
    V: Identifiable + PartialEq,
{
    debug_assert!(old.check_invariants().is_ok(), "old snapshot is malformed");
    debug_assert!(new.check_invariants().is_ok(), "new snapshot is malformed");

    let span = tracing::debug_span!(
        "diffable.diff",
        old_items = old.number_of_items(),
        new_items = new.number_of_items(),
        changes = tracing::field::Empty,
    );
    let _guard = span.enter();

    let mut script = EditScript::new();
    diff_sections(old, new, &mut script);
    diff_items(old, new, &mut script);

    span.record("changes", script.change_count());
    tracing::debug!(
        target: "diffable.diff",
        inserted = script.inserted.len(),
        deleted = script.deleted.len(),
        moved = script.moved.len(),
        reloaded = script.reloaded.len(),
        reconfigured = script.reconfigured.len(),
        section_inserts = script.section_inserts.len(),
        section_deletes = script.section_deletes.len(),
        section_moves = script.section_moves.len(),
        "diff computed"
    );
    script
}

fn diff_sections<S, V>(old: &Snapshot<S, V>, new: &Snapshot<S, V>, script: &mut EditScript<S, V::Id>)
where
    S: SectionKey,
    V: Identifiable,
{
    let old_sections = old.section_identifiers();
    let new_sections = new.section_identifiers();
    let old_index: AHashMap<&S, usize> = old_sections.iter().zip(0..).collect();

    for (index, section) in old_sections.iter().enumerate() {
        if !new.contains_section(section) {
            script.section_deletes.push(SectionChange {
                id: section.clone(),
                index,
            });
        }
    }

    let retained: Vec<usize> = new_sections
        .iter()
        .filter_map(|s| old_index.get(s).copied())
        .collect();
    let stays = longest_increasing_subsequence(&retained);

    let mut cursor = 0;
    for (to, section) in new_sections.iter().enumerate() {
        let Some(&from) = old_index.get(section) else {
            script.section_inserts.push(SectionChange {
                id: section.clone(),
                index: to,
            });
            continue;
        };
        if !stays[cursor] {
            script.section_moves.push(SectionMove {
                id: section.clone(),
                from,
                to,
            });
        }
        cursor += 1;
        if new.is_section_marked_for_reload(section) {
            script.section_reloads.push(SectionChange {
                id: section.clone(),
                index: to,
            });
        }
    }
}

fn diff_items<S, V>(old: &Snapshot<S, V>, new: &Snapshot<S, V>, script: &mut EditScript<S, V::Id>)
where
    S: SectionKey,
    V: Identifiable + PartialEq,
{
    let mut old_paths: AHashMap<&V::Id, IndexPath> = AHashMap::with_capacity(old.number_of_items());
    for (si, section) in old.section_identifiers().iter().enumerate() {
        for (ii, id) in old.item_identifiers_in(section).unwrap_or_default().iter().enumerate() {
            old_paths.insert(id, IndexPath::new(si, ii));
            if !new.contains_item(id) {
                script.deleted.push(ItemChange {
                    id: id.clone(),
                    path: IndexPath::new(si, ii),
                });
            }
        }
    }

    for (si, section) in new.section_identifiers().iter().enumerate() {
        let ids = new.item_identifiers_in(section).unwrap_or_default();

        // Old item indices of identities that stay in this section, in new order.
        let same_section: Vec<usize> = ids
            .iter()
            .filter(|id| old.section_of(id) == Some(section))
            .filter_map(|id| old_paths.get(id).map(|p| p.item))
            .collect();
        let stays = longest_increasing_subsequence(&same_section);

        let mut cursor = 0;
        for (ii, id) in ids.iter().enumerate() {
            let to = IndexPath::new(si, ii);
            let Some(&from) = old_paths.get(id) else {
                script.inserted.push(ItemChange { id: id.clone(), path: to });
                continue;
            };

            let moved = if old.section_of(id) == Some(section) {
                let kept = stays[cursor];
                cursor += 1;
                !kept
            } else {
                true
            };
            if moved {
                script.moved.push(ItemMove {
                    id: id.clone(),
                    from,
                    to,
                });
            }

            let changed = old.value(id) != new.value(id);
            match (new.item_mark(id), changed) {
                (Some(ItemMark::Reconfigure), _) => {
                    script.reconfigured.push(ItemChange { id: id.clone(), path: to });
                }
                (Some(ItemMark::Reload), _) | (None, true) => {
                    script.reloaded.push(ItemChange { id: id.clone(), path: to });
                }
                (None, false) => {}
            }
        }
    }
}

/// Mask of the positions forming one longest strictly increasing
/// subsequence of `seq` (patience sorting, O(n log n)).
pub(crate) fn longest_increasing_subsequence(seq: &[usize]) -> Vec<bool> {
    let mut keep = vec![false; seq.len()];
    // tails[k]: position of the smallest tail of an increasing run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &x) in seq.iter().enumerate() {
        let pile = tails.partition_point(|&t| seq[t] < x);
        if pile > 0 {
            prev[i] = Some(tails[pile - 1]);
        }
        if pile == tails.len() {
            tails.push(i);
        } else {
            tails[pile] = i;
        }
    }

    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        keep[i] = true;
        cursor = prev[i];
    }
    keep
}
