#![no_main]

use arbitrary::Arbitrary;
use diffable_core::{Record, Snapshot, diff};
use libfuzzer_sys::fuzz_target;

type Snap = Snapshot<u8, Record<u8, u8>>;

#[derive(Debug, Arbitrary)]
enum Op {
    AppendSections(Vec<u8>),
    InsertSectionsBefore(Vec<u8>, u8),
    DeleteSections(Vec<u8>),
    MoveSectionAfter(u8, u8),
    AppendItems(Vec<(u8, u8)>, Option<u8>),
    InsertItemsAt(Vec<(u8, u8)>, u8, u8),
    InsertItemsBefore(Vec<(u8, u8)>, u8),
    DeleteItems(Vec<u8>),
    DeleteAll,
    MoveItemAfter(u8, u8),
    Update(Vec<(u8, u8)>),
    Reload(Vec<u8>),
    Reconfigure(Vec<u8>),
    ReloadAt(u8, u8),
    SetItems(Vec<(u8, u8)>, u8),
    ReloadSections(Vec<u8>),
}

fn records(pairs: &[(u8, u8)]) -> Vec<Record<u8, u8>> {
    pairs.iter().map(|(id, v)| Record::new(*id, *v)).collect()
}

fn run(snap: &mut Snap, op: &Op) -> bool {
    let result = match op {
        Op::AppendSections(ids) => snap.append_sections(ids.iter().copied()),
        Op::InsertSectionsBefore(ids, t) => snap.insert_sections_before(ids.iter().copied(), t),
        Op::DeleteSections(ids) => {
            snap.delete_sections(ids);
            Ok(())
        }
        Op::MoveSectionAfter(s, t) => snap.move_section_after(s, t),
        Op::AppendItems(pairs, section) => snap.append_items(records(pairs), section.as_ref()),
        Op::InsertItemsAt(pairs, s, at) => snap.insert_items_at(records(pairs), s, usize::from(*at)),
        Op::InsertItemsBefore(pairs, t) => snap.insert_items_before(records(pairs), t),
        Op::DeleteItems(ids) => {
            snap.delete_items(ids);
            Ok(())
        }
        Op::DeleteAll => {
            snap.delete_all_items();
            Ok(())
        }
        Op::MoveItemAfter(i, t) => snap.move_item_after(i, t),
        Op::Update(pairs) => snap.update_items(records(pairs)),
        Op::Reload(ids) => snap.reload_items(ids),
        Op::Reconfigure(ids) => snap.reconfigure_items(ids),
        Op::ReloadAt(index, s) => {
            snap.reload_item_at(usize::from(*index), s);
            Ok(())
        }
        Op::SetItems(pairs, s) => snap.set_items(records(pairs), s),
        Op::ReloadSections(ids) => snap.reload_sections(ids),
    };
    result.is_ok()
}

fuzz_target!(|ops: Vec<Op>| {
    let mut snap = Snap::new();
    let mut previous = snap.clone();
    for op in ops.iter().take(64) {
        let before = snap.clone();
        if !run(&mut snap, op) {
            assert_eq!(snap, before, "rejected {op:?} mutated the snapshot");
        }
        snap.check_invariants().expect("invariants after mutation");

        let script = diff(&previous, &snap);
        assert_eq!(script.apply_to_layout(&previous.layout()), snap.layout());
        previous = snap.clone().settled();
    }
});
