#![no_main]

use diffable_core::{Record, Snapshot, diff};
use libfuzzer_sys::fuzz_target;

type Snap = Snapshot<u8, Record<u16, u8>>;

/// Decode bytes as (section, id, value) triples, skipping duplicates.
fn decode(data: &[u8]) -> Snap {
    let mut snap = Snap::new();
    for chunk in data.chunks_exact(3) {
        let section = chunk[0] % 8;
        let id = u16::from(chunk[1]);
        if !snap.contains_section(&section) {
            let _ = snap.append_sections([section]);
        }
        if !snap.contains_item(&id) {
            let _ = snap.append_items([Record::new(id, chunk[2] % 4)], Some(&section));
        }
    }
    snap
}

fuzz_target!(|data: &[u8]| {
    let Some((&head, rest)) = data.split_first() else {
        return;
    };
    let (left, right) = rest.split_at(usize::from(head).min(rest.len()));
    let old = decode(left);
    let new = decode(right);

    let script = diff(&old, &new);
    assert_eq!(script.apply_to_layout(&old.layout()), new.layout());
    assert!(diff(&new, &new).is_empty());

    for m in &script.moved {
        assert_eq!(old.index_path_of(&m.id), Some(m.from));
        assert_eq!(new.index_path_of(&m.id), Some(m.to));
    }
});
