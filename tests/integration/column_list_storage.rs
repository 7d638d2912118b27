//! Cross-module storage scenarios that the per-file unit tests don't
//! cover: columns and overflow files surviving a reopen across what
//! would be process boundaries, list storage used for overflowing
//! string properties, and the small-list chunk rolling over once a
//! chunk's 512*32-element capacity is exhausted (spec.md §4.4).

use lattice_graph::storage::column::Column;
use lattice_graph::storage::list::ListStorage;
use lattice_graph::storage::overflow::{self, GfString, OverflowFile, GF_STRING_SIZE};
use lattice_graph::types::{SMALL_LISTS_PER_CHUNK, SMALL_LIST_CAPACITY};

/// A column plus its overflow sibling, written in one process and read
/// back in a fresh set of handles, the way a loader writer and a later
/// reader process would see the same files.
#[test]
fn column_and_overflow_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let col_path = dir.path().join("n-0-0.col");
    let ovf_path = dir.path().join("n-0-0.ovf");

    {
        let mut col = Column::open(&col_path, GF_STRING_SIZE).unwrap();
        let mut ovf = OverflowFile::open(&ovf_path).unwrap();
        col.ensure_num_slots(3).unwrap();

        let short = overflow::write_string("bob", &mut ovf).unwrap();
        col.write_slot(0, &short.encode()).unwrap();

        let long = overflow::write_string("this name is definitely longer than twelve bytes", &mut ovf).unwrap();
        col.write_slot(1, &long.encode()).unwrap();

        col.fsync().unwrap();
        ovf.fsync().unwrap();
        // slot 2 left null
    }

    let mut col = Column::open(&col_path, GF_STRING_SIZE).unwrap();
    let mut ovf = OverflowFile::open(&ovf_path).unwrap();
    assert_eq!(col.num_slots(), 3);

    let bytes0 = col.read_slot(0).unwrap().unwrap();
    let gf0 = GfString::decode(&bytes0.try_into().unwrap());
    assert!(matches!(gf0, GfString::Inline { .. }));
    assert_eq!(overflow::read_string(&gf0, &mut ovf).unwrap(), "bob");

    let bytes1 = col.read_slot(1).unwrap().unwrap();
    let gf1 = GfString::decode(&bytes1.try_into().unwrap());
    assert!(matches!(gf1, GfString::Overflow { .. }));
    assert_eq!(
        overflow::read_string(&gf1, &mut ovf).unwrap(),
        "this name is definitely longer than twelve bytes"
    );

    assert!(col.read_slot(2).unwrap().is_none());
}

/// A property list whose elements are `gf_string`s: one short (inline)
/// string and one long (overflow) string sharing a single small-list
/// chunk, exercising list storage and the string-overflow file together.
#[test]
fn list_of_mixed_inline_and_overflow_strings() {
    let dir = tempfile::tempdir().unwrap();
    let mut lists = ListStorage::open(dir.path().join("n-0-unstr"), GF_STRING_SIZE).unwrap();
    let mut ovf = OverflowFile::open(dir.path().join("n-0-unstr.ovf")).unwrap();

    lists.allocate_all(&[2]).unwrap();

    let short = overflow::write_string("hi", &mut ovf).unwrap();
    lists.write_element(0, 0, &short.encode()).unwrap();
    let long = overflow::write_string("a string far too long to live inline", &mut ovf).unwrap();
    lists.write_element(0, 1, &long.encode()).unwrap();

    let elements = lists.read_list(0).unwrap();
    assert_eq!(elements.len(), 2);

    let gf0 = GfString::decode(&elements[0].clone().try_into().unwrap());
    assert_eq!(overflow::read_string(&gf0, &mut ovf).unwrap(), "hi");

    let gf1 = GfString::decode(&elements[1].clone().try_into().unwrap());
    assert!(matches!(gf1, GfString::Overflow { .. }));
    assert_eq!(
        overflow::read_string(&gf1, &mut ovf).unwrap(),
        "a string far too long to live inline"
    );
}

/// Once a chunk's `SMALL_LISTS_PER_CHUNK * SMALL_LIST_CAPACITY` element
/// capacity is exhausted, the next small list must land in a fresh
/// chunk rather than overflow into the next list's space.
#[test]
fn small_list_allocation_rolls_over_into_a_new_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let mut lists = ListStorage::open(dir.path().join("r-1-0-fwd"), 8).unwrap();

    // Exactly fill one chunk: SMALL_LISTS_PER_CHUNK lists, each at max
    // small-list capacity.
    let filling_chunk: usize = SMALL_LISTS_PER_CHUNK;
    let mut sizes = vec![SMALL_LIST_CAPACITY; filling_chunk];
    // one more list that must spill into a second chunk
    sizes.push(1);
    lists.allocate_all(&sizes).unwrap();

    for (offset, &size) in sizes.iter().enumerate() {
        for i in 0..size {
            lists
                .write_element(offset as u64, i, &((offset as i64) * 100 + i as i64).to_le_bytes())
                .unwrap();
        }
    }

    for (offset, &size) in sizes.iter().enumerate() {
        let values = lists.read_list(offset as u64).unwrap();
        assert_eq!(values.len(), size as usize);
        for (i, bytes) in values.iter().enumerate() {
            assert_eq!(
                i64::from_le_bytes(bytes.clone().try_into().unwrap()),
                offset as i64 * 100 + i as i64
            );
        }
    }
}
