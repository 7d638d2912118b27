//! End-to-end bulk-load scenarios (spec.md §8 S1-S3): drive the public
//! `loader::load` entry point over small CSV fixtures, then read the
//! loader's own on-disk output back through `Catalog`/`Column`/
//! `ListStorage`/`OverflowFile`/`HashIndex` the way a reader would.

use std::io::Write;

use lattice_graph::catalog::Catalog;
use lattice_graph::config::LoadOptions;
use lattice_graph::index::hash_index::{HashIndex, IndexKey};
use lattice_graph::loader;
use lattice_graph::storage::column::Column;
use lattice_graph::storage::list::ListStorage;
use lattice_graph::storage::overflow::{self, GF_STRING_SIZE};
use lattice_graph::types::{Direction, PropertyType};

fn write_file(dir: &std::path::Path, name: &str, contents: &str) {
    let mut f = std::fs::File::create(dir.join(name)).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

/// S1 (tiny load): `ID:INT64,name:STRING` with two rows; expect
/// `numNodes=2`, index[alice]=0, column[name][0]="alice".
#[test]
fn s1_tiny_load() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    write_file(input.path(), "nodes.csv", "ID:INT64,name:STRING\n0,alice\n1,bob\n");
    write_file(
        input.path(),
        "metadata.json",
        r#"{
            "nodeFileDescriptions": [
                {"filePath": "nodes.csv", "labelName": "Person", "primaryKeyPropertyName": "ID"}
            ],
            "relFileDescriptions": []
        }"#,
    );

    let report = loader::load(&LoadOptions::new(input.path(), output.path())).unwrap();
    assert_eq!(report.num_nodes, 2);

    let catalog = Catalog::load(&output.path().join("catalog.bin")).unwrap();
    let person = catalog.node_table_by_name("Person").unwrap();
    assert_eq!(person.name, "Person");

    let mut index = HashIndex::open(output.path().join(format!("n-{}", person.table_id))).unwrap();
    assert_eq!(index.lookup(&IndexKey::Int64(0)).unwrap(), Some(0));
    assert_eq!(index.lookup(&IndexKey::Int64(1)).unwrap(), Some(1));

    let name_pid = person.properties.iter().position(|p| p.name == "name").unwrap();
    let mut name_col = Column::open(
        output.path().join(format!("n-{}-{}.col", person.table_id, name_pid)),
        GF_STRING_SIZE,
    )
    .unwrap();
    let mut ovf = overflow::OverflowFile::open(output.path().join(format!("n-{}-{}.ovf", person.table_id, name_pid))).unwrap();
    let bytes = name_col.read_slot(0).unwrap().unwrap();
    let gf = overflow::GfString::decode(&bytes.try_into().unwrap());
    assert_eq!(overflow::read_string(&gf, &mut ovf).unwrap(), "alice");
}

/// S2 (MANY-MANY): 3 person nodes, knows rels `0->1, 0->2, 1->2`.
/// Expect FWD list at 0 = [1,2], at 1 = [2]; BWD list at 1 = [0], at 2 = [0,1].
#[test]
fn s2_many_many_adjacency() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    write_file(input.path(), "person.csv", "ID:INT64,name:STRING\n0,a\n1,b\n2,c\n");
    write_file(
        input.path(),
        "knows.csv",
        "START_ID:INT64,END_ID:INT64\n0,1\n0,2\n1,2\n",
    );
    write_file(
        input.path(),
        "metadata.json",
        r#"{
            "nodeFileDescriptions": [
                {"filePath": "person.csv", "labelName": "Person", "primaryKeyPropertyName": "ID"}
            ],
            "relFileDescriptions": [
                {
                    "filePath": "knows.csv",
                    "labelName": "Knows",
                    "relMultiplicity": "MANY_MANY",
                    "srcNodeLabelNames": ["Person"],
                    "dstNodeLabelNames": ["Person"]
                }
            ]
        }"#,
    );

    let report = loader::load(&LoadOptions::new(input.path(), output.path())).unwrap();
    assert_eq!(report.num_rels, 3);

    let catalog = Catalog::load(&output.path().join("catalog.bin")).unwrap();
    let person = catalog.node_table_by_name("Person").unwrap();
    let knows = catalog.rel_table_by_name("Knows").unwrap();

    // Single candidate label on both sides, so bytesForLabel == 0 and
    // bytesForOffset is 1 byte for a max offset of 2 (spec.md §3).
    let element_size = 1;

    let mut fwd = ListStorage::open(
        output.path().join(format!("r-{}-{}-fwd", knows.table_id, person.table_id)),
        element_size,
    )
    .unwrap();
    let fwd_0: Vec<u64> = fwd.read_list(0).unwrap().iter().map(|b| b[0] as u64).collect();
    let mut fwd_0_sorted = fwd_0.clone();
    fwd_0_sorted.sort();
    assert_eq!(fwd_0_sorted, vec![1, 2]);
    let fwd_1: Vec<u64> = fwd.read_list(1).unwrap().iter().map(|b| b[0] as u64).collect();
    assert_eq!(fwd_1, vec![2]);
    assert!(fwd.read_list(2).unwrap().is_empty());

    let mut bwd = ListStorage::open(
        output.path().join(format!("r-{}-{}-bwd", knows.table_id, person.table_id)),
        element_size,
    )
    .unwrap();
    assert!(bwd.read_list(0).unwrap().is_empty());
    let bwd_1: Vec<u64> = bwd.read_list(1).unwrap().iter().map(|b| b[0] as u64).collect();
    assert_eq!(bwd_1, vec![0]);
    let bwd_2: Vec<u64> = bwd.read_list(2).unwrap().iter().map(|b| b[0] as u64).collect();
    let mut bwd_2_sorted = bwd_2.clone();
    bwd_2_sorted.sort();
    assert_eq!(bwd_2_sorted, vec![0, 1]);

    let _ = Direction::Fwd;
}

/// S3 (long string): a 26-byte name overflows; column slot holds an
/// inline 4-byte prefix plus overflow pointer, and the overflow bytes
/// decode back to the original string (spec.md §3 invariant 5/6).
#[test]
fn s3_long_string_overflows() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let long_name = "abcdefghijklmnopqrstuvwxyz";
    assert_eq!(long_name.len(), 26);

    write_file(
        input.path(),
        "nodes.csv",
        &format!("ID:INT64,name:STRING\n0,{long_name}\n"),
    );
    write_file(
        input.path(),
        "metadata.json",
        r#"{
            "nodeFileDescriptions": [
                {"filePath": "nodes.csv", "labelName": "Person", "primaryKeyPropertyName": "ID"}
            ],
            "relFileDescriptions": []
        }"#,
    );

    loader::load(&LoadOptions::new(input.path(), output.path())).unwrap();

    let catalog = Catalog::load(&output.path().join("catalog.bin")).unwrap();
    let person = catalog.node_table_by_name("Person").unwrap();
    assert_eq!(person.properties[0].property_type, PropertyType::String);

    let mut col = Column::open(output.path().join(format!("n-{}-0.col", person.table_id)), GF_STRING_SIZE).unwrap();
    let mut ovf = overflow::OverflowFile::open(output.path().join(format!("n-{}-0.ovf", person.table_id))).unwrap();
    let bytes = col.read_slot(0).unwrap().unwrap();
    let gf = overflow::GfString::decode(&bytes.try_into().unwrap());
    assert!(matches!(gf, overflow::GfString::Overflow { .. }));
    assert_eq!(gf.len(), 26);
    assert_eq!(overflow::read_string(&gf, &mut ovf).unwrap(), long_name);
}

/// Invariant 1 (spec.md §8): for a ONE_MANY relationship, the FWD side
/// is a column (at most one rel per source) and the BWD side a list.
/// Two employees (0, 1) both work at the same company (2): each
/// employee has at most one `works_at` edge (FWD = ONE), but the
/// company is pointed to by many employees (BWD = MANY).
#[test]
fn one_many_multiplicity_picks_column_and_list() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    write_file(input.path(), "person.csv", "ID:INT64,name:STRING\n0,a\n1,b\n2,c\n");
    write_file(
        input.path(),
        "works_at.csv",
        "START_ID:INT64,END_ID:INT64\n0,2\n1,2\n",
    );
    write_file(
        input.path(),
        "metadata.json",
        r#"{
            "nodeFileDescriptions": [
                {"filePath": "person.csv", "labelName": "Person", "primaryKeyPropertyName": "ID"}
            ],
            "relFileDescriptions": [
                {
                    "filePath": "works_at.csv",
                    "labelName": "WorksAt",
                    "relMultiplicity": "ONE_MANY",
                    "srcNodeLabelNames": ["Person"],
                    "dstNodeLabelNames": ["Person"]
                }
            ]
        }"#,
    );

    loader::load(&LoadOptions::new(input.path(), output.path())).unwrap();

    let catalog = Catalog::load(&output.path().join("catalog.bin")).unwrap();
    let person = catalog.node_table_by_name("Person").unwrap();
    let works_at = catalog.rel_table_by_name("WorksAt").unwrap();

    // FWD is ONE: stored as a fixed-width column, one adjacency slot per
    // source offset; employees 0 and 1 each point at company 2,
    // employee 2 has no outgoing edge (null slot).
    let mut fwd_col = Column::open(
        output.path().join(format!("r-{}-{}-fwd.col", works_at.table_id, person.table_id)),
        1,
    )
    .unwrap();
    assert_eq!(fwd_col.num_slots(), 3);
    assert!(fwd_col.read_slot(0).unwrap().is_some());
    assert!(fwd_col.read_slot(1).unwrap().is_some());
    assert!(fwd_col.read_slot(2).unwrap().is_none());

    // BWD is MANY: company 2 has exactly two incoming edges.
    let mut bwd = ListStorage::open(
        output.path().join(format!("r-{}-{}-bwd", works_at.table_id, person.table_id)),
        1,
    )
    .unwrap();
    assert_eq!(bwd.read_list(2).unwrap().len(), 2);
    assert!(bwd.read_list(0).unwrap().is_empty());
    assert!(bwd.read_list(1).unwrap().is_empty());
}
