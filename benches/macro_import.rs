#![forbid(unsafe_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use lattice_graph::config::LoadOptions;
use lattice_graph::loader;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const NODE_COUNT: usize = 50_000;
const EDGE_COUNT: usize = 200_000;

fn macro_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("macro/import");
    group.sample_size(10);
    group.throughput(Throughput::Elements((NODE_COUNT + EDGE_COUNT) as u64));
    let harness = ImportHarness::new(NODE_COUNT, EDGE_COUNT);
    group.bench_function("synthetic_csv", |b| b.iter(|| black_box(harness.run())));
    group.finish();
}

struct ImportHarness {
    dataset: SyntheticDataset,
}

impl ImportHarness {
    fn new(nodes: usize, edges: usize) -> Self {
        Self {
            dataset: SyntheticDataset::ensure(nodes, edges),
        }
    }

    fn run(&self) -> (u64, u64) {
        let tmpdir = tempfile::tempdir().expect("tempdir");
        let output = tmpdir.path().join("macro-import-output");
        let options = LoadOptions::new(&self.dataset.input_dir, &output);
        let report = loader::load(&options).expect("load");
        (report.num_nodes, report.num_rels)
    }
}

/// Synthetic node/rel CSV fixture, generated once per process and cached
/// under `target/` so repeated `cargo bench` runs reuse it.
struct SyntheticDataset {
    input_dir: PathBuf,
}

impl SyntheticDataset {
    fn ensure(node_count: usize, edge_count: usize) -> Self {
        let input_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("target/bench_datasets")
            .join(format!("synthetic_{node_count}_{edge_count}"));
        let marker = input_dir.join(".ready");
        if !marker.exists() {
            fs::create_dir_all(&input_dir).expect("dataset dir");
            write_nodes(&input_dir.join("person.csv"), node_count);
            write_edges(&input_dir.join("follows.csv"), edge_count, node_count);
            write_metadata(&input_dir.join("metadata.json"));
            fs::write(&marker, []).expect("marker");
        }
        Self { input_dir }
    }
}

fn write_nodes(path: &Path, count: usize) {
    let mut f = fs::File::create(path).expect("nodes csv");
    writeln!(f, "ID:INT64,name:STRING").unwrap();
    for id in 0..count {
        writeln!(f, "{id},user-{id}").unwrap();
    }
}

fn write_edges(path: &Path, count: usize, nodes: usize) {
    let mut f = fs::File::create(path).expect("edges csv");
    writeln!(f, "START_ID:INT64,END_ID:INT64").unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5151_5151);
    for _ in 0..count {
        let src = rng.gen_range(0..nodes);
        let mut dst = rng.gen_range(0..nodes);
        if dst == src {
            dst = (dst + 1) % nodes;
        }
        writeln!(f, "{src},{dst}").unwrap();
    }
}

fn write_metadata(path: &Path) {
    fs::write(
        path,
        r#"{
            "nodeFileDescriptions": [
                {"filePath": "person.csv", "labelName": "Person", "primaryKeyPropertyName": "ID"}
            ],
            "relFileDescriptions": [
                {
                    "filePath": "follows.csv",
                    "labelName": "Follows",
                    "relMultiplicity": "MANY_MANY",
                    "srcNodeLabelNames": ["Person"],
                    "dstNodeLabelNames": ["Person"]
                }
            ]
        }"#,
    )
    .expect("metadata.json");
}

criterion_group!(benches, macro_import);
criterion_main!(benches);
