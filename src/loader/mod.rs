//! C6 — Bulk Loader: parallel CSV ingestion pipeline (spec.md §4.6).
//!
//! Five passes:
//!
//!   1. Header + block-count pass: reads each file's header line, splits
//!      it into typed columns, and partitions the remainder into
//!      `CSV_READING_BLOCK_SIZE` byte blocks.
//!   2. Counting pass: counts records per block in parallel, then
//!      prefix-sums into per-table, per-block starting offsets.
//!   3. Node population pass: allocates columns/overflow/hash-index per
//!      node table sized to its final count, then writes every record's
//!      properties and primary key in parallel, building an in-memory
//!      [`NodeIdMap`] as a side effect.
//!   4. Relationship population pass, in three phases: phase 1 resolves
//!      endpoints, writes ONE-multiplicity adjacency/properties
//!      directly, and counts MANY-multiplicity list sizes; phase 2
//!      allocates list storage from those counts; phase 3 re-reads the
//!      rel files and writes MANY-multiplicity list elements in the
//!      order encountered.
//!   5. Overflow-sort pass: rewrites each string column's overflow file
//!      in ascending offset order for locality (spec.md §9 Open
//!      Question 2); list-valued string properties are left as written,
//!      see DESIGN.md.
//!
//! A failure anywhere removes the entire output directory, matching
//! `GraphLoader::cleanup()`.

pub mod compression;
pub mod csv_reader;
pub mod header;
pub mod metadata;
pub mod node_id_map;
pub mod value;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rayon::prelude::*;

use crate::catalog::{Catalog, PropertySchema, RelTableSchema};
use crate::config::LoadOptions;
use crate::error::{GraphError, Result};
use crate::index::hash_index::{HashIndex, IndexKey};
use crate::loader::compression::NodeIdCompression;
use crate::loader::csv_reader::{blocks_for_file_size, CsvBlock, CsvReader, CsvSpecialChars};
use crate::loader::header::{self, HeaderColumn};
use crate::loader::metadata::{DatasetMetadata, NodeFileDescription, RelFileDescription};
use crate::loader::node_id_map::NodeIdMap;
use crate::storage::column::Column;
use crate::storage::list::{ListLayoutBuilder, ListStorage};
use crate::storage::overflow::{self, OverflowFile, GF_STRING_SIZE};
use crate::types::{Direction, NodeId, PropertyType, TableId, REL_DIRECTIONS};

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub num_node_tables: usize,
    pub num_rel_tables: usize,
    pub num_nodes: u64,
    pub num_rels: u64,
}

pub fn load(options: &LoadOptions) -> Result<LoadReport> {
    std::fs::create_dir_all(&options.output_dir)?;
    match load_inner(options) {
        Ok(report) => Ok(report),
        Err(e) => {
            tracing::error!(error = %e, output = %options.output_dir.display(), "bulk load failed, removing output directory");
            let _ = std::fs::remove_dir_all(&options.output_dir);
            Err(e)
        }
    }
}

fn load_inner(options: &LoadOptions) -> Result<LoadReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.num_threads)
        .build()
        .map_err(|e| GraphError::Loader(e.to_string()))?;
    pool.install(|| run_pipeline(options))
}

// ---------------------------------------------------------------------
// Pass 1: header + block-count plans, catalog registration
// ---------------------------------------------------------------------

struct NodeFilePlan {
    table_id: TableId,
    desc: NodeFileDescription,
    header: Vec<HeaderColumn>,
    properties: Vec<PropertySchema>,
    pk_header_idx: usize,
    pk_type: PropertyType,
    blocks: Vec<CsvBlock>,
}

struct RelFilePlan {
    table_id: TableId,
    desc: RelFileDescription,
    header: Vec<HeaderColumn>,
    properties: Vec<PropertySchema>,
    prop_header_idx: Vec<usize>,
    start_id_idx: usize,
    end_id_idx: usize,
    start_label_idx: Option<usize>,
    end_label_idx: Option<usize>,
    id_type: PropertyType,
    src_table_ids: Vec<TableId>,
    dst_table_ids: Vec<TableId>,
    blocks: Vec<CsvBlock>,
}

fn read_header_and_blocks(path: &Path, special: CsvSpecialChars) -> Result<(Vec<HeaderColumn>, Vec<CsvBlock>)> {
    let file_size = std::fs::metadata(path)?.len();
    let mut reader = CsvReader::open_at(path, 0, special)?;
    let header_line = reader
        .next_header_line()?
        .ok_or_else(|| GraphError::Parser(format!("{}: file has no header line", path.display())))?;
    let header = header::parse_header(&header_line, special.token_separator)?;
    Ok((header, blocks_for_file_size(file_size)))
}

fn plan_node_file(catalog: &mut Catalog, desc: NodeFileDescription) -> Result<NodeFilePlan> {
    let (header, blocks) = read_header_and_blocks(&desc.file_path, desc.csv_special_chars)?;
    let properties = header::structured_properties(&header);
    let (pk_header_idx, pk_header_col) = header::find_structural(&header, &desc.primary_key_property_name)
        .ok_or_else(|| {
            GraphError::Parser(format!(
                "{}: primaryKeyPropertyName '{}' not found in header",
                desc.file_path.display(),
                desc.primary_key_property_name
            ))
        })?;
    let pk_type = match pk_header_col {
        HeaderColumn::Property(p) => p.property_type,
        HeaderColumn::Structural { property_type, .. } => *property_type,
    };
    let pk_property_idx = properties.iter().position(|p| p.name == desc.primary_key_property_name);
    let table_id = catalog.add_node_table(desc.label_name.clone(), properties.clone(), pk_property_idx)?;
    Ok(NodeFilePlan {
        table_id,
        desc,
        header,
        properties,
        pk_header_idx,
        pk_type,
        blocks,
    })
}

fn plan_rel_file(catalog: &mut Catalog, desc: RelFileDescription) -> Result<RelFilePlan> {
    let (header, blocks) = read_header_and_blocks(&desc.file_path, desc.csv_special_chars)?;
    let properties = header::structured_properties(&header);
    let prop_header_idx = properties
        .iter()
        .map(|p| header.iter().position(|c| c.name() == p.name).unwrap())
        .collect();

    let (start_id_idx, start_col) = header::find_structural(&header, header::START_ID_COLUMN)
        .ok_or_else(|| GraphError::Parser(format!("{}: missing START_ID column", desc.file_path.display())))?;
    let (end_id_idx, _) = header::find_structural(&header, header::END_ID_COLUMN)
        .ok_or_else(|| GraphError::Parser(format!("{}: missing END_ID column", desc.file_path.display())))?;
    let id_type = match start_col {
        HeaderColumn::Structural { property_type, .. } => *property_type,
        HeaderColumn::Property(p) => p.property_type,
    };
    let start_label_idx = header::find_structural(&header, header::START_ID_LABEL_COLUMN).map(|(i, _)| i);
    let end_label_idx = header::find_structural(&header, header::END_ID_LABEL_COLUMN).map(|(i, _)| i);

    let src_table_ids = desc
        .src_node_label_names
        .iter()
        .map(|n| catalog.node_table_by_name(n).map(|t| t.table_id))
        .collect::<Result<Vec<_>>>()?;
    let dst_table_ids = desc
        .dst_node_label_names
        .iter()
        .map(|n| catalog.node_table_by_name(n).map(|t| t.table_id))
        .collect::<Result<Vec<_>>>()?;

    if src_table_ids.len() > 1 && start_label_idx.is_none() {
        return Err(GraphError::Parser(format!(
            "{}: multiple src labels declared, but no START_ID_LABEL column",
            desc.file_path.display()
        )));
    }
    if dst_table_ids.len() > 1 && end_label_idx.is_none() {
        return Err(GraphError::Parser(format!(
            "{}: multiple dst labels declared, but no END_ID_LABEL column",
            desc.file_path.display()
        )));
    }

    let table_id = catalog.add_rel_table(
        desc.label_name.clone(),
        properties.clone(),
        src_table_ids.clone(),
        dst_table_ids.clone(),
        desc.fwd_multiplicity,
        desc.bwd_multiplicity,
    )?;

    Ok(RelFilePlan {
        table_id,
        desc,
        header,
        properties,
        prop_header_idx,
        start_id_idx,
        end_id_idx,
        start_label_idx,
        end_label_idx,
        id_type,
        src_table_ids,
        dst_table_ids,
        blocks,
    })
}

// ---------------------------------------------------------------------
// Shared block-iteration helper
// ---------------------------------------------------------------------

/// Reads every record in `block`, handing `(local_index, fields)` to `f`.
/// `skip_header` must be `true` for the file's first block (`block.start
/// == 0`) so the header line itself is not treated as data. Continues
/// past `block.end` to finish the record straddling the boundary, giving
/// adjacent blocks a non-overlapping, gap-free partition of records
/// (spec.md §4.6 Pass 1).
fn for_each_record_in_block(
    path: &Path,
    block: CsvBlock,
    special: CsvSpecialChars,
    skip_header: bool,
    mut f: impl FnMut(u64, Vec<String>) -> Result<()>,
) -> Result<()> {
    let mut reader = CsvReader::open_at(path, block.start, special)?;
    if skip_header {
        reader.next_header_line()?;
    }
    let mut local = 0u64;
    loop {
        match reader.next_record()? {
            None => break,
            Some(fields) => {
                f(local, fields)?;
                local += 1;
                if reader.position() >= block.end {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn count_blocks(path: &Path, blocks: &[CsvBlock], special: CsvSpecialChars) -> Result<Vec<u64>> {
    blocks
        .par_iter()
        .enumerate()
        .map(|(b, block)| -> Result<u64> {
            let mut n = 0u64;
            for_each_record_in_block(path, *block, special, b == 0, |_, _| {
                n += 1;
                Ok(())
            })?;
            Ok(n)
        })
        .collect()
}

fn prefix_sum(counts: &[u64]) -> (Vec<u64>, u64) {
    let mut offsets = Vec::with_capacity(counts.len());
    let mut total = 0u64;
    for &c in counts {
        offsets.push(total);
        total += c;
    }
    (offsets, total)
}

fn parse_index_key(raw: &str, ty: PropertyType, file: &str, line: u64) -> Result<IndexKey> {
    let raw = value::rtrim(raw);
    match ty {
        PropertyType::Int64 => raw
            .parse::<i64>()
            .map(IndexKey::Int64)
            .map_err(|e| GraphError::conversion(file, line, format!("invalid ID '{raw}': {e}"))),
        PropertyType::String => Ok(IndexKey::Str(raw.to_string())),
        other => Err(GraphError::Parser(format!("unsupported ID column type {other:?}"))),
    }
}

// ---------------------------------------------------------------------
// Pass 3: node population
// ---------------------------------------------------------------------

enum NodePropStore {
    Fixed(Mutex<Column>),
    Str(Mutex<Column>, Mutex<OverflowFile>),
}

/// Shared with [`crate::transaction`], which applies node property
/// overwrites to these same files after bulk load.
pub(crate) fn node_column_path(output_dir: &Path, table_id: TableId, pid: usize) -> PathBuf {
    output_dir.join(format!("n-{table_id}-{pid}.col"))
}
pub(crate) fn node_overflow_path(output_dir: &Path, table_id: TableId, pid: usize) -> PathBuf {
    output_dir.join(format!("n-{table_id}-{pid}.ovf"))
}
fn node_index_base(output_dir: &Path, table_id: TableId) -> PathBuf {
    output_dir.join(format!("n-{table_id}"))
}
/// Always-present unstructured-property list (spec.md §6 directory
/// layout: `n-<t>-unstr.lists`; SUPPLEMENTED FEATURES item 1). This CSV
/// format's header fully enumerates every property a row may carry, so
/// no row ever contributes an unstructured value; the file is created
/// empty (every offset a zero-size list) purely for directory-layout
/// parity with the original system.
fn node_unstr_base(output_dir: &Path, table_id: TableId) -> PathBuf {
    output_dir.join(format!("n-{table_id}-unstr"))
}

fn write_fixed_or_string(
    store: &NodePropStoreLike,
    raw: &str,
    ty: PropertyType,
    offset: u64,
    file: &str,
    line: u64,
) -> Result<()> {
    match store {
        NodePropStoreLike::Fixed(col) => match value::encode_fixed(raw, ty, file, line)? {
            Some(bytes) => col.lock().unwrap().write_slot(offset, &bytes)?,
            None => col.lock().unwrap().set_null(offset, true)?,
        },
        NodePropStoreLike::Str(col, ovf) => {
            let trimmed = value::rtrim(raw);
            if trimmed.is_empty() {
                col.lock().unwrap().set_null(offset, true)?;
            } else {
                let gf = overflow::write_string(trimmed, &mut ovf.lock().unwrap())?;
                col.lock().unwrap().write_slot(offset, &gf.encode())?;
            }
        }
    }
    Ok(())
}

/// Shared shape between node and (ONE-multiplicity) rel property storage,
/// so `write_fixed_or_string` serves both Pass 3 and Pass 4 phase 1.
enum NodePropStoreLike<'a> {
    Fixed(&'a Mutex<Column>),
    Str(&'a Mutex<Column>, &'a Mutex<OverflowFile>),
}

impl NodePropStore {
    fn as_like(&self) -> NodePropStoreLike<'_> {
        match self {
            NodePropStore::Fixed(c) => NodePropStoreLike::Fixed(c),
            NodePropStore::Str(c, o) => NodePropStoreLike::Str(c, o),
        }
    }
}

struct NodeTableLoaded {
    num_nodes: u64,
}

#[allow(clippy::too_many_arguments)]
fn populate_node_table(
    output_dir: &Path,
    plan: &NodeFilePlan,
    string_overflow_jobs: &Mutex<Vec<(PathBuf, PathBuf)>>,
) -> Result<(NodeTableLoaded, NodeIdMap)> {
    let counts = count_blocks(&plan.desc.file_path, &plan.blocks, plan.desc.csv_special_chars)?;
    let (block_offsets, num_nodes) = prefix_sum(&counts);

    let mut props: HashMap<String, NodePropStore> = HashMap::new();
    for (pid, p) in plan.properties.iter().enumerate() {
        match p.property_type {
            PropertyType::String => {
                let col_path = node_column_path(output_dir, plan.table_id, pid);
                let ovf_path = node_overflow_path(output_dir, plan.table_id, pid);
                let mut col = Column::open(&col_path, GF_STRING_SIZE)?;
                col.ensure_num_slots(num_nodes)?;
                let ovf = OverflowFile::open(&ovf_path)?;
                string_overflow_jobs.lock().unwrap().push((col_path, ovf_path));
                props.insert(p.name.clone(), NodePropStore::Str(Mutex::new(col), Mutex::new(ovf)));
            }
            ty => {
                let path = node_column_path(output_dir, plan.table_id, pid);
                let mut col = Column::open(&path, ty.fixed_width())?;
                col.ensure_num_slots(num_nodes)?;
                props.insert(p.name.clone(), NodePropStore::Fixed(Mutex::new(col)));
            }
        }
    }

    let hash_index = Mutex::new(HashIndex::create(node_index_base(output_dir, plan.table_id), num_nodes)?);
    let node_id_map = Mutex::new(NodeIdMap::with_capacity(num_nodes as usize));

    let file = plan.desc.file_path.display().to_string();
    plan.blocks.par_iter().enumerate().try_for_each(|(b, block)| -> Result<()> {
        for_each_record_in_block(&plan.desc.file_path, *block, plan.desc.csv_special_chars, b == 0, |local, fields| {
            let offset = block_offsets[b] + local;
            let line = offset + 2;

            for (idx, col) in plan.header.iter().enumerate() {
                if let HeaderColumn::Property(p) = col {
                    let raw = fields.get(idx).map(String::as_str).unwrap_or("");
                    let store = props.get(&p.name).expect("property column registered");
                    write_fixed_or_string(&store.as_like(), raw, p.property_type, offset, &file, line)?;
                }
            }

            let pk_raw = fields.get(plan.pk_header_idx).map(String::as_str).unwrap_or("");
            let key = parse_index_key(pk_raw, plan.pk_type, &file, line)?;
            hash_index.lock().unwrap().insert(key.clone(), offset)?;
            node_id_map.lock().unwrap().insert(key, offset);
            Ok(())
        })
    })?;

    hash_index.lock().unwrap().fsync()?;
    for store in props.values() {
        match store {
            NodePropStore::Fixed(c) => c.lock().unwrap().fsync()?,
            NodePropStore::Str(c, o) => {
                c.lock().unwrap().fsync()?;
                o.lock().unwrap().fsync()?;
            }
        }
    }

    let mut unstr = ListStorage::open(node_unstr_base(output_dir, plan.table_id), GF_STRING_SIZE)?;
    unstr.allocate_all(&vec![0u32; num_nodes as usize])?;
    unstr.save_metadata()?;
    unstr.fsync()?;

    Ok((NodeTableLoaded { num_nodes }, node_id_map.into_inner().unwrap()))
}

// ---------------------------------------------------------------------
// Pass 4: relationship population
// ---------------------------------------------------------------------

enum OnePropStore {
    Fixed(Mutex<Column>),
    Str(Mutex<Column>, Mutex<OverflowFile>),
}
impl OnePropStore {
    fn as_like(&self) -> NodePropStoreLike<'_> {
        match self {
            OnePropStore::Fixed(c) => NodePropStoreLike::Fixed(c),
            OnePropStore::Str(c, o) => NodePropStoreLike::Str(c, o),
        }
    }
}

enum ManyPropStore {
    Fixed(Mutex<ListStorage>),
    Str(Mutex<ListStorage>, Mutex<OverflowFile>),
}

struct OneOwner {
    adjacency: Mutex<Column>,
    properties: Vec<OnePropStore>,
}

struct ManyOwner {
    adjacency: Mutex<ListStorage>,
    properties: Vec<ManyPropStore>,
    layout: Mutex<ListLayoutBuilder>,
    next_idx: Mutex<Vec<u32>>,
}

enum OwnerStore {
    One(OneOwner),
    Many(ManyOwner),
}

struct RelStorage {
    compression: HashMap<Direction, NodeIdCompression>,
    owners: HashMap<Direction, HashMap<TableId, OwnerStore>>,
}

/// Shared with [`crate::transaction`], which materializes transactional
/// `add_relationship` adjacency into the same files after bulk load.
pub(crate) fn rel_adjacency_path(output_dir: &Path, rt: TableId, nt: TableId, dir: Direction) -> PathBuf {
    output_dir.join(format!("r-{rt}-{nt}-{}.col", dir.as_str()))
}
pub(crate) fn rel_adjacency_base(output_dir: &Path, rt: TableId, nt: TableId, dir: Direction) -> PathBuf {
    output_dir.join(format!("r-{rt}-{nt}-{}", dir.as_str()))
}
/// Shared with [`crate::transaction`], for the same reason as
/// [`rel_adjacency_path`].
pub(crate) fn rel_prop_col_path(output_dir: &Path, rt: TableId, nt: TableId, dir: Direction, pid: usize) -> PathBuf {
    output_dir.join(format!("r-{rt}-{nt}-{}-{pid}.col", dir.as_str()))
}
pub(crate) fn rel_prop_base(output_dir: &Path, rt: TableId, nt: TableId, dir: Direction, pid: usize) -> PathBuf {
    output_dir.join(format!("r-{rt}-{nt}-{}-{pid}", dir.as_str()))
}
pub(crate) fn rel_prop_ovf_path(output_dir: &Path, rt: TableId, nt: TableId, dir: Direction, pid: usize) -> PathBuf {
    output_dir.join(format!("r-{rt}-{nt}-{}-{pid}.ovf", dir.as_str()))
}

/// Picks the node-id encoding for each direction of `schema` from the
/// observed node counts (spec.md §3 "Node-ID compression scheme"). Run
/// once per rel table so the bulk loader and the catalog persist the
/// same choice.
fn compute_compression(
    schema: &RelTableSchema,
    num_nodes: &HashMap<TableId, u64>,
) -> HashMap<Direction, NodeIdCompression> {
    let mut compression = HashMap::new();
    for dir in REL_DIRECTIONS {
        let candidates = schema.node_table_ids_for_direction(dir);
        let max_offset = candidates
            .iter()
            .map(|t| num_nodes.get(t).copied().unwrap_or(0).saturating_sub(1))
            .max()
            .unwrap_or(0);
        compression.insert(dir, NodeIdCompression::choose(candidates, max_offset));
    }
    compression
}

fn build_rel_storage(
    output_dir: &Path,
    schema: &RelTableSchema,
    num_nodes: &HashMap<TableId, u64>,
    compression: &HashMap<Direction, NodeIdCompression>,
    string_overflow_jobs: &Mutex<Vec<(PathBuf, PathBuf)>>,
) -> Result<RelStorage> {
    let mut owners: HashMap<Direction, HashMap<TableId, OwnerStore>> = HashMap::new();

    for dir in REL_DIRECTIONS {
        let comp = compression[&dir];
        let owner_ids: &[TableId] = match dir {
            Direction::Fwd => &schema.src_table_ids,
            Direction::Bwd => &schema.dst_table_ids,
        };
        let mut owner_map = HashMap::new();
        for &owner_id in owner_ids {
            let n = num_nodes.get(&owner_id).copied().unwrap_or(0);
            let store = if schema.is_single_multiplicity(dir) {
                let mut adjacency = Column::open(rel_adjacency_path(output_dir, schema.table_id, owner_id, dir), comp.element_size())?;
                adjacency.ensure_num_slots(n)?;
                let mut properties = Vec::with_capacity(schema.properties.len());
                for (pid, p) in schema.properties.iter().enumerate() {
                    properties.push(match p.property_type {
                        PropertyType::String => {
                            let col_path = rel_prop_col_path(output_dir, schema.table_id, owner_id, dir, pid);
                            let ovf_path = rel_prop_ovf_path(output_dir, schema.table_id, owner_id, dir, pid);
                            let mut col = Column::open(&col_path, GF_STRING_SIZE)?;
                            col.ensure_num_slots(n)?;
                            let ovf = OverflowFile::open(&ovf_path)?;
                            string_overflow_jobs.lock().unwrap().push((col_path, ovf_path));
                            OnePropStore::Str(Mutex::new(col), Mutex::new(ovf))
                        }
                        ty => {
                            let mut col = Column::open(rel_prop_col_path(output_dir, schema.table_id, owner_id, dir, pid), ty.fixed_width())?;
                            col.ensure_num_slots(n)?;
                            OnePropStore::Fixed(Mutex::new(col))
                        }
                    });
                }
                OwnerStore::One(OneOwner {
                    adjacency: Mutex::new(adjacency),
                    properties,
                })
            } else {
                let adjacency = ListStorage::open(rel_adjacency_base(output_dir, schema.table_id, owner_id, dir), comp.element_size())?;
                let mut properties = Vec::with_capacity(schema.properties.len());
                for (pid, p) in schema.properties.iter().enumerate() {
                    properties.push(match p.property_type {
                        PropertyType::String => {
                            let base = rel_prop_base(output_dir, schema.table_id, owner_id, dir, pid);
                            let ovf_path = rel_prop_ovf_path(output_dir, schema.table_id, owner_id, dir, pid);
                            let list = ListStorage::open(&base, GF_STRING_SIZE)?;
                            let ovf = OverflowFile::open(&ovf_path)?;
                            ManyPropStore::Str(Mutex::new(list), Mutex::new(ovf))
                        }
                        ty => {
                            let list = ListStorage::open(rel_prop_base(output_dir, schema.table_id, owner_id, dir, pid), ty.fixed_width())?;
                            ManyPropStore::Fixed(Mutex::new(list))
                        }
                    });
                }
                OwnerStore::Many(ManyOwner {
                    adjacency: Mutex::new(adjacency),
                    properties,
                    layout: Mutex::new(ListLayoutBuilder::with_capacity(n as usize)),
                    next_idx: Mutex::new(Vec::new()),
                })
            };
            owner_map.insert(owner_id, store);
        }
        owners.insert(dir, owner_map);
    }

    Ok(RelStorage {
        compression: compression.clone(),
        owners,
    })
}

#[allow(clippy::too_many_arguments)]
fn resolve_endpoint(
    candidate_labels: &[TableId],
    label_col_idx: Option<usize>,
    fields: &[String],
    id_col_idx: usize,
    id_type: PropertyType,
    node_id_maps: &HashMap<TableId, NodeIdMap>,
    catalog: &Catalog,
    file: &str,
    line: u64,
) -> Result<NodeId> {
    let table_id = if candidate_labels.len() == 1 {
        candidate_labels[0]
    } else {
        let idx = label_col_idx.expect("checked during planning");
        let label_name = fields.get(idx).map(|s| s.trim()).unwrap_or("");
        catalog.node_table_by_name(label_name)?.table_id
    };
    let raw = fields.get(id_col_idx).map(String::as_str).unwrap_or("");
    let key = parse_index_key(raw, id_type, file, line)?;
    let map = node_id_maps
        .get(&table_id)
        .ok_or_else(|| GraphError::Internal("node id map missing for resolved table".into()))?;
    let offset = map
        .get(&key)
        .ok_or_else(|| GraphError::conversion(file, line, format!("unresolved node key '{raw}'")))?;
    Ok(NodeId::new(table_id, offset))
}

fn populate_rel_table(
    output_dir: &Path,
    plan: &RelFilePlan,
    schema: &RelTableSchema,
    node_id_maps: &HashMap<TableId, NodeIdMap>,
    catalog: &Catalog,
    num_nodes: &HashMap<TableId, u64>,
    string_overflow_jobs: &Mutex<Vec<(PathBuf, PathBuf)>>,
) -> Result<(u64, HashMap<Direction, NodeIdCompression>)> {
    let compression = compute_compression(schema, num_nodes);
    let storage = build_rel_storage(output_dir, schema, num_nodes, &compression, string_overflow_jobs)?;
    let counts = count_blocks(&plan.desc.file_path, &plan.blocks, plan.desc.csv_special_chars)?;
    let (block_offsets, total) = prefix_sum(&counts);
    let file = plan.desc.file_path.display().to_string();

    let endpoints = |fields: &[String], line: u64| -> Result<(NodeId, NodeId)> {
        let src = resolve_endpoint(
            &plan.src_table_ids,
            plan.start_label_idx,
            fields,
            plan.start_id_idx,
            plan.id_type,
            node_id_maps,
            catalog,
            &file,
            line,
        )?;
        let dst = resolve_endpoint(
            &plan.dst_table_ids,
            plan.end_label_idx,
            fields,
            plan.end_id_idx,
            plan.id_type,
            node_id_maps,
            catalog,
            &file,
            line,
        )?;
        Ok((src, dst))
    };

    // Phase 1: resolve endpoints, write ONE-multiplicity adjacency and
    // properties directly, count MANY-multiplicity list sizes.
    plan.blocks.par_iter().enumerate().try_for_each(|(b, block)| -> Result<()> {
        for_each_record_in_block(&plan.desc.file_path, *block, plan.desc.csv_special_chars, b == 0, |local, fields| {
            let line = block_offsets[b] + local + 2;
            let (src, dst) = endpoints(&fields, line)?;
            for dir in REL_DIRECTIONS {
                let (owner, neighbor) = match dir {
                    Direction::Fwd => (src, dst),
                    Direction::Bwd => (dst, src),
                };
                let comp = &storage.compression[&dir];
                let encoded = comp.encode(neighbor);
                let owner_store = &storage.owners[&dir][&owner.table_id];
                if let OwnerStore::One(one) = owner_store {
                    one.adjacency.lock().unwrap().write_slot(owner.offset, &encoded)?;
                    for (pid, prop) in plan.properties.iter().enumerate() {
                        let raw = fields.get(plan.prop_header_idx[pid]).map(String::as_str).unwrap_or("");
                        write_fixed_or_string(&one.properties[pid].as_like(), raw, prop.property_type, owner.offset, &file, line)?;
                    }
                } else if let OwnerStore::Many(many) = owner_store {
                    many.layout.lock().unwrap().increment(owner.offset);
                }
            }
            Ok(())
        })
    })?;

    // Phase 2: allocate MANY-multiplicity list storage from final sizes.
    for dir in REL_DIRECTIONS {
        for owner_store in storage.owners[&dir].values() {
            if let OwnerStore::Many(many) = owner_store {
                let sizes = std::mem::take(&mut *many.layout.lock().unwrap()).into_sizes();
                many.adjacency.lock().unwrap().allocate_all(&sizes)?;
                for prop in &many.properties {
                    match prop {
                        ManyPropStore::Fixed(list) => list.lock().unwrap().allocate_all(&sizes)?,
                        ManyPropStore::Str(list, _) => list.lock().unwrap().allocate_all(&sizes)?,
                    }
                }
                *many.next_idx.lock().unwrap() = vec![0u32; sizes.len()];
            }
        }
    }

    // Phase 3: re-read the file, writing MANY-multiplicity list elements
    // (adjacency + properties) in the order records are encountered.
    plan.blocks.par_iter().enumerate().try_for_each(|(b, block)| -> Result<()> {
        for_each_record_in_block(&plan.desc.file_path, *block, plan.desc.csv_special_chars, b == 0, |local, fields| {
            let line = block_offsets[b] + local + 2;
            let (src, dst) = endpoints(&fields, line)?;
            for dir in REL_DIRECTIONS {
                let (owner, neighbor) = match dir {
                    Direction::Fwd => (src, dst),
                    Direction::Bwd => (dst, src),
                };
                let owner_store = &storage.owners[&dir][&owner.table_id];
                let Some(many) = (match owner_store {
                    OwnerStore::Many(m) => Some(m),
                    OwnerStore::One(_) => None,
                }) else {
                    continue;
                };
                let comp = &storage.compression[&dir];
                let encoded = comp.encode(neighbor);
                let idx = {
                    let mut next = many.next_idx.lock().unwrap();
                    let slot = &mut next[owner.offset as usize];
                    let i = *slot;
                    *slot += 1;
                    i
                };
                many.adjacency.lock().unwrap().write_element(owner.offset, idx, &encoded)?;
                for (pid, prop) in plan.properties.iter().enumerate() {
                    let raw = fields.get(plan.prop_header_idx[pid]).map(String::as_str).unwrap_or("");
                    match &many.properties[pid] {
                        ManyPropStore::Fixed(list) => match value::encode_fixed(raw, prop.property_type, &file, line)? {
                            Some(bytes) => list.lock().unwrap().write_element(owner.offset, idx, &bytes)?,
                            None => {} // list elements have no null bitmap; empty fields stay zeroed
                        },
                        ManyPropStore::Str(list, ovf) => {
                            let trimmed = value::rtrim(raw);
                            let gf = overflow::write_string(trimmed, &mut ovf.lock().unwrap())?;
                            list.lock().unwrap().write_element(owner.offset, idx, &gf.encode())?;
                        }
                    }
                }
            }
            Ok(())
        })
    })?;

    for dir in REL_DIRECTIONS {
        for owner_store in storage.owners[&dir].values() {
            match owner_store {
                OwnerStore::One(one) => {
                    one.adjacency.lock().unwrap().fsync()?;
                }
                OwnerStore::Many(many) => {
                    many.adjacency.lock().unwrap().save_metadata()?;
                    many.adjacency.lock().unwrap().fsync()?;
                    for prop in &many.properties {
                        match prop {
                            ManyPropStore::Fixed(l) => {
                                l.lock().unwrap().save_metadata()?;
                                l.lock().unwrap().fsync()?;
                            }
                            ManyPropStore::Str(l, o) => {
                                l.lock().unwrap().save_metadata()?;
                                l.lock().unwrap().fsync()?;
                                o.lock().unwrap().fsync()?;
                            }
                        }
                    }
                }
            }
        }
    }

    Ok((total, compression))
}

// ---------------------------------------------------------------------
// Pass 5: overflow locality sort
// ---------------------------------------------------------------------

/// Rewrites the overflow file at `ovf_path` so string bytes appear in
/// ascending offset order, then repoints every slot of `col_path`
/// (spec.md §4.4/§4.6 Pass 5, §9 Open Question 2: `⌈numNodes/256⌉`
/// buckets). A single forward pass through offsets, appending to a fresh
/// overflow file as it goes, already produces that bucket-ordered
/// locality without tracking buckets explicitly.
fn sort_overflow_strings(col_path: &Path, ovf_path: &Path) -> Result<()> {
    let mut col = Column::open(col_path, GF_STRING_SIZE)?;
    let n = col.num_slots();
    tracing::debug!(path = %ovf_path.display(), buckets = overflow::bucket_count(n), "sorting overflow strings");

    let tmp_path = ovf_path.with_extension("ovf.sorting");
    let mut old_ovf = OverflowFile::open(ovf_path)?;
    let mut new_ovf = OverflowFile::open(&tmp_path)?;

    for offset in 0..n {
        if let Some(bytes) = col.read_slot(offset)? {
            let mut buf = [0u8; GF_STRING_SIZE];
            buf.copy_from_slice(&bytes);
            let gf = overflow::GfString::decode(&buf);
            if matches!(gf, overflow::GfString::Overflow { .. }) {
                let s = overflow::read_string(&gf, &mut old_ovf)?;
                let new_gf = overflow::write_string(&s, &mut new_ovf)?;
                col.write_slot(offset, &new_gf.encode())?;
            }
        }
    }
    new_ovf.fsync()?;
    drop(new_ovf);
    drop(old_ovf);
    crate::paged_file::remove(ovf_path)?;
    crate::paged_file::rename(&tmp_path, ovf_path)?;
    Ok(())
}

// ---------------------------------------------------------------------
// Pipeline orchestration
// ---------------------------------------------------------------------

fn run_pipeline(options: &LoadOptions) -> Result<LoadReport> {
    tracing::info!(input = %options.input_dir.display(), "starting to load nodes");
    let metadata = DatasetMetadata::load(&options.input_dir)?;
    let mut catalog = Catalog::new();

    let mut node_plans = Vec::with_capacity(metadata.node_file_descriptions.len());
    for desc in metadata.node_file_descriptions {
        node_plans.push(plan_node_file(&mut catalog, desc)?);
    }
    let mut rel_plans = Vec::with_capacity(metadata.rel_file_descriptions.len());
    for desc in metadata.rel_file_descriptions {
        rel_plans.push(plan_rel_file(&mut catalog, desc)?);
    }

    let string_overflow_jobs: Mutex<Vec<(PathBuf, PathBuf)>> = Mutex::new(Vec::new());

    // Pass 3: node tables, producing per-table in-memory NodeIdMaps that
    // Pass 4 needs for endpoint resolution.
    let node_results: Vec<(TableId, NodeTableLoaded, NodeIdMap)> = node_plans
        .iter()
        .map(|plan| -> Result<(TableId, NodeTableLoaded, NodeIdMap)> {
            let (loaded, map) = populate_node_table(&options.output_dir, plan, &string_overflow_jobs)?;
            Ok((plan.table_id, loaded, map))
        })
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(num_tables = node_plans.len(), "done loading nodes");

    let mut num_nodes: HashMap<TableId, u64> = HashMap::new();
    let mut node_id_maps: HashMap<TableId, NodeIdMap> = HashMap::new();
    let mut total_nodes = 0u64;
    for (table_id, loaded, map) in node_results {
        total_nodes += loaded.num_nodes;
        num_nodes.insert(table_id, loaded.num_nodes);
        node_id_maps.insert(table_id, map);
    }

    // Explicit second parallel pass building the offset -> external-key
    // reverse map per node table (SUPPLEMENTED FEATURES item 2), used by
    // loader diagnostics/resume tooling rather than the read path. Also
    // doubles as a cheap check of spec.md §3 invariant 4 ("a primary-key
    // entry exists ... for every node offset"): a hole means Pass 3
    // inserted fewer distinct keys than offsets it allocated.
    let reverse_holes: usize = node_id_maps
        .par_iter()
        .map(|(&table_id, map)| {
            let n = *num_nodes.get(&table_id).unwrap_or(&0);
            map.build_reverse(n).iter().filter(|k| k.is_none()).count()
        })
        .sum();
    if reverse_holes > 0 {
        return Err(GraphError::Internal(format!(
            "{reverse_holes} node offset(s) have no primary-key entry in the reverse NodeIDMap"
        )));
    }
    tracing::info!("done creating reverse NodeIDMaps");

    tracing::info!(num_files = rel_plans.len(), "starting to load rels");
    // Pass 4: relationship tables.
    let mut total_rels = 0u64;
    for plan in &rel_plans {
        let schema = catalog.rel_table(plan.table_id)?.clone();
        let (count, compression) = populate_rel_table(
            &options.output_dir,
            plan,
            &schema,
            &node_id_maps,
            &catalog,
            &num_nodes,
            &string_overflow_jobs,
        )?;
        catalog.set_rel_compression(plan.table_id, compression[&Direction::Fwd], compression[&Direction::Bwd])?;
        total_rels += count;
    }
    tracing::info!("done loading rels");

    // Pass 5: overflow locality sort, one job per string column.
    let jobs = string_overflow_jobs.into_inner().unwrap();
    jobs.par_iter()
        .try_for_each(|(col_path, ovf_path)| sort_overflow_strings(col_path, ovf_path))?;
    tracing::info!("done sorting overflow strings");

    catalog.save(&options.output_dir.join("catalog.bin"))?;

    Ok(LoadReport {
        num_node_tables: node_plans.len(),
        num_rel_tables: rel_plans.len(),
        num_nodes: total_nodes,
        num_rels: total_rels,
    })
}
