//! The single writer transaction: buffered property overwrites and added
//! relationships are materialized at commit, just before the catalog
//! image is logged and checkpointed (spec.md §4.7, §9).
//!
//! A rel table's adjacency column/list lives under the same file names
//! the bulk loader writes (`crate::loader::rel_adjacency_path` /
//! `rel_adjacency_base`), encoded with the same
//! [`crate::loader::compression::NodeIdCompression`] the loader chose and
//! persisted on [`crate::catalog::RelTableSchema`] — a transactional
//! `add_relationship` reads that choice back rather than recomputing it,
//! so a neighbor id added after bulk load is indistinguishable on disk
//! from one the loader wrote.
//!
//! Every `Column` page this module writes — node/rel property slots and
//! ONE-multiplicity adjacency — is routed through `wal.write_page`
//! (`Column::write_slot_wal`/`set_null_wal`) rather than written straight
//! to the canonical file, so a crash between the write and the
//! transaction's `COMMIT` record is resolved by replay (spec.md §4.7).
//! MANY-multiplicity adjacency/property lists (`ListStorage`) and string
//! overflow (`OverflowFile`) are still written directly and fsynced
//! immediately; see DESIGN.md for why those two are scoped out.

use crate::catalog::Catalog;
use crate::db::GraphDb;
use crate::error::{GraphError, Result};
use crate::loader::{
    node_column_path, node_overflow_path, rel_adjacency_base, rel_adjacency_path, rel_prop_base,
    rel_prop_col_path, rel_prop_ovf_path,
};
use crate::storage::column::Column;
use crate::storage::list::ListStorage;
use crate::storage::overflow::{self, OverflowFile, GF_STRING_SIZE};
use crate::types::{Direction, NodeId, PropertyType, PropertyValue, TableId};
use crate::updates_store::{AddedRelationship, PropertyKey, UpdatesStore};
use crate::wal::Wal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

pub struct Transaction<'a> {
    db: &'a GraphDb,
    write_ahead_catalog: Catalog,
    store: UpdatesStore,
    state: TxState,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(db: &'a GraphDb) -> Result<Self> {
        let write_ahead_catalog = db.catalog_snapshot();
        db.wal().lock().unwrap().begin();
        Ok(Self {
            db,
            write_ahead_catalog,
            store: UpdatesStore::new(),
            state: TxState::Active,
        })
    }

    fn require_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(GraphError::Internal("transaction is no longer active".into()));
        }
        Ok(())
    }

    /// Schema mutations observe only this transaction's write-ahead
    /// catalog until commit (spec.md §4.3).
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.write_ahead_catalog
    }

    pub fn set_property(
        &mut self,
        table_id: TableId,
        offset: u64,
        property_index: usize,
        value: PropertyValue,
    ) -> Result<()> {
        self.require_active()?;
        self.store.set_property(
            PropertyKey {
                table_id,
                offset,
                property_index,
            },
            value,
        );
        Ok(())
    }

    pub fn add_relationship(
        &mut self,
        rel_table_id: TableId,
        src: NodeId,
        dst: NodeId,
        properties: Vec<PropertyValue>,
    ) -> Result<()> {
        self.require_active()?;
        self.store.add_relationship(AddedRelationship {
            rel_table_id,
            src,
            dst,
            properties,
        });
        Ok(())
    }

    /// Commits the WAL record for this transaction's catalog image and
    /// buffered writes, then runs checkpoint: waits (bounded) for
    /// existing readers to drain, replays, and truncates the WAL
    /// (spec.md §4.7, §5, §8 scenarios S4-S6).
    pub fn commit(mut self) -> Result<()> {
        self.require_active()?;

        {
            let mut wal = self.db.wal().lock().unwrap();
            for (key, value) in self.store.property_overwrites() {
                apply_property_overwrite(self.db.dir(), &self.write_ahead_catalog, key, value, &mut wal)?;
            }
            for rel in self.store.added_relationships() {
                materialize_added_relationship(self.db.dir(), &self.write_ahead_catalog, rel, &mut wal)?;
            }

            let catalog_bytes = bincode::serialize(&self.write_ahead_catalog)
                .map_err(|e| GraphError::Serialization(e.to_string()))?;
            wal.log_catalog_update(catalog_bytes)?;
            wal.commit()?;
        }

        self.db.wait_for_readers_to_drain()?;

        {
            let mut wal = self.db.wal().lock().unwrap();
            wal.checkpoint()?;
        }

        *self.db.catalog_lock().write().unwrap() = self.write_ahead_catalog.clone();
        self.store.clear();
        self.state = TxState::Committed;
        Ok(())
    }

    /// Discards shadow files and the buffered updates store; the
    /// read-only catalog is untouched (spec.md §4.7 "Rollback", §8 S4).
    pub fn rollback(mut self) -> Result<()> {
        self.require_active()?;
        self.db.wal().lock().unwrap().rollback()?;
        self.store.clear();
        self.state = TxState::RolledBack;
        Ok(())
    }

    pub fn state(&self) -> TxState {
        self.state
    }
}

/// Writes one buffered property overwrite into its canonical node column
/// file, growing the column if needed and routing the slot write through
/// `wal` (spec.md §4.7) — the same single-writer assumption the bulk
/// loader relies on, just one slot at a time instead of in bulk.
fn apply_property_overwrite(
    dir: &std::path::Path,
    catalog: &Catalog,
    key: &PropertyKey,
    value: &PropertyValue,
    wal: &mut Wal,
) -> Result<()> {
    let table = catalog.node_table(key.table_id)?;
    let prop = table.properties.get(key.property_index).ok_or_else(|| {
        GraphError::Internal(format!(
            "property index {} out of range for table {}",
            key.property_index, key.table_id
        ))
    })?;

    if prop.property_type == PropertyType::String {
        let mut col = Column::open(node_column_path(dir, key.table_id, key.property_index), GF_STRING_SIZE)?;
        col.ensure_num_slots(key.offset + 1)?;
        match value {
            PropertyValue::Null => col.set_null_wal(key.offset, true, wal)?,
            PropertyValue::String(s) => {
                let mut ovf = OverflowFile::open(node_overflow_path(dir, key.table_id, key.property_index))?;
                let gf = overflow::write_string(s, &mut ovf)?;
                col.write_slot_wal(key.offset, &gf.encode(), wal)?;
                ovf.fsync()?;
            }
            other => return Err(mismatch_err(other, prop.property_type)),
        }
        return Ok(());
    }

    let mut col = Column::open(
        node_column_path(dir, key.table_id, key.property_index),
        prop.property_type.fixed_width(),
    )?;
    col.ensure_num_slots(key.offset + 1)?;
    match value {
        PropertyValue::Null => col.set_null_wal(key.offset, true, wal)?,
        other => col.write_slot_wal(key.offset, &encode_fixed_value(other, prop.property_type)?, wal)?,
    }
    Ok(())
}

/// Materializes one buffered `add_relationship` into both directions'
/// adjacency (and, if any were supplied, properties) — the same file
/// layout and per-direction encoding [`crate::loader::populate_rel_table`]
/// writes at bulk-load time (spec.md §2, §4.7). ONE-multiplicity
/// adjacency/properties are `Column` slots, routed through `wal`; MANY-
/// multiplicity ones are `ListStorage` appends, written directly and
/// fsynced (see DESIGN.md).
fn materialize_added_relationship(
    dir: &std::path::Path,
    catalog: &Catalog,
    rel: &AddedRelationship,
    wal: &mut Wal,
) -> Result<()> {
    let schema = catalog.rel_table(rel.rel_table_id)?;
    for dir_kind in [Direction::Fwd, Direction::Bwd] {
        let (owner, neighbor) = match dir_kind {
            Direction::Fwd => (rel.src, rel.dst),
            Direction::Bwd => (rel.dst, rel.src),
        };
        let comp = schema.compression(dir_kind);
        let encoded = comp.encode(neighbor);

        if schema.is_single_multiplicity(dir_kind) {
            let mut adjacency = Column::open(
                rel_adjacency_path(dir, rel.rel_table_id, owner.table_id, dir_kind),
                comp.element_size(),
            )?;
            adjacency.ensure_num_slots(owner.offset + 1)?;
            adjacency.write_slot_wal(owner.offset, &encoded, wal)?;

            for (pid, prop) in schema.properties.iter().enumerate() {
                let value = rel.properties.get(pid).cloned().unwrap_or(PropertyValue::Null);
                apply_one_rel_property(dir, rel.rel_table_id, owner.table_id, dir_kind, pid, prop.property_type, owner.offset, &value, wal)?;
            }
        } else {
            let mut adjacency = ListStorage::open(
                rel_adjacency_base(dir, rel.rel_table_id, owner.table_id, dir_kind),
                comp.element_size(),
            )?;
            adjacency.append_element(owner.offset, &encoded)?;
            adjacency.save_metadata()?;
            adjacency.fsync()?;

            for (pid, prop) in schema.properties.iter().enumerate() {
                let value = rel.properties.get(pid).cloned().unwrap_or(PropertyValue::Null);
                apply_many_rel_property(dir, rel.rel_table_id, owner.table_id, dir_kind, pid, prop.property_type, owner.offset, &value)?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_one_rel_property(
    output_dir: &std::path::Path,
    rt: TableId,
    nt: TableId,
    dir_kind: Direction,
    pid: usize,
    ty: PropertyType,
    offset: u64,
    value: &PropertyValue,
    wal: &mut Wal,
) -> Result<()> {
    if ty == PropertyType::String {
        let mut col = Column::open(rel_prop_col_path(output_dir, rt, nt, dir_kind, pid), GF_STRING_SIZE)?;
        col.ensure_num_slots(offset + 1)?;
        match value {
            PropertyValue::Null => col.set_null_wal(offset, true, wal)?,
            PropertyValue::String(s) => {
                let mut ovf = OverflowFile::open(rel_prop_ovf_path(output_dir, rt, nt, dir_kind, pid))?;
                let gf = overflow::write_string(s, &mut ovf)?;
                col.write_slot_wal(offset, &gf.encode(), wal)?;
                ovf.fsync()?;
            }
            other => return Err(mismatch_err(other, ty)),
        }
        return Ok(());
    }

    let mut col = Column::open(rel_prop_col_path(output_dir, rt, nt, dir_kind, pid), ty.fixed_width())?;
    col.ensure_num_slots(offset + 1)?;
    match value {
        PropertyValue::Null => col.set_null_wal(offset, true, wal)?,
        other => col.write_slot_wal(offset, &encode_fixed_value(other, ty)?, wal)?,
    }
    Ok(())
}

/// MANY-multiplicity counterpart to [`apply_one_rel_property`]. List
/// elements carry no null bitmap (same as the loader's Pass 4 phase 3):
/// a null value is stored as a zeroed slot.
#[allow(clippy::too_many_arguments)]
fn apply_many_rel_property(
    output_dir: &std::path::Path,
    rt: TableId,
    nt: TableId,
    dir_kind: Direction,
    pid: usize,
    ty: PropertyType,
    offset: u64,
    value: &PropertyValue,
) -> Result<()> {
    if ty == PropertyType::String {
        let mut list = ListStorage::open(rel_prop_base(output_dir, rt, nt, dir_kind, pid), GF_STRING_SIZE)?;
        let mut ovf = OverflowFile::open(rel_prop_ovf_path(output_dir, rt, nt, dir_kind, pid))?;
        let s = match value {
            PropertyValue::Null => "",
            PropertyValue::String(s) => s.as_str(),
            other => return Err(mismatch_err(other, ty)),
        };
        let gf = overflow::write_string(s, &mut ovf)?;
        list.append_element(offset, &gf.encode())?;
        list.save_metadata()?;
        list.fsync()?;
        ovf.fsync()?;
        return Ok(());
    }

    let mut list = ListStorage::open(rel_prop_base(output_dir, rt, nt, dir_kind, pid), ty.fixed_width())?;
    let bytes = match value {
        PropertyValue::Null => vec![0u8; ty.fixed_width()],
        other => encode_fixed_value(other, ty)?,
    };
    list.append_element(offset, &bytes)?;
    list.save_metadata()?;
    list.fsync()
}

fn mismatch_err(value: &PropertyValue, ty: PropertyType) -> GraphError {
    GraphError::Internal(format!("property value {value:?} does not match column type {ty:?}"))
}

/// Mirrors `loader::value::encode_fixed`'s byte layout, for an already
/// typed [`PropertyValue`] instead of a raw CSV token.
fn encode_fixed_value(value: &PropertyValue, ty: PropertyType) -> Result<Vec<u8>> {
    Ok(match (value, ty) {
        (PropertyValue::Int64(v), PropertyType::Int64) => v.to_le_bytes().to_vec(),
        (PropertyValue::Double(v), PropertyType::Double) => v.to_le_bytes().to_vec(),
        (PropertyValue::Bool(v), PropertyType::Bool) => vec![*v as u8],
        (PropertyValue::Date(v), PropertyType::Date) => v.to_le_bytes().to_vec(),
        (PropertyValue::Timestamp(v), PropertyType::Timestamp) => v.to_le_bytes().to_vec(),
        (PropertyValue::Interval { months, days, micros }, PropertyType::Interval) => {
            let mut buf = Vec::with_capacity(16);
            buf.extend_from_slice(&months.to_le_bytes());
            buf.extend_from_slice(&days.to_le_bytes());
            buf.extend_from_slice(&micros.to_le_bytes());
            buf
        }
        (other, ty) => return Err(mismatch_err(other, ty)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::db::GraphDb;

    #[test]
    fn commit_persists_catalog_changes() {
        let dir = tempfile::tempdir().unwrap();
        let db = GraphDb::open(dir.path(), EngineOptions::default()).unwrap();

        let mut tx = db.begin_write().unwrap();
        tx.catalog_mut().add_node_table("Person", vec![], None).unwrap();
        tx.commit().unwrap();

        assert_eq!(db.catalog_snapshot().node_tables().count(), 1);
    }

    #[test]
    fn rollback_leaves_catalog_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let db = GraphDb::open(dir.path(), EngineOptions::default()).unwrap();

        let mut tx = db.begin_write().unwrap();
        tx.catalog_mut().add_node_table("Person", vec![], None).unwrap();
        tx.rollback().unwrap();

        assert_eq!(db.catalog_snapshot().node_tables().count(), 0);
    }

    #[test]
    fn set_property_materializes_into_node_column() {
        use crate::catalog::PropertySchema;
        use crate::storage::column::Column;
        use crate::types::PropertyType;

        let dir = tempfile::tempdir().unwrap();
        let db = GraphDb::open(dir.path(), EngineOptions::default()).unwrap();

        let mut setup = db.begin_write().unwrap();
        let table_id = setup
            .catalog_mut()
            .add_node_table(
                "Person",
                vec![PropertySchema {
                    name: "age".into(),
                    property_type: PropertyType::Int64,
                }],
                None,
            )
            .unwrap();
        setup.commit().unwrap();

        let mut tx = db.begin_write().unwrap();
        tx.set_property(table_id, 0, 0, PropertyValue::Int64(30)).unwrap();
        tx.commit().unwrap();

        let mut col = Column::open(dir.path().join(format!("n-{table_id}-0.col")), 8).unwrap();
        let bytes = col.read_slot(0).unwrap().unwrap();
        assert_eq!(i64::from_le_bytes(bytes.try_into().unwrap()), 30);
    }

    #[test]
    fn add_relationship_materializes_one_multiplicity_adjacency_and_property() {
        use crate::catalog::PropertySchema;
        use crate::storage::column::Column;
        use crate::types::{Direction, Multiplicity, PropertyType};

        let dir = tempfile::tempdir().unwrap();
        let db = GraphDb::open(dir.path(), EngineOptions::default()).unwrap();

        let mut setup = db.begin_write().unwrap();
        let person = setup.catalog_mut().add_node_table("Person", vec![], None).unwrap();
        let knows = setup
            .catalog_mut()
            .add_rel_table(
                "Knows",
                vec![PropertySchema {
                    name: "since".into(),
                    property_type: PropertyType::Int64,
                }],
                vec![person],
                vec![person],
                Multiplicity::One,
                Multiplicity::One,
            )
            .unwrap();
        setup.commit().unwrap();

        let mut tx = db.begin_write().unwrap();
        tx.add_relationship(knows, NodeId::new(person, 0), NodeId::new(person, 1), vec![PropertyValue::Int64(2020)])
            .unwrap();
        tx.commit().unwrap();

        let catalog = db.catalog_snapshot();
        let schema = catalog.rel_table(knows).unwrap();
        let comp = schema.compression(Direction::Fwd);

        let mut adjacency = Column::open(
            crate::loader::rel_adjacency_path(dir.path(), knows, person, Direction::Fwd),
            comp.element_size(),
        )
        .unwrap();
        let encoded = adjacency.read_slot(0).unwrap().unwrap();
        assert_eq!(comp.decode(&encoded, Some(person)), NodeId::new(person, 1));

        let mut prop_col = Column::open(
            crate::loader::rel_prop_col_path(dir.path(), knows, person, Direction::Fwd, 0),
            8,
        )
        .unwrap();
        let bytes = prop_col.read_slot(0).unwrap().unwrap();
        assert_eq!(i64::from_le_bytes(bytes.try_into().unwrap()), 2020);
    }

    #[test]
    fn add_relationship_materializes_many_multiplicity_adjacency() {
        use crate::storage::list::ListStorage;
        use crate::types::{Direction, Multiplicity};

        let dir = tempfile::tempdir().unwrap();
        let db = GraphDb::open(dir.path(), EngineOptions::default()).unwrap();

        let mut setup = db.begin_write().unwrap();
        let person = setup.catalog_mut().add_node_table("Person", vec![], None).unwrap();
        let knows = setup
            .catalog_mut()
            .add_rel_table("Knows", vec![], vec![person], vec![person], Multiplicity::Many, Multiplicity::Many)
            .unwrap();
        setup.commit().unwrap();

        let mut tx = db.begin_write().unwrap();
        tx.add_relationship(knows, NodeId::new(person, 0), NodeId::new(person, 1), vec![]).unwrap();
        tx.add_relationship(knows, NodeId::new(person, 0), NodeId::new(person, 2), vec![]).unwrap();
        tx.commit().unwrap();

        let catalog = db.catalog_snapshot();
        let schema = catalog.rel_table(knows).unwrap();
        let comp = schema.compression(Direction::Fwd);

        let mut adjacency = ListStorage::open(
            crate::loader::rel_adjacency_base(dir.path(), knows, person, Direction::Fwd),
            comp.element_size(),
        )
        .unwrap();
        let list = adjacency.read_list(0).unwrap();
        assert_eq!(list.len(), 2);
        let neighbors: Vec<NodeId> = list.iter().map(|b| comp.decode(b, Some(person))).collect();
        assert!(neighbors.contains(&NodeId::new(person, 1)));
        assert!(neighbors.contains(&NodeId::new(person, 2)));
    }
}
