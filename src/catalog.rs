//! C3 — Catalog: node/rel table schemas, and the read-only / write-ahead
//! catalog pair used by the transaction manager (spec.md §4.3).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::loader::compression::NodeIdCompression;
use crate::types::{Multiplicity, PropertyType, TableId};

/// An ordered, named, typed property — the schema unit shared by node and
/// rel tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub property_type: PropertyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTableSchema {
    pub table_id: TableId,
    pub name: String,
    pub properties: Vec<PropertySchema>,
    /// Index into `properties` of the declared primary key column, if any.
    pub primary_key: Option<usize>,
}

/// A rel table's per-direction endpoint set and multiplicity
/// (spec.md §3: "Every relationship is stored once per direction").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelTableSchema {
    pub table_id: TableId,
    pub name: String,
    pub properties: Vec<PropertySchema>,
    pub src_table_ids: Vec<TableId>,
    pub dst_table_ids: Vec<TableId>,
    pub fwd_multiplicity: Multiplicity,
    pub bwd_multiplicity: Multiplicity,
    /// The node-id encoding the loader chose per direction (spec.md §3
    /// "Node-ID compression scheme"). Defaulted at registration time and
    /// overwritten with the real choice once Pass 4 has counted node
    /// tables (`Catalog::set_rel_compression`); a transactional
    /// `add_relationship` reads it back to encode a neighbor the same way.
    #[serde(default)]
    pub fwd_compression: NodeIdCompression,
    #[serde(default)]
    pub bwd_compression: NodeIdCompression,
}

impl RelTableSchema {
    pub fn multiplicity(&self, dir: crate::types::Direction) -> Multiplicity {
        match dir {
            crate::types::Direction::Fwd => self.fwd_multiplicity,
            crate::types::Direction::Bwd => self.bwd_multiplicity,
        }
    }

    pub fn compression(&self, dir: crate::types::Direction) -> NodeIdCompression {
        match dir {
            crate::types::Direction::Fwd => self.fwd_compression,
            crate::types::Direction::Bwd => self.bwd_compression,
        }
    }

    pub fn is_single_multiplicity(&self, dir: crate::types::Direction) -> bool {
        matches!(self.multiplicity(dir), Multiplicity::One)
    }

    /// The node-table ids a rel of this type can land on, on the given
    /// direction's "far" endpoint.
    pub fn node_table_ids_for_direction(&self, dir: crate::types::Direction) -> &[TableId] {
        match dir {
            crate::types::Direction::Fwd => &self.dst_table_ids,
            crate::types::Direction::Bwd => &self.src_table_ids,
        }
    }
}

/// The catalog: all node/rel table schemas, keyed by table id and by name.
///
/// A `Catalog` is cloned cheaply (via [`Catalog::fork`]) into a write-ahead
/// copy at the start of a DDL-bearing transaction; on commit the write-ahead
/// copy replaces the read-only one atomically, on rollback it's discarded
/// (spec.md §5 concurrency model).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    node_tables: HashMap<TableId, NodeTableSchema>,
    rel_tables: HashMap<TableId, RelTableSchema>,
    node_name_index: HashMap<String, TableId>,
    rel_name_index: HashMap<String, TableId>,
    next_table_id: TableId,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn add_node_table(
        &mut self,
        name: impl Into<String>,
        properties: Vec<PropertySchema>,
        primary_key: Option<usize>,
    ) -> Result<TableId> {
        let name = name.into();
        if self.node_name_index.contains_key(&name) || self.rel_name_index.contains_key(&name) {
            return Err(GraphError::Catalog(format!(
                "table name '{name}' already exists"
            )));
        }
        let table_id = self.next_table_id;
        self.next_table_id += 1;
        self.node_name_index.insert(name.clone(), table_id);
        self.node_tables.insert(
            table_id,
            NodeTableSchema {
                table_id,
                name,
                properties,
                primary_key,
            },
        );
        Ok(table_id)
    }

    pub fn add_rel_table(
        &mut self,
        name: impl Into<String>,
        properties: Vec<PropertySchema>,
        src_table_ids: Vec<TableId>,
        dst_table_ids: Vec<TableId>,
        fwd_multiplicity: Multiplicity,
        bwd_multiplicity: Multiplicity,
    ) -> Result<TableId> {
        let name = name.into();
        if self.node_name_index.contains_key(&name) || self.rel_name_index.contains_key(&name) {
            return Err(GraphError::Catalog(format!(
                "table name '{name}' already exists"
            )));
        }
        for tid in src_table_ids.iter().chain(dst_table_ids.iter()) {
            if !self.node_tables.contains_key(tid) {
                return Err(GraphError::Catalog(format!(
                    "rel table '{name}' references unknown node table id {tid}"
                )));
            }
        }
        let table_id = self.next_table_id;
        self.next_table_id += 1;
        self.rel_name_index.insert(name.clone(), table_id);
        self.rel_tables.insert(
            table_id,
            RelTableSchema {
                table_id,
                name,
                properties,
                src_table_ids,
                dst_table_ids,
                fwd_multiplicity,
                bwd_multiplicity,
                fwd_compression: NodeIdCompression::default(),
                bwd_compression: NodeIdCompression::default(),
            },
        );
        Ok(table_id)
    }

    /// Records the node-id compression the loader computed for each
    /// direction of a rel table, once node counts are known (spec.md §3;
    /// called from `loader::mod::run_pipeline` before `Catalog::save`).
    pub fn set_rel_compression(
        &mut self,
        table_id: TableId,
        fwd: NodeIdCompression,
        bwd: NodeIdCompression,
    ) -> Result<()> {
        let schema = self
            .rel_tables
            .get_mut(&table_id)
            .ok_or(GraphError::NotFound("rel table"))?;
        schema.fwd_compression = fwd;
        schema.bwd_compression = bwd;
        Ok(())
    }

    pub fn node_table(&self, table_id: TableId) -> Result<&NodeTableSchema> {
        self.node_tables
            .get(&table_id)
            .ok_or(GraphError::NotFound("node table"))
    }

    pub fn rel_table(&self, table_id: TableId) -> Result<&RelTableSchema> {
        self.rel_tables
            .get(&table_id)
            .ok_or(GraphError::NotFound("rel table"))
    }

    pub fn node_table_by_name(&self, name: &str) -> Result<&NodeTableSchema> {
        let id = self
            .node_name_index
            .get(name)
            .ok_or(GraphError::NotFound("node table"))?;
        self.node_table(*id)
    }

    pub fn rel_table_by_name(&self, name: &str) -> Result<&RelTableSchema> {
        let id = self
            .rel_name_index
            .get(name)
            .ok_or(GraphError::NotFound("rel table"))?;
        self.rel_table(*id)
    }

    pub fn node_tables(&self) -> impl Iterator<Item = &NodeTableSchema> {
        self.node_tables.values()
    }

    pub fn rel_tables(&self) -> impl Iterator<Item = &RelTableSchema> {
        self.rel_tables.values()
    }

    pub fn get_structured_properties(&self, table_id: TableId) -> Result<&[PropertySchema]> {
        if let Ok(t) = self.node_table(table_id) {
            return Ok(&t.properties);
        }
        self.rel_table(table_id).map(|t| t.properties.as_slice())
    }

    pub fn get_node_table_ids_for_rel_direction(
        &self,
        rel_table_id: TableId,
        dir: crate::types::Direction,
    ) -> Result<Vec<TableId>> {
        Ok(self
            .rel_table(rel_table_id)?
            .node_table_ids_for_direction(dir)
            .to_vec())
    }

    pub fn is_single_multiplicity(
        &self,
        rel_table_id: TableId,
        dir: crate::types::Direction,
    ) -> Result<bool> {
        Ok(self.rel_table(rel_table_id)?.is_single_multiplicity(dir))
    }

    /// Serializes the catalog to `catalog.bin` (spec.md directory layout)
    /// using `bincode`, a compact binary format well suited to a structure
    /// that's rewritten on every transaction commit.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| GraphError::Serialization(e.to_string()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        bincode::deserialize(&bytes).map_err(|e| GraphError::Serialization(e.to_string()))
    }
}
