//! In-memory Updates Store (spec.md §2 "the in-memory Updates Store (C7
//! helper)"). Buffers added relationships and property overwrites for the
//! active transaction until checkpoint, at which point the replayer
//! (`wal::Wal::checkpoint`) materializes them into canonical files.

use std::collections::HashMap;

use crate::types::{NodeId, PropertyValue, TableId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub table_id: TableId,
    pub offset: u64,
    pub property_index: usize,
}

#[derive(Debug, Clone)]
pub struct AddedRelationship {
    pub rel_table_id: TableId,
    pub src: NodeId,
    pub dst: NodeId,
    pub properties: Vec<PropertyValue>,
}

/// Owned by the active transaction; moved into the replayer at commit
/// (spec.md §9 "Updates Store entries are owned by the transaction and
/// moved into the replayer at commit").
#[derive(Debug, Default)]
pub struct UpdatesStore {
    property_overwrites: HashMap<PropertyKey, PropertyValue>,
    added_relationships: Vec<AddedRelationship>,
}

impl UpdatesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_property(&mut self, key: PropertyKey, value: PropertyValue) {
        self.property_overwrites.insert(key, value);
    }

    pub fn add_relationship(&mut self, rel: AddedRelationship) {
        self.added_relationships.push(rel);
    }

    pub fn property_overwrites(&self) -> impl Iterator<Item = (&PropertyKey, &PropertyValue)> {
        self.property_overwrites.iter()
    }

    pub fn added_relationships(&self) -> &[AddedRelationship] {
        &self.added_relationships
    }

    pub fn is_empty(&self) -> bool {
        self.property_overwrites.is_empty() && self.added_relationships.is_empty()
    }

    pub fn clear(&mut self) {
        self.property_overwrites.clear();
        self.added_relationships.clear();
    }
}
