//! In-memory external-key -> internal-offset map (spec.md §4.6 Pass 3 /
//! Pass 4: "a per-table NodeIDMap is populated mapping external key ->
//! internal offset"). Populated during node population (Pass 3),
//! consumed during relationship endpoint resolution (Pass 4).
//!
//! Distinct from [`crate::index::hash_index::HashIndex`], which is the
//! on-disk primary-key structure queried at run time; this map only
//! exists for the lifetime of a single bulk load.

use std::collections::HashMap;

use crate::index::hash_index::IndexKey;

#[derive(Debug, Default)]
pub struct NodeIdMap {
    entries: HashMap<IndexKey, u64>,
}

impl NodeIdMap {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(n),
        }
    }

    pub fn insert(&mut self, key: IndexKey, offset: u64) {
        self.entries.insert(key, offset);
    }

    pub fn get(&self, key: &IndexKey) -> Option<u64> {
        self.entries.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, &u64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the offset -> external-key reverse mapping in one pass
    /// (SPEC_FULL.md SUPPLEMENTED FEATURES item 2: a second, explicit
    /// parallel pass after node population, matching
    /// `GraphLoader::loadGraph`'s loop building reverse `nodeIDMaps`).
    /// Used only by loader diagnostics/resume tooling, never by the
    /// read path, so a dense `Vec` indexed by offset is sufficient.
    pub fn build_reverse(&self, num_nodes: u64) -> Vec<Option<IndexKey>> {
        let mut reverse = vec![None; num_nodes as usize];
        for (key, &offset) in &self.entries {
            reverse[offset as usize] = Some(key.clone());
        }
        reverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut map = NodeIdMap::with_capacity(4);
        map.insert(IndexKey::Int64(7), 3);
        map.insert(IndexKey::Str("alice".into()), 9);
        assert_eq!(map.get(&IndexKey::Int64(7)), Some(3));
        assert_eq!(map.get(&IndexKey::Str("alice".into())), Some(9));
        assert_eq!(map.get(&IndexKey::Int64(8)), None);
    }
}
