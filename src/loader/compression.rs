//! Node-id compression scheme (spec.md §3 "Node-ID compression scheme"):
//! per `(relTable, direction)` the loader picks the smallest encoding
//! that fits the observed neighbor node id.

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, TableId};

/// Persisted on [`crate::catalog::RelTableSchema`] once the loader has
/// computed it for a `(relTable, direction)`, so a transactional
/// `add_relationship` can encode a neighbor id the same way bulk load did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdCompression {
    pub bytes_for_label: usize,
    pub bytes_for_offset: usize,
}

/// Placeholder used before the loader has counted node tables (catalog
/// registration happens during planning, ahead of Pass 3); always
/// overwritten by [`crate::catalog::Catalog::set_rel_compression`] before
/// the catalog is saved.
impl Default for NodeIdCompression {
    fn default() -> Self {
        Self {
            bytes_for_label: 0,
            bytes_for_offset: 8,
        }
    }
}

impl NodeIdCompression {
    /// `candidate_labels` is the full set of node tables a neighbor on
    /// this side can land on; `max_offset` is the largest offset any of
    /// those tables can produce. `bytesForLabel` is 0 when only one
    /// candidate label exists (nothing to disambiguate).
    pub fn choose(candidate_labels: &[TableId], max_offset: u64) -> Self {
        let bytes_for_label = match candidate_labels.len() {
            0 | 1 => 0,
            2..=256 => 1,
            _ => 2,
        };
        let bytes_for_offset = bytes_needed(max_offset).clamp(1, 6);
        Self {
            bytes_for_label,
            bytes_for_offset,
        }
    }

    pub fn element_size(&self) -> usize {
        self.bytes_for_label + self.bytes_for_offset
    }

    pub fn encode(&self, id: NodeId) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.element_size());
        if self.bytes_for_label > 0 {
            buf.extend_from_slice(&id.table_id.to_le_bytes()[..self.bytes_for_label]);
        }
        buf.extend_from_slice(&id.offset.to_le_bytes()[..self.bytes_for_offset]);
        buf
    }

    /// `fixed_label` must be supplied when `bytes_for_label == 0` (the
    /// single-candidate-label case), since the bytes carry no label.
    pub fn decode(&self, bytes: &[u8], fixed_label: Option<TableId>) -> NodeId {
        let mut pos = 0usize;
        let table_id = if self.bytes_for_label > 0 {
            let mut b = [0u8; 2];
            b[..self.bytes_for_label].copy_from_slice(&bytes[pos..pos + self.bytes_for_label]);
            pos += self.bytes_for_label;
            u16::from_le_bytes(b)
        } else {
            fixed_label.expect("fixed_label required when bytes_for_label == 0")
        };
        let mut ob = [0u8; 8];
        ob[..self.bytes_for_offset].copy_from_slice(&bytes[pos..pos + self.bytes_for_offset]);
        let offset = u64::from_le_bytes(ob);
        NodeId::new(table_id, offset)
    }
}

fn bytes_needed(max_value: u64) -> usize {
    if max_value == 0 {
        return 1;
    }
    let bits = 64 - max_value.leading_zeros();
    (bits as usize).div_ceil(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_label_needs_no_label_bytes() {
        let c = NodeIdCompression::choose(&[0], 1000);
        assert_eq!(c.bytes_for_label, 0);
    }

    #[test]
    fn multi_label_needs_one_byte_up_to_256() {
        let labels: Vec<TableId> = (0..5).collect();
        let c = NodeIdCompression::choose(&labels, 10);
        assert_eq!(c.bytes_for_label, 1);
    }

    #[test]
    fn encode_decode_roundtrip_with_label() {
        let labels: Vec<TableId> = (0..5).collect();
        let c = NodeIdCompression::choose(&labels, 300);
        let id = NodeId::new(3, 255);
        let encoded = c.encode(id);
        assert_eq!(encoded.len(), c.element_size());
        assert_eq!(c.decode(&encoded, None), id);
    }

    #[test]
    fn encode_decode_roundtrip_without_label() {
        let c = NodeIdCompression::choose(&[7], 1);
        let id = NodeId::new(7, 1);
        let encoded = c.encode(id);
        assert_eq!(c.decode(&encoded, Some(7)), id);
    }

    #[test]
    fn offset_bytes_scale_with_magnitude() {
        assert_eq!(bytes_needed(0), 1);
        assert_eq!(bytes_needed(255), 1);
        assert_eq!(bytes_needed(256), 2);
        assert_eq!(bytes_needed(u64::MAX >> 16), 6);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whatever encoding `choose` picks for a given `(labelCount,
        /// maxOffset)`, any id within that range round-trips through
        /// `encode`/`decode` — the property the transactional
        /// `add_relationship` path now depends on matching bulk load's.
        #[test]
        fn encode_decode_roundtrips_within_chosen_range(
            max_offset in 0u64..=1_000_000_000,
            raw_offset in 0u64..=1_000_000_000,
            label_count in 1usize..=300,
        ) {
            let offset = raw_offset.min(max_offset);
            let labels: Vec<TableId> = (0..label_count as TableId).collect();
            let comp = NodeIdCompression::choose(&labels, max_offset);
            let label = labels[offset as usize % labels.len()];
            let id = NodeId::new(label, offset);

            let encoded = comp.encode(id);
            prop_assert_eq!(encoded.len(), comp.element_size());
            let fixed_label = if comp.bytes_for_label == 0 { Some(label) } else { None };
            prop_assert_eq!(comp.decode(&encoded, fixed_label), id);
        }
    }
}
