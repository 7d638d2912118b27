//! Slotted, separate-chaining primary-key hash index (spec.md §4.5).
//!
//! A slot is `header {numEntries:u8, validityMask:u32, nextOvfSlotId:u64}`
//! plus `SLOT_CAPACITY = 4` `(key, offset)` entries. The primary slot
//! array is sized to a power of two from the bulk loader's expected node
//! count; overflow slots chain through a parallel file addressed by
//! `nextOvfSlotId`.

use crate::error::{GraphError, Result};
use crate::paged_file::{page_cursor, PagedFile};
use crate::storage::overflow::OverflowFile;
use crate::types::{DEFAULT_HT_LOAD_FACTOR, PAGE_SIZE, SLOT_CAPACITY};

const KEY_INLINE_CAPACITY: usize = 8;
const KEY_REPR_SIZE: usize = 16;
const ENTRY_SIZE: usize = KEY_REPR_SIZE + 8; // key repr + u64 offset
const HEADER_SIZE: usize = 1 + 4 + 8; // numEntries, validityMask, nextOvfSlotId
const SLOT_SIZE: usize = HEADER_SIZE + SLOT_CAPACITY * ENTRY_SIZE;

/// A primary-key value. Other structured types (int64, date, ...) key on
/// their raw `i64`/`u64` bit pattern; strings key on their UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Int64(i64),
    Str(String),
}

impl IndexKey {
    fn bucket_hash(&self) -> u64 {
        // FNV-1a — adequate for bucket placement; not a security hash.
        let bytes: std::borrow::Cow<[u8]> = match self {
            IndexKey::Int64(v) => std::borrow::Cow::Owned(v.to_le_bytes().to_vec()),
            IndexKey::Str(s) => std::borrow::Cow::Borrowed(s.as_bytes()),
        };
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in bytes.iter() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct KeyRepr([u8; KEY_REPR_SIZE]);

impl KeyRepr {
    fn encode(key: &IndexKey, key_ovf: &mut OverflowFile) -> Result<Self> {
        let mut buf = [0u8; KEY_REPR_SIZE];
        match key {
            IndexKey::Int64(v) => {
                buf[0] = 0;
                buf[1..9].copy_from_slice(&v.to_le_bytes());
            }
            IndexKey::Str(s) => {
                let bytes = s.as_bytes();
                if bytes.len() <= KEY_INLINE_CAPACITY {
                    buf[0] = 1;
                    buf[1] = bytes.len() as u8;
                    buf[2..2 + bytes.len()].copy_from_slice(bytes);
                } else {
                    let (page_idx, page_offset) = key_ovf.append(bytes)?;
                    buf[0] = 2;
                    buf[1..5].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
                    buf[5..9].copy_from_slice(&page_idx.to_le_bytes());
                    buf[9..13].copy_from_slice(&page_offset.to_le_bytes());
                }
            }
        }
        Ok(KeyRepr(buf))
    }

    fn decode(&self, key_ovf: &mut OverflowFile) -> Result<IndexKey> {
        let buf = &self.0;
        match buf[0] {
            0 => Ok(IndexKey::Int64(i64::from_le_bytes(buf[1..9].try_into().unwrap()))),
            1 => {
                let len = buf[1] as usize;
                Ok(IndexKey::Str(String::from_utf8_lossy(&buf[2..2 + len]).into_owned()))
            }
            2 => {
                let len = u32::from_le_bytes(buf[1..5].try_into().unwrap()) as usize;
                let page_idx = u32::from_le_bytes(buf[5..9].try_into().unwrap());
                let page_offset = u32::from_le_bytes(buf[9..13].try_into().unwrap());
                let raw = key_ovf.read_at(page_idx, page_offset, len)?;
                Ok(IndexKey::Str(String::from_utf8_lossy(&raw).into_owned()))
            }
            tag => Err(GraphError::Corruption(format!("bad key repr tag {tag}"))),
        }
    }

    fn matches(&self, key: &IndexKey, key_ovf: &mut OverflowFile) -> Result<bool> {
        Ok(&self.decode(key_ovf)? == key)
    }
}

struct Slot {
    num_entries: u8,
    validity_mask: u32,
    next_ovf_slot_id: u64,
    entries: [Option<(KeyRepr, u64)>; SLOT_CAPACITY],
}

impl Slot {
    fn empty() -> Self {
        Self {
            num_entries: 0,
            validity_mask: 0,
            next_ovf_slot_id: 0,
            entries: [None; SLOT_CAPACITY],
        }
    }

    fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        buf[0] = self.num_entries;
        buf[1..5].copy_from_slice(&self.validity_mask.to_le_bytes());
        buf[5..13].copy_from_slice(&self.next_ovf_slot_id.to_le_bytes());
        for (i, entry) in self.entries.iter().enumerate() {
            let base = HEADER_SIZE + i * ENTRY_SIZE;
            if let Some((key, offset)) = entry {
                buf[base..base + KEY_REPR_SIZE].copy_from_slice(&key.0);
                buf[base + KEY_REPR_SIZE..base + ENTRY_SIZE].copy_from_slice(&offset.to_le_bytes());
            }
        }
        buf
    }

    fn decode(buf: &[u8; SLOT_SIZE]) -> Self {
        let num_entries = buf[0];
        let validity_mask = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        let next_ovf_slot_id = u64::from_le_bytes(buf[5..13].try_into().unwrap());
        let mut entries: [Option<(KeyRepr, u64)>; SLOT_CAPACITY] = [None; SLOT_CAPACITY];
        for (i, slot) in entries.iter_mut().enumerate() {
            if validity_mask & (1 << i) != 0 {
                let base = HEADER_SIZE + i * ENTRY_SIZE;
                let mut key_bytes = [0u8; KEY_REPR_SIZE];
                key_bytes.copy_from_slice(&buf[base..base + KEY_REPR_SIZE]);
                let offset = u64::from_le_bytes(buf[base + KEY_REPR_SIZE..base + ENTRY_SIZE].try_into().unwrap());
                *slot = Some((KeyRepr(key_bytes), offset));
            }
        }
        Self {
            num_entries,
            validity_mask,
            next_ovf_slot_id,
            entries,
        }
    }

    fn first_free(&self) -> Option<usize> {
        (0..SLOT_CAPACITY).find(|i| self.entries[*i].is_none())
    }

    fn insert(&mut self, key: KeyRepr, offset: u64) -> bool {
        match self.first_free() {
            Some(i) => {
                self.entries[i] = Some((key, offset));
                self.validity_mask |= 1 << i;
                self.num_entries += 1;
                true
            }
            None => false,
        }
    }
}

/// Rounds `n` up to the next power of two, with a floor of 1.
fn next_pow2(n: u64) -> u64 {
    if n <= 1 {
        1
    } else {
        1u64 << (64 - (n - 1).leading_zeros())
    }
}

pub struct HashIndex {
    primary: PagedFile,
    overflow: PagedFile,
    key_overflow: OverflowFile,
    num_primary_slots: u64,
    next_ovf_slot_id: u64,
}

impl HashIndex {
    /// `num_nodes` sizes the primary slot array per spec.md §4.5:
    /// `numNodes / (SLOT_CAPACITY * DEFAULT_HT_LOAD_FACTOR)` rounded up
    /// to the next power of two.
    pub fn create(base: impl AsRef<std::path::Path>, num_nodes: u64) -> Result<Self> {
        let base = base.as_ref();
        let raw = (num_nodes as f64 / (SLOT_CAPACITY as f64 * DEFAULT_HT_LOAD_FACTOR)).ceil() as u64;
        let num_primary_slots = next_pow2(raw.max(1));

        let mut primary = PagedFile::open(base.with_extension("pk.index"))?;
        let slots_per_page = crate::types::elements_per_page(SLOT_SIZE) as u64;
        let pages_needed = num_primary_slots.div_ceil(slots_per_page.max(1)) as u32;
        let empty = Slot::empty().encode();
        let zero_page = Self::page_of_empty_slots(&empty, SLOT_SIZE);
        primary.ensure_page_count(pages_needed)?;
        for p in 0..pages_needed {
            primary.write(p, &zero_page)?;
        }

        let overflow = PagedFile::open(base.with_extension("pk.index.ovf"))?;
        let key_overflow = OverflowFile::open(base.with_extension("pk.index.keys"))?;

        Ok(Self {
            primary,
            overflow,
            key_overflow,
            num_primary_slots,
            next_ovf_slot_id: 1,
        })
    }

    /// Reopens an index built by [`HashIndex::create`] for read-only
    /// lookups, inferring `num_primary_slots` from the primary file's
    /// existing page count instead of recomputing and re-zeroing it
    /// (spec.md §4.5 "Lookup"; used by readers and by tests verifying
    /// §8 invariant 2 against a loader's on-disk output).
    pub fn open(base: impl AsRef<std::path::Path>) -> Result<Self> {
        let base = base.as_ref();
        let primary = PagedFile::open(base.with_extension("pk.index"))?;
        let slots_per_page = crate::types::elements_per_page(SLOT_SIZE) as u64;
        let num_primary_slots = primary.page_count() as u64 * slots_per_page;

        let overflow = PagedFile::open(base.with_extension("pk.index.ovf"))?;
        let key_overflow = OverflowFile::open(base.with_extension("pk.index.keys"))?;
        let next_ovf_slot_id = overflow.page_count() as u64 * slots_per_page + 1;

        Ok(Self {
            primary,
            overflow,
            key_overflow,
            num_primary_slots: num_primary_slots.max(1),
            next_ovf_slot_id,
        })
    }

    fn page_of_empty_slots(empty_slot: &[u8], slot_size: usize) -> [u8; PAGE_SIZE] {
        let mut page = [0u8; PAGE_SIZE];
        let per_page = PAGE_SIZE / slot_size;
        for i in 0..per_page {
            page[i * slot_size..i * slot_size + slot_size].copy_from_slice(empty_slot);
        }
        page
    }

    fn read_primary_slot(&mut self, slot_idx: u64) -> Result<Slot> {
        let (page_idx, elem_offset) = page_cursor(SLOT_SIZE, slot_idx);
        let mut page = [0u8; PAGE_SIZE];
        self.primary.read(page_idx, &mut page)?;
        let start = elem_offset as usize * SLOT_SIZE;
        let mut raw = [0u8; SLOT_SIZE];
        raw.copy_from_slice(&page[start..start + SLOT_SIZE]);
        Ok(Slot::decode(&raw))
    }

    fn write_primary_slot(&mut self, slot_idx: u64, slot: &Slot) -> Result<()> {
        let (page_idx, elem_offset) = page_cursor(SLOT_SIZE, slot_idx);
        let mut page = [0u8; PAGE_SIZE];
        self.primary.read(page_idx, &mut page)?;
        let start = elem_offset as usize * SLOT_SIZE;
        page[start..start + SLOT_SIZE].copy_from_slice(&slot.encode());
        self.primary.write(page_idx, &page)
    }

    fn read_overflow_slot(&mut self, ovf_id: u64) -> Result<Slot> {
        let (page_idx, elem_offset) = page_cursor(SLOT_SIZE, ovf_id - 1);
        let mut page = [0u8; PAGE_SIZE];
        self.overflow.read(page_idx, &mut page)?;
        let start = elem_offset as usize * SLOT_SIZE;
        let mut raw = [0u8; SLOT_SIZE];
        raw.copy_from_slice(&page[start..start + SLOT_SIZE]);
        Ok(Slot::decode(&raw))
    }

    fn write_overflow_slot(&mut self, ovf_id: u64, slot: &Slot) -> Result<()> {
        let (page_idx, elem_offset) = page_cursor(SLOT_SIZE, ovf_id - 1);
        self.overflow.ensure_page_count(page_idx + 1)?;
        let mut page = [0u8; PAGE_SIZE];
        self.overflow.read(page_idx, &mut page)?;
        let start = elem_offset as usize * SLOT_SIZE;
        page[start..start + SLOT_SIZE].copy_from_slice(&slot.encode());
        self.overflow.write(page_idx, &page)
    }

    fn append_overflow_slot(&mut self, slot: &Slot) -> Result<u64> {
        let id = self.next_ovf_slot_id;
        self.next_ovf_slot_id += 1;
        self.write_overflow_slot(id, slot)?;
        Ok(id)
    }

    /// Bulk-load insertion: place in the first free entry of the primary
    /// slot, walking/extending the overflow chain when full
    /// (spec.md §4.5 "Insert (bulk only during load)").
    pub fn insert(&mut self, key: IndexKey, offset: u64) -> Result<()> {
        let slot_idx = key.bucket_hash() % self.num_primary_slots;
        let key_repr = KeyRepr::encode(&key, &mut self.key_overflow)?;

        let mut slot = self.read_primary_slot(slot_idx)?;
        if slot.insert(key_repr, offset) {
            return self.write_primary_slot(slot_idx, &slot);
        }

        if slot.next_ovf_slot_id == 0 {
            let mut new_ovf = Slot::empty();
            new_ovf.insert(key_repr, offset);
            let ovf_id = self.append_overflow_slot(&new_ovf)?;
            slot.next_ovf_slot_id = ovf_id;
            return self.write_primary_slot(slot_idx, &slot);
        }

        let mut ovf_id = slot.next_ovf_slot_id;
        loop {
            let mut ovf_slot = self.read_overflow_slot(ovf_id)?;
            if ovf_slot.insert(key_repr, offset) {
                return self.write_overflow_slot(ovf_id, &ovf_slot);
            }
            if ovf_slot.next_ovf_slot_id == 0 {
                let mut new_ovf = Slot::empty();
                new_ovf.insert(key_repr, offset);
                let new_id = self.append_overflow_slot(&new_ovf)?;
                ovf_slot.next_ovf_slot_id = new_id;
                return self.write_overflow_slot(ovf_id, &ovf_slot);
            }
            ovf_id = ovf_slot.next_ovf_slot_id;
        }
    }

    /// Computes hash, probes the primary slot, then walks the overflow
    /// chain, comparing keys, per spec.md §4.5 "Lookup".
    pub fn lookup(&mut self, key: &IndexKey) -> Result<Option<u64>> {
        let slot_idx = key.bucket_hash() % self.num_primary_slots;
        let mut slot = self.read_primary_slot(slot_idx)?;
        loop {
            for entry in slot.entries.iter().flatten() {
                if entry.0.matches(key, &mut self.key_overflow)? {
                    return Ok(Some(entry.1));
                }
            }
            if slot.next_ovf_slot_id == 0 {
                return Ok(None);
            }
            slot = self.read_overflow_slot(slot.next_ovf_slot_id)?;
        }
    }

    pub fn num_primary_slots(&self) -> u64 {
        self.num_primary_slots
    }

    pub fn fsync(&self) -> Result<()> {
        self.primary.fsync()?;
        self.overflow.fsync()?;
        self.key_overflow.fsync()
    }
}
