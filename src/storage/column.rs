//! Fixed-width column storage (spec.md §4.4 "Fixed-width column"): used
//! both for per-node properties and for adjacency when a relationship's
//! multiplicity is ONE. Null bits live in a bitmap at the tail of each
//! page, one bit per slot.

use crate::error::{GraphError, Result};
use crate::paged_file::PagedFile;
use crate::types::PAGE_SIZE;
use crate::wal::Wal;

/// Largest `n` such that `n` slots of `element_size` bytes plus their
/// trailing `ceil(n/8)`-byte null bitmap still fit in one page
/// (spec.md §4.4: "Null bits are stored at the tail of each page").
pub fn slots_per_page(element_size: usize) -> usize {
    assert!(element_size > 0 && element_size <= PAGE_SIZE);
    let mut n = PAGE_SIZE / element_size;
    while n > 0 {
        let bitmap_bytes = n.div_ceil(8);
        if n * element_size + bitmap_bytes <= PAGE_SIZE {
            return n;
        }
        n -= 1;
    }
    0
}

fn bitmap_bytes(slots: usize) -> usize {
    slots.div_ceil(8)
}

/// A fixed-width, append-only-in-extent array of `numNodes(T)` slots
/// (spec.md §3 invariant 2), each `element_size` bytes, indexed by
/// dense node/adjacency offset.
pub struct Column {
    file: PagedFile,
    element_size: usize,
    slots_per_page: usize,
    num_slots: u64,
}

impl Column {
    pub fn open(path: impl AsRef<std::path::Path>, element_size: usize) -> Result<Self> {
        let file = PagedFile::open(path)?;
        let slots_per_page = slots_per_page(element_size);
        let num_slots = file.page_count() as u64 * slots_per_page as u64;
        Ok(Self {
            file,
            element_size,
            slots_per_page,
            num_slots,
        })
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn num_slots(&self) -> u64 {
        self.num_slots
    }

    fn locate(&self, offset: u64) -> (u32, usize) {
        let page_idx = (offset / self.slots_per_page as u64) as u32;
        let slot_in_page = (offset % self.slots_per_page as u64) as usize;
        (page_idx, slot_in_page)
    }

    /// Grows the column to exactly `count` slots, zero-filling and
    /// marking every new slot null. Bulk-load (C6 Pass 3) calls this once
    /// per table up front so writes never need to extend concurrently.
    pub fn ensure_num_slots(&mut self, count: u64) -> Result<()> {
        if count <= self.num_slots {
            return Ok(());
        }
        let needed_pages = if count == 0 {
            0
        } else {
            ((count - 1) / self.slots_per_page as u64) as u32 + 1
        };
        let mut page = [0u8; PAGE_SIZE];
        let bitmap_start = PAGE_SIZE - bitmap_bytes(self.slots_per_page);
        for b in page[bitmap_start..].iter_mut() {
            *b = 0xFF;
        }
        self.file.ensure_page_count(needed_pages).and_then(|_| {
            // ensure_page_count zero-fills; re-stamp the null bitmaps of any
            // freshly appended pages so unwritten slots read back as null.
            for page_idx in 0..self.file.page_count() {
                let mut existing = [0u8; PAGE_SIZE];
                self.file.read(page_idx, &mut existing)?;
                if existing[bitmap_start..] == [0u8; PAGE_SIZE][bitmap_start..] {
                    self.file.write(page_idx, &page)?;
                }
            }
            Ok(())
        })?;
        self.num_slots = count;
        Ok(())
    }

    fn read_page(&mut self, page_idx: u32) -> Result<[u8; PAGE_SIZE]> {
        let mut buf = [0u8; PAGE_SIZE];
        self.file.read(page_idx, &mut buf)?;
        Ok(buf)
    }

    /// The bare file name `wal::Wal`'s shadow-file table keys writes by.
    pub fn file_name(&self) -> String {
        self.file
            .path()
            .file_name()
            .expect("column path always has a file name")
            .to_string_lossy()
            .into_owned()
    }

    pub fn write_slot(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.element_size {
            return Err(GraphError::InvalidArgument(format!(
                "expected {} bytes, got {}",
                self.element_size,
                bytes.len()
            )));
        }
        if offset >= self.num_slots {
            return Err(GraphError::InvalidArgument(format!(
                "offset {offset} out of range (num_slots={})",
                self.num_slots
            )));
        }
        let (page_idx, slot_in_page) = self.locate(offset);
        let mut page = self.read_page(page_idx)?;
        let data_start = slot_in_page * self.element_size;
        page[data_start..data_start + self.element_size].copy_from_slice(bytes);
        self.set_null_bit(&mut page, slot_in_page, false);
        self.file.write(page_idx, &page)
    }

    pub fn set_null(&mut self, offset: u64, is_null: bool) -> Result<()> {
        let (page_idx, slot_in_page) = self.locate(offset);
        let mut page = self.read_page(page_idx)?;
        self.set_null_bit(&mut page, slot_in_page, is_null);
        self.file.write(page_idx, &page)
    }

    /// Same as [`Column::write_slot`], but redirects the page image through
    /// `wal`'s shadow-file path (spec.md §4.7) instead of writing canonical
    /// directly, so a crash between this write and the COMMIT record is
    /// resolved by replay rather than leaving a half-written page.
    pub fn write_slot_wal(&mut self, offset: u64, bytes: &[u8], wal: &mut Wal) -> Result<()> {
        if bytes.len() != self.element_size {
            return Err(GraphError::InvalidArgument(format!(
                "expected {} bytes, got {}",
                self.element_size,
                bytes.len()
            )));
        }
        if offset >= self.num_slots {
            return Err(GraphError::InvalidArgument(format!(
                "offset {offset} out of range (num_slots={})",
                self.num_slots
            )));
        }
        let (page_idx, slot_in_page) = self.locate(offset);
        let file_name = self.file_name();
        let mut page = wal.read_page(&file_name, page_idx, &mut self.file)?;
        let data_start = slot_in_page * self.element_size;
        page[data_start..data_start + self.element_size].copy_from_slice(bytes);
        self.set_null_bit(&mut page, slot_in_page, false);
        wal.write_page(&file_name, page_idx, &page)
    }

    /// WAL-routed counterpart to [`Column::set_null`].
    pub fn set_null_wal(&mut self, offset: u64, is_null: bool, wal: &mut Wal) -> Result<()> {
        let (page_idx, slot_in_page) = self.locate(offset);
        let file_name = self.file_name();
        let mut page = wal.read_page(&file_name, page_idx, &mut self.file)?;
        self.set_null_bit(&mut page, slot_in_page, is_null);
        wal.write_page(&file_name, page_idx, &page)
    }

    fn set_null_bit(&self, page: &mut [u8; PAGE_SIZE], slot_in_page: usize, is_null: bool) {
        let bitmap_start = PAGE_SIZE - bitmap_bytes(self.slots_per_page);
        let byte_idx = bitmap_start + slot_in_page / 8;
        let bit = 1u8 << (slot_in_page % 8);
        if is_null {
            page[byte_idx] |= bit;
        } else {
            page[byte_idx] &= !bit;
        }
    }

    pub fn is_null(&mut self, offset: u64) -> Result<bool> {
        let (page_idx, slot_in_page) = self.locate(offset);
        let page = self.read_page(page_idx)?;
        let bitmap_start = PAGE_SIZE - bitmap_bytes(self.slots_per_page);
        let byte_idx = bitmap_start + slot_in_page / 8;
        let bit = 1u8 << (slot_in_page % 8);
        Ok(page[byte_idx] & bit != 0)
    }

    pub fn read_slot(&mut self, offset: u64) -> Result<Option<Vec<u8>>> {
        if self.is_null(offset)? {
            return Ok(None);
        }
        let (page_idx, slot_in_page) = self.locate(offset);
        let page = self.read_page(page_idx)?;
        let data_start = slot_in_page * self.element_size;
        Ok(Some(page[data_start..data_start + self.element_size].to_vec()))
    }

    pub fn fsync(&self) -> Result<()> {
        self.file.fsync()
    }
}
