//! Chunked adjacency / property list storage (spec.md §4.4 "Chunked
//! adjacency / property list"), used when a relationship's multiplicity
//! is MANY, and for per-node unstructured property lists.
//!
//! Building this two-level layout (small-list chunks vs. large-list page
//! chains) requires knowing every list's final size before placement —
//! the bulk loader's counting pass (C6 Pass 4 phase 1) supplies that via
//! [`ListLayoutBuilder`].

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::paged_file::{page_cursor, PageIdx, PagedFile};
use crate::types::{PAGE_SIZE, SMALL_LISTS_PER_CHUNK, SMALL_LIST_CAPACITY};

/// Total element capacity of one small-list chunk (spec.md §4.4: "a
/// fixed-size small-list chunk that packs up to 512 small lists").
fn chunk_capacity_elements() -> u64 {
    SMALL_LISTS_PER_CHUNK as u64 * SMALL_LIST_CAPACITY as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListHeader {
    Small {
        chunk_idx: u32,
        offset_in_chunk: u32,
        size: u32,
    },
    Large {
        list_idx: u32,
        size: u32,
    },
}

impl ListHeader {
    pub fn size(&self) -> u32 {
        match self {
            ListHeader::Small { size, .. } => *size,
            ListHeader::Large { size, .. } => *size,
        }
    }
}

/// Persisted alongside the `.lists` data file: headers (`.headers`) and
/// chunk/page-chain bookkeeping (`.metadata`), per spec.md §6 directory
/// layout and §4.7's WAL sibling-rename table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ListsMetadataFile {
    headers: Vec<Option<ListHeader>>,
    /// Elements already bump-allocated out of chunk `i`.
    chunk_used: Vec<u64>,
    /// For each large list, the page-id chain backing its elements.
    large_list_page_lists: Vec<Vec<PageIdx>>,
}

/// First-phase counter: accumulates `listSize[srcOffset]` during C6 Pass
/// 4 phase 1, then decides small-vs-large chunk placement in one shot
/// (spec.md §4.4/§4.6 Pass 4 step 2: "best-fit into remaining chunk
/// capacity").
#[derive(Default)]
pub struct ListLayoutBuilder {
    sizes: Vec<u32>,
}

impl ListLayoutBuilder {
    pub fn with_capacity(num_offsets: usize) -> Self {
        Self {
            sizes: vec![0; num_offsets],
        }
    }

    pub fn increment(&mut self, offset: u64) {
        self.sizes[offset as usize] += 1;
    }

    pub fn size(&self, offset: u64) -> u32 {
        self.sizes[offset as usize]
    }

    pub fn into_sizes(self) -> Vec<u32> {
        self.sizes
    }
}

pub struct ListStorage {
    data: PagedFile,
    element_size: usize,
    meta: ListsMetadataFile,
    meta_path: std::path::PathBuf,
    headers_path: std::path::PathBuf,
}

impl ListStorage {
    /// `base` is the shared path prefix, e.g. `.../r-knows-person-fwd`;
    /// opens/creates `<base>.lists`, `<base>.metadata`, `<base>.headers`.
    pub fn open(base: impl AsRef<std::path::Path>, element_size: usize) -> Result<Self> {
        let base = base.as_ref();
        let data_path = base.with_extension("lists");
        let meta_path = base.with_extension("metadata");
        let headers_path = base.with_extension("headers");

        let data = PagedFile::open(&data_path)?;
        let meta = if meta_path.exists() {
            let bytes = std::fs::read(&meta_path)?;
            bincode::deserialize(&bytes).map_err(|e| GraphError::Serialization(e.to_string()))?
        } else {
            ListsMetadataFile::default()
        };

        Ok(Self {
            data,
            element_size,
            meta,
            meta_path,
            headers_path,
        })
    }

    fn elements_per_page(&self) -> u64 {
        crate::types::elements_per_page(self.element_size) as u64
    }

    /// Materializes list headers/chunk-or-chain placement from final
    /// sizes (spec.md §4.6 Pass 4 step 2). Must run before any
    /// `write_element` call for the offsets it covers.
    pub fn allocate_all(&mut self, sizes: &[u32]) -> Result<()> {
        self.meta.headers = vec![None; sizes.len()];
        for (offset, &size) in sizes.iter().enumerate() {
            let header = if size as u64 <= SMALL_LIST_CAPACITY as u64 {
                self.allocate_small(size)?
            } else {
                self.allocate_large(size)?
            };
            self.meta.headers[offset] = Some(header);
        }
        Ok(())
    }

    fn allocate_small(&mut self, size: u32) -> Result<ListHeader> {
        let cap = chunk_capacity_elements();
        for (idx, used) in self.meta.chunk_used.iter_mut().enumerate() {
            if cap - *used >= size as u64 {
                let offset_in_chunk = *used;
                *used += size as u64;
                return Ok(ListHeader::Small {
                    chunk_idx: idx as u32,
                    offset_in_chunk: offset_in_chunk as u32,
                    size,
                });
            }
        }
        let chunk_idx = self.meta.chunk_used.len() as u32;
        self.meta.chunk_used.push(size as u64);
        Ok(ListHeader::Small {
            chunk_idx,
            offset_in_chunk: 0,
            size,
        })
    }

    fn allocate_large(&mut self, size: u32) -> Result<ListHeader> {
        let per_page = self.elements_per_page();
        let pages_needed = (size as u64).div_ceil(per_page.max(1));
        let zero = [0u8; PAGE_SIZE];
        let mut chain = Vec::with_capacity(pages_needed as usize);
        for _ in 0..pages_needed {
            chain.push(self.data.append_page(&zero)?);
        }
        let list_idx = self.meta.large_list_page_lists.len() as u32;
        self.meta.large_list_page_lists.push(chain);
        Ok(ListHeader::Large { list_idx, size })
    }

    fn header(&self, offset: u64) -> Result<ListHeader> {
        self.meta
            .headers
            .get(offset as usize)
            .and_then(|h| *h)
            .ok_or(GraphError::Internal(format!(
                "list at offset {offset} not allocated"
            )))
    }

    pub fn list_size(&self, offset: u64) -> Result<u32> {
        Ok(self.header(offset)?.size())
    }

    /// Writes element `idx_in_list` (0-based, CSV order) of the list at
    /// `offset`. `idx_in_list` must be `< size` from the corresponding
    /// `allocate_all` call.
    pub fn write_element(&mut self, offset: u64, idx_in_list: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.element_size {
            return Err(GraphError::InvalidArgument(format!(
                "expected {} bytes, got {}",
                self.element_size,
                bytes.len()
            )));
        }
        match self.header(offset)? {
            ListHeader::Small {
                chunk_idx,
                offset_in_chunk,
                size,
            } => {
                if idx_in_list >= size {
                    return Err(GraphError::InvalidArgument("list index out of range".into()));
                }
                let global_idx =
                    chunk_idx as u64 * chunk_capacity_elements() + offset_in_chunk as u64 + idx_in_list as u64;
                let (page_idx, elem_offset) = page_cursor(self.element_size, global_idx);
                self.data.ensure_page_count(page_idx + 1)?;
                self.write_into(page_idx, elem_offset, bytes)
            }
            ListHeader::Large { list_idx, size } => {
                if idx_in_list >= size {
                    return Err(GraphError::InvalidArgument("list index out of range".into()));
                }
                let per_page = self.elements_per_page();
                let page_in_chain = (idx_in_list as u64 / per_page) as usize;
                let elem_offset = (idx_in_list as u64 % per_page) as u32;
                let page_idx = self.meta.large_list_page_lists[list_idx as usize][page_in_chain];
                self.write_into(page_idx, elem_offset, bytes)
            }
        }
    }

    fn write_into(&mut self, page_idx: PageIdx, elem_offset: u32, bytes: &[u8]) -> Result<()> {
        let mut page = [0u8; PAGE_SIZE];
        self.data.read(page_idx, &mut page)?;
        let start = elem_offset as usize * self.element_size;
        page[start..start + self.element_size].copy_from_slice(bytes);
        self.data.write(page_idx, &page)
    }

    /// Appends one element to the list at `offset`, growing it by one.
    /// Used by a transactional MANY-multiplicity `add_relationship`
    /// (spec.md §4.7), where bulk load's single up-front `allocate_all`
    /// sizing pass doesn't apply. Always relocates the list to a fresh
    /// small or large placement sized for the new length and rewrites its
    /// existing elements alongside the new one; the list's old placement
    /// is left behind as an unreclaimed gap, consistent with this
    /// storage's append-only-in-extent discipline.
    pub fn append_element(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.element_size {
            return Err(GraphError::InvalidArgument(format!(
                "expected {} bytes, got {}",
                self.element_size,
                bytes.len()
            )));
        }
        let existing = if (offset as usize) < self.meta.headers.len()
            && self.meta.headers[offset as usize].is_some()
        {
            self.read_list(offset)?
        } else {
            Vec::new()
        };
        let new_size = existing.len() as u32 + 1;
        let header = if new_size as u64 <= SMALL_LIST_CAPACITY as u64 {
            self.allocate_small(new_size)?
        } else {
            self.allocate_large(new_size)?
        };
        if offset as usize >= self.meta.headers.len() {
            self.meta.headers.resize(offset as usize + 1, None);
        }
        self.meta.headers[offset as usize] = Some(header);
        for (i, elem) in existing.iter().enumerate() {
            self.write_element(offset, i as u32, elem)?;
        }
        self.write_element(offset, existing.len() as u32, bytes)
    }

    pub fn read_list(&mut self, offset: u64) -> Result<Vec<Vec<u8>>> {
        let header = self.header(offset)?;
        let size = header.size();
        let mut out = Vec::with_capacity(size as usize);
        for i in 0..size {
            out.push(self.read_element(&header, i)?);
        }
        Ok(out)
    }

    fn read_element(&mut self, header: &ListHeader, idx_in_list: u32) -> Result<Vec<u8>> {
        let (page_idx, elem_offset) = match *header {
            ListHeader::Small {
                chunk_idx,
                offset_in_chunk,
                ..
            } => {
                let global_idx = chunk_idx as u64 * chunk_capacity_elements()
                    + offset_in_chunk as u64
                    + idx_in_list as u64;
                page_cursor(self.element_size, global_idx)
            }
            ListHeader::Large { list_idx, .. } => {
                let per_page = self.elements_per_page();
                let page_in_chain = (idx_in_list as u64 / per_page) as usize;
                let elem_offset = (idx_in_list as u64 % per_page) as u32;
                (
                    self.meta.large_list_page_lists[list_idx as usize][page_in_chain],
                    elem_offset,
                )
            }
        };
        let mut page = [0u8; PAGE_SIZE];
        self.data.read(page_idx, &mut page)?;
        let start = elem_offset as usize * self.element_size;
        Ok(page[start..start + self.element_size].to_vec())
    }

    pub fn save_metadata(&self) -> Result<()> {
        let bytes =
            bincode::serialize(&self.meta).map_err(|e| GraphError::Serialization(e.to_string()))?;
        std::fs::write(&self.meta_path, bytes)?;
        // headers persisted as their own sibling file per spec.md §6 layout
        // and the §4.7 WAL sibling-rename table (`*.lists` -> `.headers`).
        let header_bytes = bincode::serialize(&self.meta.headers)
            .map_err(|e| GraphError::Serialization(e.to_string()))?;
        std::fs::write(&self.headers_path, header_bytes)?;
        Ok(())
    }

    pub fn fsync(&self) -> Result<()> {
        self.data.fsync()
    }
}
