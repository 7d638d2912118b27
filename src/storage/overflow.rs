//! String overflow pages (spec.md §4.4 "String overflow"). A `gf_string`
//! is 16 bytes: short strings (`len <= 12`) embed their bytes inline;
//! longer strings carry a `(ovfPageIdx, ovfPageOffset)` pointer into a
//! sibling overflow file.

use crate::error::Result;
use crate::paged_file::{PageIdx, PagedFile};
use crate::types::PAGE_SIZE;

pub const INLINE_CAPACITY: usize = 12;
pub const GF_STRING_SIZE: usize = 16;

/// The decoded on-disk representation of a string property/list element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GfString {
    Inline { len: u8, bytes: [u8; INLINE_CAPACITY] },
    Overflow { len: u32, prefix4: [u8; 4], page_idx: PageIdx, page_offset: u32 },
}

impl GfString {
    pub fn prefix(&self) -> [u8; 4] {
        match self {
            GfString::Inline { bytes, len } => {
                let mut p = [0u8; 4];
                let n = (*len as usize).min(4);
                p[..n].copy_from_slice(&bytes[..n]);
                p
            }
            GfString::Overflow { prefix4, .. } => *prefix4,
        }
    }

    /// Encodes to the 16-byte on-disk `gf_string` layout: byte 0 is a
    /// discriminant (0 = inline, 1 = overflow), remaining 15 bytes carry
    /// the payload.
    pub fn encode(&self) -> [u8; GF_STRING_SIZE] {
        let mut buf = [0u8; GF_STRING_SIZE];
        match self {
            GfString::Inline { len, bytes } => {
                buf[0] = 0;
                buf[1] = *len;
                buf[2..2 + INLINE_CAPACITY].copy_from_slice(bytes);
            }
            GfString::Overflow {
                len,
                prefix4,
                page_idx,
                page_offset,
            } => {
                buf[0] = 1;
                buf[1..5].copy_from_slice(&len.to_le_bytes());
                buf[5..9].copy_from_slice(prefix4);
                buf[9..13].copy_from_slice(&page_idx.to_le_bytes());
                buf[13..17.min(GF_STRING_SIZE)].copy_from_slice(&page_offset.to_le_bytes()[..3]);
            }
        }
        buf
    }

    pub fn decode(buf: &[u8; GF_STRING_SIZE]) -> GfString {
        if buf[0] == 0 {
            let len = buf[1];
            let mut bytes = [0u8; INLINE_CAPACITY];
            bytes.copy_from_slice(&buf[2..2 + INLINE_CAPACITY]);
            GfString::Inline { len, bytes }
        } else {
            let len = u32::from_le_bytes(buf[1..5].try_into().unwrap());
            let mut prefix4 = [0u8; 4];
            prefix4.copy_from_slice(&buf[5..9]);
            let page_idx = u32::from_le_bytes(buf[9..13].try_into().unwrap());
            let mut offset_bytes = [0u8; 4];
            offset_bytes[..3].copy_from_slice(&buf[13..16]);
            let page_offset = u32::from_le_bytes(offset_bytes);
            GfString::Overflow {
                len,
                prefix4,
                page_idx,
                page_offset,
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            GfString::Inline { len, .. } => *len as usize,
            GfString::Overflow { len, .. } => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A byte-cursor-addressed overflow file, appended to by [`OverflowWriter`]
/// and read by [`read_string`]/[`write_string`] below.
pub struct OverflowFile {
    file: PagedFile,
    cursor_page: PageIdx,
    cursor_offset: u32,
}

impl OverflowFile {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let mut file = PagedFile::open(path)?;
        let cursor_page = file.page_count();
        if cursor_page == 0 {
            file.append_page(&[0u8; PAGE_SIZE])?;
        }
        let cursor_page = file.page_count() - 1;
        Ok(Self {
            file,
            cursor_page,
            cursor_offset: 0,
        })
    }

    /// Appends `data`, advancing to a fresh page first if it would not
    /// fit in the remainder of the current page (spec.md §4.4: "no wrap
    /// within a string"). Returns the `(pageIdx, pageOffset)` pointer.
    pub fn append(&mut self, data: &[u8]) -> Result<(PageIdx, u32)> {
        if data.len() > PAGE_SIZE {
            return Err(crate::error::GraphError::InvalidArgument(
                "overflow string longer than one page is unsupported".into(),
            ));
        }
        if PAGE_SIZE - self.cursor_offset as usize < data.len() {
            self.cursor_page = self.file.append_page(&[0u8; PAGE_SIZE])?;
            self.cursor_offset = 0;
        }
        let mut page = [0u8; PAGE_SIZE];
        self.file.read(self.cursor_page, &mut page)?;
        let start = self.cursor_offset as usize;
        page[start..start + data.len()].copy_from_slice(data);
        self.file.write(self.cursor_page, &page)?;

        let ptr = (self.cursor_page, self.cursor_offset);
        self.cursor_offset += data.len() as u32;
        Ok(ptr)
    }

    pub fn read_at(&mut self, page_idx: PageIdx, page_offset: u32, len: usize) -> Result<Vec<u8>> {
        let mut page = [0u8; PAGE_SIZE];
        self.file.read(page_idx, &mut page)?;
        let start = page_offset as usize;
        Ok(page[start..start + len].to_vec())
    }

    pub fn fsync(&self) -> Result<()> {
        self.file.fsync()
    }
}

/// Builds the `gf_string` for `s`, writing overflow bytes through `ovf`
/// when `s` does not fit inline (spec.md §3 invariant 5).
pub fn write_string(s: &str, ovf: &mut OverflowFile) -> Result<GfString> {
    let bytes = s.as_bytes();
    if bytes.len() <= INLINE_CAPACITY {
        let mut inline = [0u8; INLINE_CAPACITY];
        inline[..bytes.len()].copy_from_slice(bytes);
        return Ok(GfString::Inline {
            len: bytes.len() as u8,
            bytes: inline,
        });
    }
    let mut prefix4 = [0u8; 4];
    let n = bytes.len().min(4);
    prefix4[..n].copy_from_slice(&bytes[..n]);
    let (page_idx, page_offset) = ovf.append(bytes)?;
    Ok(GfString::Overflow {
        len: bytes.len() as u32,
        prefix4,
        page_idx,
        page_offset,
    })
}

pub fn read_string(value: &GfString, ovf: &mut OverflowFile) -> Result<String> {
    match value {
        GfString::Inline { len, bytes } => {
            Ok(String::from_utf8_lossy(&bytes[..*len as usize]).into_owned())
        }
        GfString::Overflow {
            len,
            page_idx,
            page_offset,
            ..
        } => {
            let raw = ovf.read_at(*page_idx, *page_offset, *len as usize)?;
            Ok(String::from_utf8_lossy(&raw).into_owned())
        }
    }
}

/// Pass 5 (spec.md §4.4/§4.6): re-orders overflow bytes so strings
/// belonging to the same source-offset bucket are co-located, processing
/// buckets of 256 offsets. `⌈numNodes / 256⌉` buckets total — the
/// corrected formula from spec.md Open Question 2, which fixes the
/// original's double-counting for sizes that are an exact multiple of
/// 256 and its mishandling of `numNodes < 256`.
pub fn bucket_count(num_offsets: u64) -> u64 {
    num_offsets.div_ceil(256)
}
