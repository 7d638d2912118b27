//! C1 — Paged File Layer: fixed-size page I/O over named files, plus the
//! page-cursor arithmetic every column/list implementation routes through
//! (spec.md §4.1).
//!
//! This is deliberately a thin, uncached layer — caching/pinning is C2's
//! job (`buffer.rs`), and WAL-awareness lives a layer up in `wal.rs`.
//! A single process manages many independently named files through it,
//! rather than one.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use crate::error::{GraphError, Result};
use crate::types::PAGE_SIZE;

/// Magic value stamped into every file's 16-byte header (spec.md §6).
pub const FILE_MAGIC: u32 = 0x4B55_5A55;
pub const FILE_FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 16;

pub type PageIdx = u32;

/// An open, page-addressable file. One owner per file, per spec.md §9
/// ("each paged file has a single owner").
pub struct PagedFile {
    path: PathBuf,
    file: File,
    /// Page count excluding the 16-byte header.
    page_count: u32,
}

fn header_bytes() -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&FILE_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&FILE_FORMAT_VERSION.to_le_bytes());
    buf[8..12].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
    buf
}

impl PagedFile {
    /// Opens `path`, creating it (with the 16-byte header) if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !existed {
            file.write_all(&header_bytes())?;
            file.sync_all()?;
        } else {
            let mut header = [0u8; HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            if file.read(&mut header)? == HEADER_SIZE {
                let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
                if magic != FILE_MAGIC {
                    return Err(GraphError::Corruption(format!(
                        "{}: bad file magic {:#x}",
                        path.display(),
                        magic
                    )));
                }
            }
        }

        let data_len = file.metadata()?.len().saturating_sub(HEADER_SIZE as u64);
        let page_count = (data_len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            path,
            file,
            page_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    fn offset_of(page_idx: PageIdx) -> u64 {
        HEADER_SIZE as u64 + page_idx as u64 * PAGE_SIZE as u64
    }

    /// Reads page `page_idx` into `buf`. Fails with `NotFound` if the page
    /// was never written (spec.md §4.1: "reads of a never-written page
    /// fail with PageOutOfRange").
    pub fn read(&mut self, page_idx: PageIdx, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if page_idx >= self.page_count {
            return Err(GraphError::NotFound("page out of range"));
        }
        self.file.seek(SeekFrom::Start(Self::offset_of(page_idx)))?;
        self.file.read_exact(buf)?;
        trace!(path = %self.path.display(), page_idx, "read page");
        Ok(())
    }

    /// Overwrites an existing page in place.
    pub fn write(&mut self, page_idx: PageIdx, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_idx >= self.page_count {
            return Err(GraphError::NotFound("page out of range"));
        }
        self.file.seek(SeekFrom::Start(Self::offset_of(page_idx)))?;
        self.file.write_all(buf)?;
        trace!(path = %self.path.display(), page_idx, "wrote page");
        Ok(())
    }

    /// Appends a new page, returning its index.
    pub fn append_page(&mut self, buf: &[u8; PAGE_SIZE]) -> Result<PageIdx> {
        let page_idx = self.page_count;
        self.file.seek(SeekFrom::Start(Self::offset_of(page_idx)))?;
        self.file.write_all(buf)?;
        self.page_count += 1;
        Ok(page_idx)
    }

    /// Grows the file with zeroed pages until it has at least `count` pages.
    pub fn ensure_page_count(&mut self, count: u32) -> Result<()> {
        let zero = [0u8; PAGE_SIZE];
        while self.page_count < count {
            self.append_page(&zero)?;
        }
        Ok(())
    }

    pub fn fsync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Renames `src` over `dst`, used both for WAL shadow-file promotion and
/// for loader output placement. Plain `fs::rename` is atomic within a
/// filesystem, which is all every caller here requires.
pub fn rename(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    std::fs::rename(&src, &dst)?;
    trace!(src = %src.as_ref().display(), dst = %dst.as_ref().display(), "renamed file");
    Ok(())
}

pub fn remove(path: impl AsRef<Path>) -> Result<()> {
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %path.as_ref().display(), error = %e, "failed to remove file");
            Err(e.into())
        }
    }
}

/// Number of fixed-width elements that fit in one page, and the split of
/// a flat element index into `(pageIdx, elemOffsetInPage)` (spec.md §4.1).
/// Every column/list implementation routes through these two functions.
pub fn elements_per_page(element_size: usize) -> usize {
    crate::types::elements_per_page(element_size)
}

pub fn page_cursor(element_size: usize, elem_index: u64) -> (PageIdx, u32) {
    let c = crate::types::cursor_for(element_size, elem_index);
    (c.page_idx, c.elem_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = PagedFile::open(dir.path().join("t.col")).unwrap();
        assert_eq!(pf.page_count(), 0);

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        let idx = pf.append_page(&page).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(pf.page_count(), 1);

        let mut out = [0u8; PAGE_SIZE];
        pf.read(0, &mut out).unwrap();
        assert_eq!(out[0], 0xAB);
    }

    #[test]
    fn read_out_of_range_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = PagedFile::open(dir.path().join("t.col")).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        let err = pf.read(0, &mut out).unwrap_err();
        assert!(matches!(err, GraphError::NotFound(_)));
    }

    #[test]
    fn reopen_preserves_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.col");
        {
            let mut pf = PagedFile::open(&path).unwrap();
            let page = [7u8; PAGE_SIZE];
            pf.append_page(&page).unwrap();
            pf.fsync().unwrap();
        }
        let pf = PagedFile::open(&path).unwrap();
        assert_eq!(pf.page_count(), 1);
    }

    #[test]
    fn page_cursor_arithmetic() {
        let per_page = elements_per_page(8);
        assert_eq!(per_page, PAGE_SIZE / 8);
        let (page_idx, offset) = page_cursor(8, per_page as u64 + 3);
        assert_eq!(page_idx, 1);
        assert_eq!(offset, 3);
    }

    #[test]
    fn rename_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.wal");
        std::fs::write(&src, b"data").unwrap();
        let dst = dir.path().join("a.col");
        rename(&src, &dst).unwrap();
        assert!(dst.exists());
        assert!(!src.exists());
        remove(&dst).unwrap();
        assert!(!dst.exists());
    }
}
