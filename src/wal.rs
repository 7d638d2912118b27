//! C7 — WAL & Replay: append-only log of page-write records, commit,
//! rollback, and checkpoint (spec.md §4.7). Records are length-prefixed
//! frames with a trailing checksum, reshaped around a shadow-file-per-
//! touched-file model instead of a single shadow pager.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use tracing::{info, warn};

use crate::error::{GraphError, Result};
use crate::paged_file::PagedFile;
use crate::types::PAGE_SIZE;

const TAG_PAGE_WRITE: u8 = 0;
const TAG_COMMIT: u8 = 1;
const TAG_CATALOG_UPDATE: u8 = 2;

enum WalRecord {
    PageWrite {
        tx_id: u64,
        file_name: String,
        page_idx: u32,
        image: Box<[u8; PAGE_SIZE]>,
    },
    Commit {
        tx_id: u64,
    },
    CatalogUpdate {
        tx_id: u64,
        bytes: Vec<u8>,
    },
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// The sibling files renamed together with a primary file at checkpoint
/// (spec.md §4.7 table).
fn siblings_for(file_name: &str) -> Vec<String> {
    let path = Path::new(file_name);
    if file_name.ends_with(".col") {
        vec![path.with_extension("ovf").to_string_lossy().into_owned()]
    } else if file_name.ends_with(".lists") {
        ["metadata", "headers", "ovf"]
            .iter()
            .map(|ext| path.with_extension(ext).to_string_lossy().into_owned())
            .collect()
    } else {
        vec![]
    }
}

fn shadow_path(dir: &Path, file_name: &str) -> PathBuf {
    let mut os = dir.join(file_name).into_os_string();
    os.push(".wal");
    PathBuf::from(os)
}

/// The append-only WAL file plus the shadow-file set it's tracking for
/// the currently open transaction.
pub struct Wal {
    dir: PathBuf,
    file: File,
    sync_enabled: bool,
    current_tx: Option<u64>,
    next_tx_id: u64,
    touched_files: HashSet<String>,
}

impl Wal {
    pub fn open(dir: impl Into<PathBuf>, sync_enabled: bool) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("wal.log");
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let mut wal = Self {
            dir,
            file,
            sync_enabled,
            current_tx: None,
            next_tx_id: 1,
            touched_files: HashSet::new(),
        };
        // Replay then truncate, same as an explicit checkpoint: any
        // records left from a prior process are either already promoted
        // (a no-op to replay again) or belong to a committed transaction
        // that never got checkpointed before the process exited, and this
        // is that checkpoint running late.
        wal.checkpoint()?;
        Ok(wal)
    }

    pub fn begin(&mut self) -> u64 {
        let tx_id = self.next_tx_id;
        self.next_tx_id += 1;
        self.current_tx = Some(tx_id);
        self.touched_files.clear();
        tx_id
    }

    fn active_tx(&self) -> Result<u64> {
        self.current_tx
            .ok_or_else(|| GraphError::Internal("no active WAL transaction".into()))
    }

    /// Redirects a page write into `<orig>.wal`, logging the record
    /// before the shadow write is flushed (spec.md §4.7). The shadow is
    /// seeded with a full copy of the canonical file the first time this
    /// transaction touches it, so promoting the shadow at checkpoint
    /// doesn't drop pages this transaction never wrote.
    pub fn write_page(&mut self, file_name: &str, page_idx: u32, image: &[u8; PAGE_SIZE]) -> Result<()> {
        let tx_id = self.active_tx()?;
        self.append_record(&WalRecord::PageWrite {
            tx_id,
            file_name: file_name.to_string(),
            page_idx,
            image: Box::new(*image),
        })?;

        let shadow = shadow_path(&self.dir, file_name);
        if !self.touched_files.contains(file_name) {
            let canonical = self.dir.join(file_name);
            if canonical.exists() {
                std::fs::copy(&canonical, &shadow)?;
            }
        }
        let mut shadow_file = PagedFile::open(&shadow)?;
        shadow_file.ensure_page_count(page_idx + 1)?;
        shadow_file.write(page_idx, image)?;
        shadow_file.fsync()?;
        self.touched_files.insert(file_name.to_string());
        Ok(())
    }

    /// Reads the page a writer currently sees for `(file_name, page_idx)`:
    /// the shadow file's image if this transaction already redirected a
    /// write to it, otherwise `canonical`'s. Lets a column/list
    /// read-modify-write cycle see its own prior writes within the same
    /// transaction before they're promoted.
    pub fn read_page(&self, file_name: &str, page_idx: u32, canonical: &mut PagedFile) -> Result<[u8; PAGE_SIZE]> {
        let shadow = shadow_path(&self.dir, file_name);
        if shadow.exists() {
            let mut shadow_file = PagedFile::open(&shadow)?;
            if page_idx < shadow_file.page_count() {
                let mut buf = [0u8; PAGE_SIZE];
                shadow_file.read(page_idx, &mut buf)?;
                return Ok(buf);
            }
        }
        if page_idx < canonical.page_count() {
            let mut buf = [0u8; PAGE_SIZE];
            canonical.read(page_idx, &mut buf)?;
            Ok(buf)
        } else {
            Ok([0u8; PAGE_SIZE])
        }
    }

    pub fn log_catalog_update(&mut self, bytes: Vec<u8>) -> Result<()> {
        let tx_id = self.active_tx()?;
        self.append_record(&WalRecord::CatalogUpdate { tx_id, bytes })
    }

    /// Flushes the WAL, appends a COMMIT record, flushes again
    /// (spec.md §4.7 "Commit").
    pub fn commit(&mut self) -> Result<()> {
        let tx_id = self.active_tx()?;
        self.file.sync_data()?;
        self.append_record(&WalRecord::Commit { tx_id })?;
        self.file.sync_data()?;
        self.current_tx = None;
        Ok(())
    }

    /// Discards shadow files and truncates the WAL (spec.md §4.7
    /// "Rollback").
    pub fn rollback(&mut self) -> Result<()> {
        for file_name in self.touched_files.drain() {
            let _ = std::fs::remove_file(shadow_path(&self.dir, &file_name));
            for sibling in siblings_for(&file_name) {
                let _ = std::fs::remove_file(shadow_path(&self.dir, &sibling));
            }
        }
        self.truncate()?;
        self.current_tx = None;
        Ok(())
    }

    /// Executes replay, then truncates the WAL (spec.md §4.7
    /// "Checkpoint").
    pub fn checkpoint(&mut self) -> Result<()> {
        self.replay()?;
        self.truncate()
    }

    fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Scans the WAL; for committed transactions, applies each page
    /// write into its shadow file (making the shadow complete even if
    /// the original flush was interrupted by a crash) then renames every
    /// touched file's shadow over the canonical, together with its
    /// siblings. Shadow files left over from an uncommitted transaction
    /// are removed. Idempotent: replaying an already-applied WAL is a
    /// no-op because there is nothing left to read (spec.md §8 property
    /// 4, §4.7 "Replay").
    pub fn replay(&mut self) -> Result<()> {
        let records = self.read_all_records()?;
        if records.is_empty() {
            self.remove_orphan_shadows()?;
            return Ok(());
        }

        let mut committed: HashSet<u64> = HashSet::new();
        let mut page_writes: HashMap<u64, Vec<(String, u32, Box<[u8; PAGE_SIZE]>)>> = HashMap::new();
        let mut catalog_updates: HashMap<u64, Vec<u8>> = HashMap::new();

        for record in records {
            match record {
                WalRecord::Commit { tx_id } => {
                    committed.insert(tx_id);
                }
                WalRecord::PageWrite {
                    tx_id,
                    file_name,
                    page_idx,
                    image,
                } => {
                    page_writes.entry(tx_id).or_default().push((file_name, page_idx, image));
                }
                WalRecord::CatalogUpdate { tx_id, bytes } => {
                    catalog_updates.insert(tx_id, bytes);
                }
            }
        }

        let mut touched_by_tx: HashMap<u64, HashSet<String>> = HashMap::new();
        for (tx_id, writes) in &page_writes {
            if !committed.contains(tx_id) {
                continue;
            }
            for (file_name, page_idx, image) in writes {
                let shadow = shadow_path(&self.dir, file_name);
                let mut shadow_file = PagedFile::open(&shadow)?;
                shadow_file.ensure_page_count(page_idx + 1)?;
                shadow_file.write(*page_idx, image)?;
                shadow_file.fsync()?;
                touched_by_tx.entry(*tx_id).or_default().insert(file_name.clone());
            }
        }

        for tx_id in &committed {
            if let Some(bytes) = catalog_updates.get(tx_id) {
                std::fs::write(self.dir.join("catalog.bin"), bytes)?;
            }
            if let Some(files) = touched_by_tx.get(tx_id) {
                for file_name in files {
                    self.promote_shadow(file_name)?;
                    for sibling in siblings_for(file_name) {
                        if shadow_path(&self.dir, &sibling).exists() {
                            self.promote_shadow(&sibling)?;
                        }
                    }
                }
            }
            info!(tx_id, "replayed committed transaction");
        }

        self.remove_orphan_shadows()?;
        Ok(())
    }

    fn promote_shadow(&self, file_name: &str) -> Result<()> {
        let shadow = shadow_path(&self.dir, file_name);
        if shadow.exists() {
            crate::paged_file::rename(&shadow, self.dir.join(file_name))?;
        }
        Ok(())
    }

    /// Removes any `*.wal` shadow file left in the output directory that
    /// replay did not just promote — these belong to transactions that
    /// were never committed (spec.md §4.7: "If any shadow file exists
    /// without a COMMIT record, remove it").
    fn remove_orphan_shadows(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "wal").unwrap_or(false)
                && path.file_name().map(|n| n != "wal.log").unwrap_or(true)
            {
                warn!(path = %path.display(), "removing orphan WAL shadow file");
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn append_record(&mut self, record: &WalRecord) -> Result<()> {
        let payload = Self::encode(record);
        let crc = checksum(&payload);
        self.file.write_all(&[Self::tag(record)])?;
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&payload)?;
        self.file.write_all(&crc.to_le_bytes())?;
        if self.sync_enabled {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn tag(record: &WalRecord) -> u8 {
        match record {
            WalRecord::PageWrite { .. } => TAG_PAGE_WRITE,
            WalRecord::Commit { .. } => TAG_COMMIT,
            WalRecord::CatalogUpdate { .. } => TAG_CATALOG_UPDATE,
        }
    }

    fn encode(record: &WalRecord) -> Vec<u8> {
        match record {
            WalRecord::PageWrite {
                tx_id,
                file_name,
                page_idx,
                image,
            } => {
                let mut buf = Vec::with_capacity(8 + 2 + file_name.len() + 4 + PAGE_SIZE);
                buf.extend_from_slice(&tx_id.to_le_bytes());
                buf.extend_from_slice(&(file_name.len() as u16).to_le_bytes());
                buf.extend_from_slice(file_name.as_bytes());
                buf.extend_from_slice(&page_idx.to_le_bytes());
                buf.extend_from_slice(image.as_slice());
                buf
            }
            WalRecord::Commit { tx_id } => tx_id.to_le_bytes().to_vec(),
            WalRecord::CatalogUpdate { tx_id, bytes } => {
                let mut buf = Vec::with_capacity(8 + 4 + bytes.len());
                buf.extend_from_slice(&tx_id.to_le_bytes());
                buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf.extend_from_slice(bytes);
                buf
            }
        }
    }

    fn decode(tag: u8, payload: &[u8]) -> Result<WalRecord> {
        match tag {
            TAG_PAGE_WRITE => {
                let tx_id = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                let name_len = u16::from_le_bytes(payload[8..10].try_into().unwrap()) as usize;
                let name_start = 10;
                let file_name = String::from_utf8_lossy(&payload[name_start..name_start + name_len]).into_owned();
                let page_idx_start = name_start + name_len;
                let page_idx = u32::from_le_bytes(
                    payload[page_idx_start..page_idx_start + 4].try_into().unwrap(),
                );
                let image_start = page_idx_start + 4;
                let mut image = Box::new([0u8; PAGE_SIZE]);
                image.copy_from_slice(&payload[image_start..image_start + PAGE_SIZE]);
                Ok(WalRecord::PageWrite {
                    tx_id,
                    file_name,
                    page_idx,
                    image,
                })
            }
            TAG_COMMIT => Ok(WalRecord::Commit {
                tx_id: u64::from_le_bytes(payload[0..8].try_into().unwrap()),
            }),
            TAG_CATALOG_UPDATE => {
                let tx_id = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                let len = u32::from_le_bytes(payload[8..12].try_into().unwrap()) as usize;
                Ok(WalRecord::CatalogUpdate {
                    tx_id,
                    bytes: payload[12..12 + len].to_vec(),
                })
            }
            other => Err(GraphError::Corruption(format!("unknown WAL record tag {other}"))),
        }
    }

    fn read_all_records(&mut self) -> Result<Vec<WalRecord>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut records = Vec::new();
        let mut tag_buf = [0u8; 1];
        let mut len_buf = [0u8; 4];
        loop {
            if !read_exact_or_eof(&mut self.file, &mut tag_buf)? {
                break;
            }
            if !read_exact_or_eof(&mut self.file, &mut len_buf)? {
                return Err(GraphError::Corruption("WAL truncated mid-record".into()));
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            self.file.read_exact(&mut payload)?;
            let mut crc_buf = [0u8; 4];
            self.file.read_exact(&mut crc_buf)?;
            let stored_crc = u32::from_le_bytes(crc_buf);
            if checksum(&payload) != stored_crc {
                return Err(GraphError::Corruption("WAL record checksum mismatch".into()));
            }
            records.push(Self::decode(tag_buf[0], &payload)?);
        }
        self.file.seek(SeekFrom::End(0))?;
        Ok(records)
    }
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            if read == 0 {
                return Ok(false);
            }
            return Err(GraphError::Corruption("WAL contains partial record".into()));
        }
        read += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_then_checkpoint_promotes_shadow() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("n-0-0.col"), []).unwrap();

        let mut wal = Wal::open(dir.path(), true).unwrap();
        wal.begin();
        let image = [7u8; PAGE_SIZE];
        wal.write_page("n-0-0.col", 0, &image).unwrap();
        wal.commit().unwrap();
        wal.checkpoint().unwrap();

        let bytes = std::fs::read(dir.path().join("n-0-0.col")).unwrap();
        let header_size = crate::paged_file::HEADER_SIZE;
        assert_eq!(&bytes[header_size..header_size + PAGE_SIZE], &image[..]);
        assert!(!dir.path().join("n-0-0.col.wal").exists());
    }

    #[test]
    fn promoting_shadow_preserves_untouched_pages() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut pf = PagedFile::open(dir.path().join("n-0-0.col")).unwrap();
            pf.append_page(&[1u8; PAGE_SIZE]).unwrap();
            pf.append_page(&[2u8; PAGE_SIZE]).unwrap();
            pf.fsync().unwrap();
        }

        let mut wal = Wal::open(dir.path(), true).unwrap();
        wal.begin();
        wal.write_page("n-0-0.col", 1, &[9u8; PAGE_SIZE]).unwrap();
        wal.commit().unwrap();
        wal.checkpoint().unwrap();

        let mut pf = PagedFile::open(dir.path().join("n-0-0.col")).unwrap();
        assert_eq!(pf.page_count(), 2);
        let mut page0 = [0u8; PAGE_SIZE];
        pf.read(0, &mut page0).unwrap();
        assert_eq!(page0, [1u8; PAGE_SIZE]);
        let mut page1 = [0u8; PAGE_SIZE];
        pf.read(1, &mut page1).unwrap();
        assert_eq!(page1, [9u8; PAGE_SIZE]);
    }

    #[test]
    fn rollback_discards_shadow() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("n-0-0.col"), [0u8; 10]).unwrap();

        let mut wal = Wal::open(dir.path(), true).unwrap();
        wal.begin();
        wal.write_page("n-0-0.col", 0, &[5u8; PAGE_SIZE]).unwrap();
        wal.rollback().unwrap();

        assert!(!dir.path().join("n-0-0.col.wal").exists());
        let bytes = std::fs::read(dir.path().join("n-0-0.col")).unwrap();
        assert_eq!(bytes, vec![0u8; 10]);
    }

    #[test]
    fn uncommitted_shadow_removed_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("n-0-0.col"), []).unwrap();
        {
            let mut wal = Wal::open(dir.path(), true).unwrap();
            wal.begin();
            wal.write_page("n-0-0.col", 0, &[9u8; PAGE_SIZE]).unwrap();
            // no commit() -- simulates a crash before COMMIT was written
        }
        // reopening replays and should clean up the orphan shadow
        let _wal = Wal::open(dir.path(), true).unwrap();
        assert!(!dir.path().join("n-0-0.col.wal").exists());
    }

    #[test]
    fn replay_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("n-0-0.col"), []).unwrap();
        let mut wal = Wal::open(dir.path(), true).unwrap();
        wal.begin();
        wal.write_page("n-0-0.col", 0, &[3u8; PAGE_SIZE]).unwrap();
        wal.commit().unwrap();
        wal.checkpoint().unwrap();
        let before = std::fs::read(dir.path().join("n-0-0.col")).unwrap();
        wal.replay().unwrap();
        let after = std::fs::read(dir.path().join("n-0-0.col")).unwrap();
        assert_eq!(before, after);
    }
}
