//! C2 — Buffer Manager (interface only, spec.md §4.2). Pins/unpins frames
//! backed by C1's paged files. Eviction policy internals are explicitly
//! out of scope (spec.md §1); this is the `LruCache<PageId, Page>`-backed
//! interface the rest of the engine programs against.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use lru::LruCache;

use crate::error::{GraphError, Result};
use crate::paged_file::{PageIdx, PagedFile};
use crate::types::PAGE_SIZE;

pub type FileId = u32;

/// A cached page image plus its pin count. A frame behind an outstanding
/// pin is never evicted (spec.md §4.2 guarantee).
pub struct Frame {
    pub data: [u8; PAGE_SIZE],
    pub dirty: bool,
    pins: u32,
}

impl Frame {
    fn new(data: [u8; PAGE_SIZE]) -> Self {
        Self {
            data,
            dirty: false,
            pins: 1,
        }
    }
}

struct FileSlot {
    file: Mutex<PagedFile>,
}

/// Pins pages across every open file in one shared cache. Concurrent
/// pinners of the *same* frame observe a consistent snapshot because all
/// mutation happens under the frame's own lock; different frames do not
/// contend (spec.md §4.2: "concurrent pinners observe a consistent
/// snapshot under a reader-writer latch per frame").
pub struct BufferManager {
    files: RwLock<HashMap<FileId, Arc<FileSlot>>>,
    cache: Mutex<LruCache<(FileId, PageIdx), Arc<RwLock<Frame>>>>,
}

impl BufferManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            files: RwLock::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn register_file(&self, file_id: FileId, file: PagedFile) {
        self.files.write().unwrap().insert(
            file_id,
            Arc::new(FileSlot {
                file: Mutex::new(file),
            }),
        );
    }

    fn file_slot(&self, file_id: FileId) -> Result<Arc<FileSlot>> {
        self.files
            .read()
            .unwrap()
            .get(&file_id)
            .cloned()
            .ok_or(GraphError::NotFound("file id not registered with buffer manager"))
    }

    /// Pins page `page_idx` of `file_id`, loading it from disk on a cache
    /// miss. Returns a handle; callers must `unpin` exactly once per pin.
    pub fn pin(&self, file_id: FileId, page_idx: PageIdx) -> Result<Arc<RwLock<Frame>>> {
        let key = (file_id, page_idx);
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(frame) = cache.get(&key) {
                frame.write().unwrap().pins += 1;
                return Ok(frame.clone());
            }
        }

        let slot = self.file_slot(file_id)?;
        let mut buf = [0u8; PAGE_SIZE];
        slot.file.lock().unwrap().read(page_idx, &mut buf)?;
        let frame = Arc::new(RwLock::new(Frame::new(buf)));

        let mut cache = self.cache.lock().unwrap();
        if let Some((evicted_key, evicted_frame)) = cache.push(key, frame.clone()) {
            self.flush_one(evicted_key, &evicted_frame)?;
        }
        Ok(frame)
    }

    /// Releases a pin; `dirty` marks the frame for eventual flush.
    pub fn unpin(&self, file_id: FileId, page_idx: PageIdx, frame: &Arc<RwLock<Frame>>, dirty: bool) {
        let mut guard = frame.write().unwrap();
        guard.dirty |= dirty;
        guard.pins = guard.pins.saturating_sub(1);
        let _ = (file_id, page_idx);
    }

    fn flush_one(&self, key: (FileId, PageIdx), frame: &Arc<RwLock<Frame>>) -> Result<()> {
        let guard = frame.read().unwrap();
        if guard.pins > 0 {
            return Err(GraphError::Internal(
                "buffer manager attempted to evict a pinned frame".into(),
            ));
        }
        if guard.dirty {
            let slot = self.file_slot(key.0)?;
            slot.file.lock().unwrap().write(key.1, &guard.data)?;
        }
        Ok(())
    }

    /// Flushes every dirty frame still resident in the cache.
    pub fn flush_all(&self) -> Result<()> {
        let cache = self.cache.lock().unwrap();
        for (key, frame) in cache.iter() {
            let guard = frame.read().unwrap();
            if guard.dirty {
                let slot = self.file_slot(key.0)?;
                slot.file.lock().unwrap().write(key.1, &guard.data)?;
            }
        }
        Ok(())
    }
}
