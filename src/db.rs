//! Top-level database handle tying together the catalog, WAL, and
//! updates store for the transactional update path (spec.md §4.7, §5):
//! an `open`/`begin_read`/`begin_write` entry point scoped to this
//! engine's single-writer/multi-reader snapshot model.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::config::EngineOptions;
use crate::error::{GraphError, Result};
use crate::wal::Wal;

/// A process-wide handle to an on-disk graph directory.
///
/// Readers observe `catalog` (the pre-transaction snapshot) until a
/// writer's checkpoint completes; only one writer transaction may be
/// open at a time (spec.md §5 "single writer").
pub struct GraphDb {
    dir: PathBuf,
    options: EngineOptions,
    catalog: RwLock<Catalog>,
    wal: Mutex<Wal>,
    active_readers: AtomicUsize,
}

impl GraphDb {
    pub fn open(dir: impl Into<PathBuf>, options: EngineOptions) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        // Wal::open replays any committed-but-uncheckpointed transaction,
        // which can rewrite catalog.bin in place (spec.md §8 S5) -- so the
        // WAL must be opened, and replay run, before the catalog is read.
        let wal = Wal::open(&dir, options.wal_sync_mode != crate::config::WalSyncMode::Off)?;

        let catalog_path = dir.join("catalog.bin");
        let catalog = if catalog_path.exists() {
            Catalog::load(&catalog_path)?
        } else {
            Catalog::new()
        };

        Ok(Self {
            dir,
            options,
            catalog: RwLock::new(catalog),
            wal: Mutex::new(wal),
            active_readers: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A read-only snapshot handle; holding one prevents a concurrent
    /// writer's checkpoint from completing until it's dropped
    /// (spec.md §5, §8 property 5 "snapshot isolation").
    pub fn begin_read(&self) -> ReadSnapshot<'_> {
        self.active_readers.fetch_add(1, Ordering::SeqCst);
        ReadSnapshot { db: self }
    }

    pub fn catalog_snapshot(&self) -> Catalog {
        self.catalog.read().unwrap().fork()
    }

    /// Starts the single writer transaction (spec.md §4.3/§5). Fails if a
    /// writer is already active, since the WAL-backed commit path here
    /// assumes a single in-flight transaction.
    pub fn begin_write(&self) -> Result<super::transaction::Transaction<'_>> {
        super::transaction::Transaction::begin(self)
    }

    /// Waits, bounded by `checkpoint_wait_timeout_micros`, for all open
    /// readers to drain before a writer's checkpoint proceeds
    /// (spec.md §5, §8 scenario S6).
    pub(crate) fn wait_for_readers_to_drain(&self) -> Result<()> {
        let Some(timeout_micros) = self.options.checkpoint_wait_timeout_micros else {
            while self.active_readers.load(Ordering::SeqCst) > 0 {
                std::thread::yield_now();
            }
            return Ok(());
        };

        let deadline = Instant::now() + Duration::from_micros(timeout_micros);
        while self.active_readers.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                warn!("checkpoint wait timed out with readers still active");
                return Err(GraphError::TransactionManager(
                    "timed out waiting for readers to drain before checkpoint".into(),
                ));
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    pub(crate) fn wal(&self) -> &Mutex<Wal> {
        &self.wal
    }

    pub(crate) fn catalog_lock(&self) -> &RwLock<Catalog> {
        &self.catalog
    }

    pub(crate) fn options(&self) -> &EngineOptions {
        &self.options
    }
}

/// A long-lived read handle. Dropping it releases the reader slot that
/// `wait_for_readers_to_drain` watches.
pub struct ReadSnapshot<'a> {
    db: &'a GraphDb,
}

impl ReadSnapshot<'_> {
    pub fn catalog(&self) -> Catalog {
        self.db.catalog_snapshot()
    }
}

impl Drop for ReadSnapshot<'_> {
    fn drop(&mut self) {
        self.db.active_readers.fetch_sub(1, Ordering::SeqCst);
        debug!("reader snapshot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let db = GraphDb::open(dir.path(), EngineOptions::default()).unwrap();
        assert_eq!(db.catalog_snapshot().node_tables().count(), 0);
    }

    #[test]
    fn checkpoint_times_out_with_reader_held() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = EngineOptions::default();
        options.checkpoint_wait_timeout_micros = Some(10_000);
        let db = GraphDb::open(dir.path(), options).unwrap();

        let _reader = db.begin_read();
        let err = db.wait_for_readers_to_drain().unwrap_err();
        assert!(matches!(err, GraphError::TransactionManager(_)));
    }

    #[test]
    fn checkpoint_succeeds_once_reader_drops() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = EngineOptions::default();
        options.checkpoint_wait_timeout_micros = Some(50_000);
        let db = GraphDb::open(dir.path(), options).unwrap();

        {
            let _reader = db.begin_read();
        }
        db.wait_for_readers_to_drain().unwrap();
    }
}
