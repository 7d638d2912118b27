//! Engine and loader configuration: a plain struct with `Default` plus
//! named presets, rather than a builder or env-var-driven layer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncMode {
    /// fsync after every commit.
    Full,
    /// fsync only at checkpoint.
    Checkpoint,
    Off,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub wal_sync_mode: WalSyncMode,
    /// Pages pinned at once by the buffer manager (spec.md §4.2).
    pub page_cache_size: usize,
    pub checksum_enabled: bool,
    /// Bounded wait for readers to drain before a checkpoint gives up
    /// with `TransactionManagerError` (spec.md §5, S6).
    pub checkpoint_wait_timeout_micros: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            wal_sync_mode: WalSyncMode::Full,
            page_cache_size: 4096,
            checksum_enabled: true,
            checkpoint_wait_timeout_micros: None,
        }
    }
}

impl EngineOptions {
    pub fn production() -> Self {
        Self {
            wal_sync_mode: WalSyncMode::Full,
            page_cache_size: 8192,
            checksum_enabled: true,
            checkpoint_wait_timeout_micros: Some(5_000_000),
        }
    }

    pub fn benchmark() -> Self {
        Self {
            wal_sync_mode: WalSyncMode::Off,
            page_cache_size: 65536,
            checksum_enabled: false,
            checkpoint_wait_timeout_micros: None,
        }
    }
}

/// Options for a single `load` invocation (spec.md §6 CLI surface).
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub input_dir: std::path::PathBuf,
    pub output_dir: std::path::PathBuf,
    pub num_threads: usize,
}

impl LoadOptions {
    pub fn new(input_dir: impl Into<std::path::PathBuf>, output_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            num_threads: num_cpus::get(),
        }
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        if let Some(n) = threads {
            self.num_threads = n;
        }
        self
    }
}
