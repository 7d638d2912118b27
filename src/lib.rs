//! # lattice-graph
//!
//! An embedded, on-disk property-graph storage engine: paged binary
//! storage, a separate-chaining primary-key hash index, a parallel CSV
//! bulk loader, and a write-ahead log with checkpoint/replay.
//!
//! ## Quick start
//!
//! ```no_run
//! use lattice_graph::config::{EngineOptions, LoadOptions};
//! use lattice_graph::db::GraphDb;
//! use lattice_graph::loader;
//!
//! loader::load(&LoadOptions::new("./csv", "./graph.db"))?;
//!
//! let db = GraphDb::open("./graph.db", EngineOptions::production())?;
//! let mut tx = db.begin_write()?;
//! tx.commit()?;
//! # Ok::<(), lattice_graph::error::GraphError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`paged_file`] — C1: fixed 4096-byte page file I/O.
//! - [`buffer`] — C2: LRU-backed shared page cache.
//! - [`catalog`] — C3: node/rel table schemas.
//! - [`storage`] — C4: fixed-width columns, chunked adjacency/property
//!   lists, and string overflow.
//! - [`index`] — C5: the primary-key hash index.
//! - [`loader`] — C6: the parallel CSV bulk loader.
//! - [`wal`] — C7: write-ahead log, checkpoint, and replay.
//! - [`transaction`] and [`updates_store`] — single-writer/multi-reader
//!   transactions over buffered property/relationship updates.

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod loader;
pub mod paged_file;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod updates_store;
pub mod wal;

pub use crate::config::{EngineOptions, LoadOptions, WalSyncMode};
pub use crate::db::{GraphDb, ReadSnapshot};
pub use crate::error::{GraphError, Result};
pub use crate::transaction::{Transaction, TxState};
pub use crate::types::{Direction, Multiplicity, NodeId, PropertyType, PropertyValue, TableId};
