use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// One variant per error kind in the storage engine's error-kind table.
#[derive(Debug, Error)]
pub enum GraphError {
    /// CSV/JSON header parse failure. Fatal; the load aborts.
    #[error("parser error: {0}")]
    Parser(String),

    /// Value -> declared-type coercion failure, reported with file:line.
    #[error("conversion error at {file}:{line}: {message}")]
    Conversion {
        file: String,
        line: u64,
        message: String,
    },

    /// Paged-file I/O failure. Fatal; triggers WAL rollback.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Aggregation of one or more bulk-loader task failures.
    #[error("loader error: {0}")]
    Loader(String),

    /// Duplicate name or dangling reference in the catalog.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// A writer's bounded wait for readers to drain before checkpoint expired.
    #[error("transaction manager error: {0}")]
    TransactionManager(String),

    /// An on-disk or in-memory invariant was violated; panic-equivalent.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
}

impl GraphError {
    pub fn conversion(file: impl Into<String>, line: u64, message: impl Into<String>) -> Self {
        GraphError::Conversion {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}
