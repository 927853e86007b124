//! Error types for store gateway operations.

use thiserror::Error;

/// Result type for store gateway operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a [`crate::StoreGateway`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The table does not exist in the backing store.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// The table name.
        table: String,
    },

    /// No row matched an update or delete.
    #[error("no row in {table} where {identity}")]
    RowNotFound {
        /// The table name.
        table: String,
        /// Rendered identity of the row.
        identity: String,
    },

    /// A single-row read matched zero or several rows.
    #[error("expected 1 row in {table}, {count} rows matched")]
    UnexpectedRowCount {
        /// The table name.
        table: String,
        /// Number of matching rows.
        count: usize,
    },

    /// An insert collided with an existing identifier.
    #[error("duplicate entry {key} in {table}")]
    DuplicateKey {
        /// The table name.
        table: String,
        /// Rendered key.
        key: String,
    },

    /// A write named a column the table does not declare.
    #[error("unknown column {column} in {table}")]
    UnknownColumn {
        /// The table name.
        table: String,
        /// The undeclared column.
        column: String,
    },

    /// The gateway has been closed.
    #[error("store gateway is closed")]
    Closed,

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates an unknown table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
