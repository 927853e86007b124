//! Store gateway trait definition.

use crate::column::Column;
use crate::error::StoreResult;
use crate::row::{Identity, Row};

/// The boundary between the mirror engine and a backing relational store.
///
/// Gateways execute parameterised reads and writes. They own connectivity
/// and reconnect policy; the engine never retries a failed call.
///
/// # Invariants
///
/// - `read_one` returns exactly one row or fails
/// - `insert` returns the identifier the store generated, if any
/// - `update` and `delete` address rows by their full [`Identity`]
/// - Gateways must be `Send + Sync`; the engine calls them from background tasks
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing and ephemeral sessions
pub trait StoreGateway: Send + Sync {
    /// Returns column metadata for `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the read fails.
    fn read_columns(&self, table: &str) -> StoreResult<Vec<Column>>;

    /// Returns every row of `table` in store order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the read fails.
    fn read_all(&self, table: &str) -> StoreResult<Vec<Row>>;

    /// Returns the single row of `table` matching `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if zero or several rows match.
    fn read_one(&self, table: &str, identity: &Identity) -> StoreResult<Row>;

    /// Returns the value the store will assign to the next auto-increment
    /// insert, or `None` when the table has no auto-increment column.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the read fails.
    fn read_auto_increment(&self, table: &str) -> StoreResult<Option<i64>>;

    /// Inserts `row` into `table`.
    ///
    /// Returns the generated identifier when the store assigned one.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert is rejected.
    fn insert(&self, table: &str, row: &Row) -> StoreResult<Option<i64>>;

    /// Updates `fields` of the row matching `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update is rejected.
    fn update(&self, table: &str, identity: &Identity, fields: &Row) -> StoreResult<()>;

    /// Deletes the row matching `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete is rejected.
    fn delete(&self, table: &str, identity: &Identity) -> StoreResult<()>;

    /// Closes the connection. Later calls fail with `StoreError::Closed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be shut down cleanly.
    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
