//! In-memory store gateway for testing.

use crate::backend::StoreGateway;
use crate::column::Column;
use crate::error::{StoreError, StoreResult};
use crate::row::{Identity, Row};
use crate::value::{Key, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A write the gateway accepted, as recorded in the journal.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// A row was inserted.
    Insert {
        /// Target table.
        table: String,
        /// The inserted row, after defaults and generated ids.
        row: Row,
    },
    /// Fields of a row were updated.
    Update {
        /// Target table.
        table: String,
        /// Addressed row.
        identity: Identity,
        /// Updated fields.
        fields: Row,
    },
    /// A row was deleted.
    Delete {
        /// Target table.
        table: String,
        /// Addressed row.
        identity: Identity,
    },
}

impl StoreOp {
    /// Returns the table this write targeted.
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemTable {
    columns: Vec<Column>,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemTable {
    fn auto_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.auto_increment)
            .map(|c| c.name.as_str())
    }

    fn check_columns(&self, table: &str, row: &Row) -> StoreResult<()> {
        match row
            .keys()
            .find(|name| !self.columns.iter().any(|c| &c.name == *name))
        {
            Some(column) => Err(StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Applies generated ids and defaults, returning the generated id.
    fn complete(&mut self, table: &str, row: &mut Row) -> StoreResult<Option<i64>> {
        let mut generated = None;
        if let Some(auto) = self.auto_column().map(str::to_string) {
            let id = match row.get(&auto) {
                Some(Value::Null) | None => {
                    let id = self.next_id;
                    row.insert(auto.clone(), Value::Integer(id));
                    generated = Some(id);
                    id
                }
                Some(value) => value
                    .as_number()
                    .map(|n| n as i64)
                    .ok_or_else(|| StoreError::backend(format!("{auto} is not numeric")))?,
            };
            let key = Key::from(id);
            if self
                .rows
                .iter()
                .any(|r| r.get(&auto).map(Key::new).as_ref() == Some(&key))
            {
                return Err(StoreError::DuplicateKey {
                    table: table.to_string(),
                    key: key.to_string(),
                });
            }
            self.next_id = self.next_id.max(id + 1);
        }
        for column in &self.columns {
            row.entry(column.name.clone())
                .or_insert_with(|| column.resolve_default());
        }
        Ok(generated)
    }
}

/// An in-memory store gateway.
///
/// This gateway keeps tables in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral sessions that don't need persistence
///
/// Every accepted write is appended to a journal so tests can assert
/// exactly which writes the engine issued. Writes can be made to fail to
/// exercise error propagation.
///
/// # Example
///
/// ```rust
/// use rowlive_store::{row, Column, ColumnType, MemoryStore, StoreGateway};
///
/// let store = MemoryStore::new();
/// store.create_table(
///     "players",
///     vec![
///         Column::new("id", ColumnType::Integer).auto_increment(),
///         Column::new("name", ColumnType::Text),
///     ],
/// );
/// let id = store.insert("players", &row! { "name" => "Ann" }).unwrap();
/// assert_eq!(id, Some(1));
/// assert_eq!(store.read_all("players").unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemTable>>,
    journal: RwLock<Vec<StoreOp>>,
    failure: RwLock<Option<String>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) a table. Auto-increment starts at 1.
    pub fn create_table(&self, table: impl Into<String>, columns: Vec<Column>) {
        self.tables.write().insert(
            table.into(),
            MemTable {
                columns,
                rows: Vec::new(),
                next_id: 1,
            },
        );
    }

    /// Seeds rows without recording them in the journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or a row collides.
    pub fn seed(&self, table: &str, rows: Vec<Row>) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let mem = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::unknown_table(table))?;
        for mut row in rows {
            mem.complete(table, &mut row)?;
            mem.rows.push(row);
        }
        Ok(())
    }

    /// Sets the next auto-increment value of a table.
    pub fn set_auto_increment(&self, table: &str, next: i64) {
        if let Some(mem) = self.tables.write().get_mut(table) {
            mem.next_id = next;
        }
    }

    /// Returns a copy of all rows of a table.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Returns a copy of the write journal.
    #[must_use]
    pub fn journal(&self) -> Vec<StoreOp> {
        self.journal.read().clone()
    }

    /// Drains the write journal.
    pub fn take_journal(&self) -> Vec<StoreOp> {
        std::mem::take(&mut *self.journal.write())
    }

    /// Makes every subsequent write fail with a backend error.
    pub fn fail_writes(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Lets writes succeed again.
    pub fn restore_writes(&self) {
        *self.failure.write() = None;
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_open()?;
        match self.failure.read().as_ref() {
            Some(message) => Err(StoreError::backend(message.clone())),
            None => Ok(()),
        }
    }
}

impl StoreGateway for MemoryStore {
    fn read_columns(&self, table: &str) -> StoreResult<Vec<Column>> {
        self.check_open()?;
        debug!(target: "rowlive::store", "SHOW COLUMNS FROM {table}");
        self.tables
            .read()
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| StoreError::unknown_table(table))
    }

    fn read_all(&self, table: &str) -> StoreResult<Vec<Row>> {
        self.check_open()?;
        debug!(target: "rowlive::store", "SELECT * FROM {table}");
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| StoreError::unknown_table(table))
    }

    fn read_one(&self, table: &str, identity: &Identity) -> StoreResult<Row> {
        self.check_open()?;
        debug!(target: "rowlive::store", "SELECT * FROM {table} WHERE {identity}");
        let tables = self.tables.read();
        let mem = tables
            .get(table)
            .ok_or_else(|| StoreError::unknown_table(table))?;
        let matches: Vec<&Row> = mem.rows.iter().filter(|r| identity.matches(r)).collect();
        match matches.as_slice() {
            [row] => Ok((*row).clone()),
            other => Err(StoreError::UnexpectedRowCount {
                table: table.to_string(),
                count: other.len(),
            }),
        }
    }

    fn read_auto_increment(&self, table: &str) -> StoreResult<Option<i64>> {
        self.check_open()?;
        let tables = self.tables.read();
        let mem = tables
            .get(table)
            .ok_or_else(|| StoreError::unknown_table(table))?;
        Ok(mem.auto_column().map(|_| mem.next_id))
    }

    fn insert(&self, table: &str, row: &Row) -> StoreResult<Option<i64>> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let mem = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::unknown_table(table))?;
        mem.check_columns(table, row)?;
        let mut row = row.clone();
        let generated = mem.complete(table, &mut row)?;
        debug!(target: "rowlive::store", "INSERT INTO {table} SET {row:?}");
        mem.rows.push(row.clone());
        self.journal.write().push(StoreOp::Insert {
            table: table.to_string(),
            row,
        });
        Ok(generated)
    }

    fn update(&self, table: &str, identity: &Identity, fields: &Row) -> StoreResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let mem = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::unknown_table(table))?;
        mem.check_columns(table, fields)?;
        debug!(target: "rowlive::store", "UPDATE {table} SET {fields:?} WHERE {identity}");
        let mut touched = 0;
        for row in mem.rows.iter_mut().filter(|r| identity.matches(r)) {
            for (column, value) in fields {
                row.insert(column.clone(), value.clone());
            }
            touched += 1;
        }
        if touched == 0 {
            return Err(StoreError::RowNotFound {
                table: table.to_string(),
                identity: identity.to_string(),
            });
        }
        self.journal.write().push(StoreOp::Update {
            table: table.to_string(),
            identity: identity.clone(),
            fields: fields.clone(),
        });
        Ok(())
    }

    fn delete(&self, table: &str, identity: &Identity) -> StoreResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let mem = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::unknown_table(table))?;
        debug!(target: "rowlive::store", "DELETE FROM {table} WHERE {identity}");
        let before = mem.rows.len();
        mem.rows.retain(|r| !identity.matches(r));
        if mem.rows.len() == before {
            return Err(StoreError::RowNotFound {
                table: table.to_string(),
                identity: identity.to_string(),
            });
        }
        self.journal.write().push(StoreOp::Delete {
            table: table.to_string(),
            identity: identity.clone(),
        });
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
