//! Records addressed by several dimensions.
//!
//! A [`Grid`] mirrors a table whose rows are identified by a combination of
//! dimension columns, such as a daily statistics table keyed by
//! `(day, campaign)`. Adding at existing coordinates updates that record
//! instead of inserting a row.

use crate::context::{Context, Registration, Session};
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use parking_lot::RwLock;
use rowlive_store::{Column, Key, Row, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Describes a grid table.
#[derive(Debug, Clone)]
pub struct GridSpec {
    table: String,
    dimensions: Vec<String>,
}

impl GridSpec {
    /// Mirrors `table`, addressing rows by `dimensions`.
    pub fn new<I, S>(table: impl Into<String>, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            dimensions: dimensions.into_iter().map(Into::into).collect(),
        }
    }
}

struct GridInner {
    session: Arc<Session>,
    registration: Registration,
    dimensions: Vec<String>,
    columns: RwLock<Vec<Column>>,
    cells: RwLock<BTreeMap<Vec<Key>, Arc<Record>>>,
}

impl GridInner {
    fn table(&self) -> &str {
        self.registration.table()
    }

    fn coordinates(&self, row: &Row) -> CoreResult<Vec<Key>> {
        self.dimensions
            .iter()
            .map(|d| {
                row.get(d)
                    .map(Key::new)
                    .ok_or_else(|| CoreError::missing_field(self.table(), d))
            })
            .collect()
    }

    /// Rejects values naming no column, and NaN.
    fn check_values(&self, values: &Row) -> CoreResult<()> {
        let columns = self.columns.read();
        for (name, value) in values {
            if !columns.iter().any(|c| &c.name == name) {
                return Err(CoreError::unknown_field(self.table(), name));
            }
            if value.is_nan() {
                return Err(CoreError::invalid_value(name, "NaN is not a storable value"));
            }
        }
        Ok(())
    }

    fn populate(&self) -> CoreResult<()> {
        let table = self.table().to_string();
        let columns = self.session.read_columns(&table)?;
        for dimension in &self.dimensions {
            if !columns.iter().any(|c| &c.name == dimension) {
                return Err(CoreError::configuration(format!(
                    "{table} has no dimension column {dimension}"
                )));
            }
        }
        *self.columns.write() = columns;

        let rows = self.session.read_all(&table)?;
        let mut cells = BTreeMap::new();
        for row in rows {
            let coordinates = self.coordinates(&row).map_err(|err| match err {
                CoreError::MissingField { table, field } => CoreError::MissingKey {
                    table,
                    key: String::new(),
                    column: field,
                },
                other => other,
            })?;
            let record = Record::with_session(
                Arc::clone(&self.session),
                row,
                &table,
                &self.dimensions,
                true,
            )?;
            cells.insert(coordinates, record);
        }
        info!(table = %table, cells = cells.len(), "grid loaded");
        *self.cells.write() = cells;
        Ok(())
    }
}

/// A mirrored table addressed by dimension tuples.
#[derive(Clone)]
pub struct Grid {
    inner: Arc<GridInner>,
}

impl Grid {
    /// Mirrors a grid table, blocking until loaded.
    ///
    /// # Errors
    ///
    /// - Configuration error if grids are disabled, no dimensions are given,
    ///   or async loading is on
    /// - [`CoreError::DuplicateRegistration`] if the table is already mirrored
    pub fn load(ctx: &Context, spec: GridSpec) -> CoreResult<Self> {
        let session = ctx.session();
        session.ensure_open()?;
        session.check_load_mode(false)?;
        let grid = Self::register(session, spec)?;
        grid.inner.populate()?;
        Ok(grid)
    }

    /// Mirrors a grid table in the background.
    ///
    /// # Errors
    ///
    /// Configuration error if async loading is off, plus the errors of
    /// [`Grid::load`] that precede loading.
    pub fn load_with<F>(ctx: &Context, spec: GridSpec, on_loaded: F) -> CoreResult<Self>
    where
        F: FnOnce(CoreResult<()>) + Send + 'static,
    {
        let session = ctx.session();
        session.ensure_open()?;
        session.check_load_mode(true)?;
        let grid = Self::register(session, spec)?;
        let inner = Arc::clone(&grid.inner);
        session.spawn(async move {
            let outcome = inner.populate();
            if let Err(err) = &outcome {
                inner.session.report("grid load", err.clone());
            }
            on_loaded(outcome);
        });
        Ok(grid)
    }

    fn register(session: &Arc<Session>, spec: GridSpec) -> CoreResult<Self> {
        if !session.config.enable_grid {
            return Err(CoreError::configuration("grids are disabled"));
        }
        if spec.dimensions.is_empty() {
            return Err(CoreError::configuration(format!(
                "no dimensions specified for grid {}",
                spec.table
            )));
        }
        let registration = session.register(&spec.table)?;
        Ok(Self {
            inner: Arc::new(GridInner {
                session: Arc::clone(session),
                registration,
                dimensions: spec.dimensions,
                columns: RwLock::new(Vec::new()),
                cells: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    /// Returns the mirrored table.
    pub fn table(&self) -> &str {
        self.inner.table()
    }

    /// Returns the dimension columns.
    pub fn dimensions(&self) -> &[String] {
        &self.inner.dimensions
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.inner.cells.read().len()
    }

    /// Returns true if the grid holds no records.
    pub fn is_empty(&self) -> bool {
        self.inner.cells.read().is_empty()
    }

    /// Returns the record at `coordinates`, given in dimension order.
    pub fn get(&self, coordinates: &[Value]) -> Option<Arc<Record>> {
        let key: Vec<Key> = coordinates.iter().map(Key::new).collect();
        self.inner.cells.read().get(&key).cloned()
    }

    /// Returns every coordinate tuple, in order.
    pub fn keys(&self) -> Vec<Vec<Key>> {
        self.inner.cells.read().keys().cloned().collect()
    }

    /// Returns every record, ordered by coordinates.
    pub fn records(&self) -> Vec<Arc<Record>> {
        self.inner.cells.read().values().cloned().collect()
    }

    /// Adds a row, or updates the record already at its coordinates.
    ///
    /// On update every non-dimension field of `values` is assigned through
    /// [`Record::set`], so the changes coalesce like any other assignment.
    /// On insert, columns absent from `values` take their defaults.
    ///
    /// # Errors
    ///
    /// Nothing is changed when an error is returned.
    /// - [`CoreError::MissingField`] if a dimension value is missing
    /// - [`CoreError::UnknownField`] for values naming no column
    /// - [`CoreError::InvalidValue`] for NaN values
    /// - the errors of [`Record::set`] for the assigned fields
    pub fn add(&self, values: Row) -> CoreResult<Arc<Record>> {
        let inner = &self.inner;
        inner.session.ensure_open()?;
        let coordinates = inner.coordinates(&values)?;
        inner.check_values(&values)?;

        let mut cells = inner.cells.write();
        let existing = cells.get(&coordinates).cloned();
        if let Some(record) = existing {
            drop(cells);
            let changes: Vec<_> = values
                .into_iter()
                .filter(|(field, _)| !inner.dimensions.contains(field))
                .collect();
            for (field, value) in &changes {
                record.check_assignment(field, value)?;
            }
            for (field, value) in changes {
                record.set(&field, value)?;
            }
            return Ok(record);
        }

        let mut data = values;
        for column in inner.columns.read().iter() {
            data.entry(column.name.clone())
                .or_insert_with(|| column.resolve_default());
        }
        let record = Record::with_session(
            Arc::clone(&inner.session),
            data.clone(),
            inner.table(),
            &inner.dimensions,
            false,
        )?;
        cells.insert(coordinates, Arc::clone(&record));
        drop(cells);

        let session = Arc::clone(&inner.session);
        let table = inner.table().to_string();
        let pending = Arc::clone(&record);
        debug!(target: "rowlive::store", table = %table, identity = %record.identity(), "insert");
        inner.session.spawn(async move {
            match session.insert(&table, &data) {
                Ok(_) => pending.mark_persisted(),
                Err(err) => session.report("grid insert", err),
            }
        });
        Ok(record)
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("table", &self.table())
            .field("dimensions", &self.dimensions())
            .field("len", &self.len())
            .finish()
    }
}
