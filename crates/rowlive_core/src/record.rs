//! Mirrored records.
//!
//! A [`Record`] is the in-memory image of one row. Reads are served from
//! memory. Assigning a field updates memory immediately and schedules a
//! write-back of that field once no further assignment has arrived for the
//! configured write delay, so a burst of changes to one field produces one
//! store update.

use crate::context::{Context, Session};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use rowlive_store::{Identity, Key, Row, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Whether the store has confirmed a record's row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The insert has been issued but not confirmed. Field changes are
    /// buffered until it is.
    Pending,
    /// The row exists in the store.
    Persisted,
}

#[derive(Debug)]
struct FieldSlot {
    value: Value,
    dirty: bool,
    timer: Option<AbortHandle>,
    generation: u64,
}

impl FieldSlot {
    fn new(value: Value) -> Self {
        Self {
            value,
            dirty: false,
            timer: None,
            generation: 0,
        }
    }
}

#[derive(Debug)]
struct RecordState {
    fields: BTreeMap<String, FieldSlot>,
    lifecycle: Lifecycle,
    detached: bool,
}

impl RecordState {
    /// Clears every dirty field without a running timer and returns them.
    fn take_idle_dirty(&mut self) -> Row {
        let mut row = Row::new();
        for (name, slot) in &mut self.fields {
            if slot.dirty && slot.timer.is_none() {
                slot.dirty = false;
                row.insert(name.clone(), slot.value.clone());
            }
        }
        row
    }

    /// Re-marks fields whose write failed, unless they changed meanwhile.
    fn restore_dirty(&mut self, written: &Row) {
        for (name, value) in written {
            if let Some(slot) = self.fields.get_mut(name) {
                if slot.value == *value {
                    slot.dirty = true;
                }
            }
        }
    }
}

/// The mirrored image of one table row.
///
/// Records are shared as `Arc<Record>`; every handle observes the same
/// field values.
///
/// # Example
///
/// ```rust,ignore
/// let ann = players.get(2).expect("Ann is loaded");
/// ann.set("money", 500)?;
/// assert_eq!(ann.get("money"), Some(Value::Integer(500)));
/// // one UPDATE is issued after the write delay
/// ```
pub struct Record {
    session: Arc<Session>,
    table: String,
    identity: Identity,
    state: Mutex<RecordState>,
}

impl Record {
    /// Creates a standalone record from `row`.
    ///
    /// `identifiers` name the columns addressing the row, primary first.
    /// When `persisted` is false the record buffers changes until its
    /// insert is confirmed, which for a standalone record never happens.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty table or identifier list,
    /// and [`CoreError::MissingKey`] if `row` lacks an identifier value.
    pub fn new(
        ctx: &Context,
        row: Row,
        table: &str,
        identifiers: &[String],
        persisted: bool,
    ) -> CoreResult<Arc<Self>> {
        Self::with_session(Arc::clone(ctx.session()), row, table, identifiers, persisted)
    }

    /// Reads one row by identity and mirrors it.
    ///
    /// # Errors
    ///
    /// Fails if the store does not hold exactly one matching row.
    pub fn fetch(ctx: &Context, table: &str, identity: Identity) -> CoreResult<Arc<Self>> {
        let session = ctx.session();
        session.ensure_open()?;
        if table.is_empty() {
            return Err(CoreError::configuration("no table specified"));
        }
        let row = session.read_one(table, &identity)?;
        let identifiers: Vec<String> = identity.columns().map(str::to_string).collect();
        Self::with_session(Arc::clone(session), row, table, &identifiers, true)
    }

    pub(crate) fn with_session(
        session: Arc<Session>,
        row: Row,
        table: &str,
        identifiers: &[String],
        persisted: bool,
    ) -> CoreResult<Arc<Self>> {
        if table.is_empty() {
            return Err(CoreError::configuration("no table specified"));
        }
        if identifiers.is_empty() {
            return Err(CoreError::configuration(format!(
                "no identifiers specified for {table}"
            )));
        }
        let identity = Identity::from_row(identifiers, &row).map_err(|column| {
            CoreError::MissingKey {
                table: table.to_string(),
                key: row
                    .get(&identifiers[0])
                    .map(Value::key_text)
                    .unwrap_or_default(),
                column: column.to_string(),
            }
        })?;
        if identity.primary_value().is_null() {
            return Err(CoreError::MissingKey {
                table: table.to_string(),
                key: String::new(),
                column: identity.primary_column().to_string(),
            });
        }

        for (name, value) in &row {
            if value.is_null() {
                warn!(table, field = %name, identity = %identity, "field is null");
            }
        }

        let fields = row
            .into_iter()
            .map(|(name, value)| (name, FieldSlot::new(value)))
            .collect();
        let lifecycle = if persisted {
            Lifecycle::Persisted
        } else {
            Lifecycle::Pending
        };

        Ok(Arc::new(Self {
            session,
            table: table.to_string(),
            identity,
            state: Mutex::new(RecordState {
                fields,
                lifecycle,
                detached: false,
            }),
        }))
    }

    /// Returns the table this record mirrors.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the identity addressing this record's row.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the collection key (the primary identifier value).
    pub fn key(&self) -> Key {
        self.identity.key()
    }

    /// Returns the lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    /// Returns true once the store has confirmed the row.
    pub fn is_persisted(&self) -> bool {
        self.lifecycle() == Lifecycle::Persisted
    }

    /// Returns the current value of `field`.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.state.lock().fields.get(field).map(|s| s.value.clone())
    }

    /// Returns true if `field` is a field of this record.
    pub fn has_field(&self, field: &str) -> bool {
        self.state.lock().fields.contains_key(field)
    }

    /// Returns the field names.
    pub fn fields(&self) -> Vec<String> {
        self.state.lock().fields.keys().cloned().collect()
    }

    /// Returns all current field values.
    pub fn snapshot(&self) -> Row {
        self.state
            .lock()
            .fields
            .iter()
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect()
    }

    /// Returns true if `field` holds a value the store has not seen yet.
    pub fn is_dirty(&self, field: &str) -> bool {
        self.state.lock().fields.get(field).is_some_and(|s| s.dirty)
    }

    /// Returns the fields holding values the store has not seen yet.
    pub fn dirty_fields(&self) -> Vec<String> {
        self.state
            .lock()
            .fields
            .iter()
            .filter(|(_, s)| s.dirty)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Assigns `field`.
    ///
    /// The new value is visible immediately. The store sees it after the
    /// write delay; an assignment arriving before then restarts the delay
    /// and replaces the pending value. Assigning the current value does
    /// nothing.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidValue`] for NaN
    /// - [`CoreError::IdentifierImmutable`] for identifier fields
    /// - [`CoreError::UnknownField`] for fields the row does not have
    pub fn set(self: &Arc<Self>, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.check_assignment(field, &value)?;
        self.session.ensure_open()?;

        let mut state = self.state.lock();
        let detached = state.detached;
        let slot = state
            .fields
            .get_mut(field)
            .ok_or_else(|| CoreError::unknown_field(&self.table, field))?;
        if slot.value == value {
            return Ok(());
        }
        if value.is_null() {
            warn!(table = %self.table, field, identity = %self.identity, "field set to null");
        }

        slot.value = value;
        slot.dirty = true;
        slot.generation += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
            self.session.stats.record_coalesced();
        }
        if detached {
            return Ok(());
        }

        let generation = slot.generation;
        let record = Arc::clone(self);
        let name = field.to_string();
        let delay = self.session.config.write_delay;
        slot.timer = Some(self.session.spawn(async move {
            tokio::time::sleep(delay).await;
            record.write_back(&name, generation);
        }));
        Ok(())
    }

    /// Validates an assignment without applying it.
    pub(crate) fn check_assignment(&self, field: &str, value: &Value) -> CoreResult<()> {
        if value.is_nan() {
            return Err(CoreError::invalid_value(field, "NaN is not a storable value"));
        }
        if self.identity.contains(field) {
            return Err(CoreError::IdentifierImmutable {
                table: self.table.clone(),
                field: field.to_string(),
            });
        }
        if !self.has_field(field) {
            return Err(CoreError::unknown_field(&self.table, field));
        }
        Ok(())
    }

    /// Writes every dirty field now, in one update.
    ///
    /// Pending write-back timers are cancelled. A record whose insert is
    /// not confirmed keeps its changes buffered and this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the update fails; the fields stay dirty.
    pub fn flush(&self) -> CoreResult<()> {
        self.session.ensure_open()?;
        let fields = {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Persisted || state.detached {
                return Ok(());
            }
            for slot in state.fields.values_mut() {
                if let Some(timer) = slot.timer.take() {
                    timer.abort();
                }
            }
            state.take_idle_dirty()
        };
        if fields.is_empty() {
            return Ok(());
        }
        self.write(&fields).inspect_err(|_| {
            self.state.lock().restore_dirty(&fields);
        })
    }

    /// Marks the insert confirmed and writes changes buffered meanwhile.
    ///
    /// Fields whose timer is still running are left to that timer.
    pub(crate) fn mark_persisted(&self) {
        let fields = {
            let mut state = self.state.lock();
            state.lifecycle = Lifecycle::Persisted;
            if state.detached {
                return;
            }
            state.take_idle_dirty()
        };
        if fields.is_empty() {
            return;
        }
        debug!(table = %self.table, identity = %self.identity, fields = fields.len(), "writing buffered changes");
        if let Err(err) = self.write(&fields) {
            self.state.lock().restore_dirty(&fields);
            self.session.report("buffered update", err);
        }
    }

    /// Stops all write-back for this record.
    pub(crate) fn detach(&self) {
        let mut state = self.state.lock();
        state.detached = true;
        for slot in state.fields.values_mut() {
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
        }
    }

    fn write_back(&self, field: &str, generation: u64) {
        let fields = {
            let mut state = self.state.lock();
            let writable = state.lifecycle == Lifecycle::Persisted && !state.detached;
            let Some(slot) = state.fields.get_mut(field) else {
                return;
            };
            if slot.generation != generation {
                return;
            }
            slot.timer = None;
            if !writable || !slot.dirty {
                return;
            }
            slot.dirty = false;
            let mut row = Row::new();
            row.insert(field.to_string(), slot.value.clone());
            row
        };
        if let Err(err) = self.write(&fields) {
            self.state.lock().restore_dirty(&fields);
            self.session.report("field update", err);
        }
    }

    fn write(&self, fields: &Row) -> CoreResult<()> {
        debug!(
            target: "rowlive::store",
            table = %self.table,
            identity = %self.identity,
            fields = ?fields.keys().collect::<Vec<_>>(),
            "update"
        );
        self.session.update(&self.table, &self.identity, fields)
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.table)
            .field("identity", &self.identity)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use rowlive_store::{row, Column, ColumnType, MemoryStore, StoreOp};
    use std::time::Duration;

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_table(
            "players",
            vec![
                Column::new("id", ColumnType::Integer).auto_increment(),
                Column::new("name", ColumnType::Text),
                Column::new("money", ColumnType::Integer),
            ],
        );
        store
            .seed("players", vec![row! { "id" => 2, "name" => "Ann", "money" => 100 }])
            .unwrap();
        store
    }

    fn ann(ctx: &Context) -> Arc<Record> {
        Record::fetch(ctx, "players", Identity::single("id", 2)).unwrap()
    }

    fn updates(store: &MemoryStore) -> Vec<Row> {
        store
            .journal()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Update { fields, .. } => Some(fields),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_reads_one_row() {
        let store = store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let record = ann(&ctx);

        assert!(record.is_persisted());
        assert_eq!(record.get("name"), Some(Value::from("Ann")));
        assert_eq!(record.key(), Key::from(2));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_missing_row_fails() {
        let ctx = Context::new(store(), Config::default()).unwrap();
        let result = Record::fetch(&ctx, "players", Identity::single("id", 99));
        assert!(matches!(result, Err(CoreError::BackingStore(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn set_is_visible_immediately_and_written_once() {
        let store = store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let record = ann(&ctx);

        record.set("money", 200).unwrap();
        record.set("money", 300).unwrap();
        record.set("money", 500).unwrap();
        assert_eq!(record.get("money"), Some(Value::Integer(500)));
        assert!(updates(&store).is_empty());

        ctx.settle().await;
        assert_eq!(updates(&store), vec![row! { "money" => 500 }]);
        assert_eq!(ctx.stats().coalesced(), 2);
        assert!(!record.is_dirty("money"));
    }

    #[tokio::test(start_paused = true)]
    async fn fields_coalesce_independently() {
        let store = store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let record = ann(&ctx);

        record.set("money", 200).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        record.set("name", "Anna").unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        // money fired at 1000ms, name is still waiting
        assert_eq!(updates(&store), vec![row! { "money" => 200 }]);
        assert!(record.is_dirty("name"));

        ctx.settle().await;
        assert_eq!(updates(&store).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn assigning_current_value_is_a_no_op() {
        let store = store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let record = ann(&ctx);

        record.set("money", 100).unwrap();
        ctx.settle().await;
        assert!(updates(&store).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_assignments_are_rejected() {
        let ctx = Context::new(store(), Config::default()).unwrap();
        let record = ann(&ctx);

        assert!(matches!(
            record.set("id", 3),
            Err(CoreError::IdentifierImmutable { .. })
        ));
        assert!(matches!(
            record.set("money", f64::NAN),
            Err(CoreError::InvalidValue { .. })
        ));
        assert!(matches!(
            record.set("colour", "red"),
            Err(CoreError::UnknownField { .. })
        ));
        assert_eq!(record.get("money"), Some(Value::Integer(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_batches_dirty_fields() {
        let store = store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let record = ann(&ctx);

        record.set("money", 700).unwrap();
        record.set("name", "Anna").unwrap();
        record.flush().unwrap();

        assert_eq!(
            updates(&store),
            vec![row! { "money" => 700, "name" => "Anna" }]
        );
        ctx.settle().await;
        assert_eq!(updates(&store).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_record_buffers_until_persisted() {
        let store = store();
        store
            .seed("players", vec![row! { "id" => 5, "name" => "Cy", "money" => 0 }])
            .unwrap();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let record = Record::new(
            &ctx,
            row! { "id" => 5, "name" => "Cy", "money" => 0 },
            "players",
            &["id".to_string()],
            false,
        )
        .unwrap();

        record.set("money", 10).unwrap();
        ctx.settle().await;
        assert!(updates(&store).is_empty());
        assert!(record.is_dirty("money"));

        record.mark_persisted();
        assert_eq!(updates(&store), vec![row! { "money" => 10 }]);
        assert!(!record.is_dirty("money"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_back_is_reported() {
        let store = store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let record = ann(&ctx);

        store.fail_writes("disk full");
        record.set("money", 1).unwrap();
        ctx.settle().await;

        assert_eq!(ctx.take_failures().len(), 1);
        assert_eq!(ctx.stats().failures(), 1);
        assert!(record.is_dirty("money"));
    }

    #[tokio::test(start_paused = true)]
    async fn detached_record_stops_writing() {
        let store = store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let record = ann(&ctx);

        record.set("money", 1).unwrap();
        record.detach();
        record.set("name", "gone").unwrap();
        ctx.settle().await;
        assert!(updates(&store).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_identifier_is_rejected() {
        let ctx = Context::new(store(), Config::default()).unwrap();
        let result = Record::new(&ctx, row! { "name" => "x" }, "players", &["id".to_string()], true);
        assert!(matches!(result, Err(CoreError::MissingKey { .. })));

        let result = Record::new(&ctx, row! { "id" => 1 }, "players", &[], true);
        assert!(matches!(result, Err(CoreError::Configuration { .. })));
    }
}
