//! Mirrored collections.
//!
//! A [`Collection`] mirrors every row of one table as a keyed set of
//! [`Item`]s. The collection created by [`Collection::load`] is the *root*;
//! queries return *branches*, independent sub-collections over the same
//! shared items. Only a root accepts structural mutations ([`Collection::add`],
//! [`Collection::link`]); [`Collection::kill`] on a branch also removes the
//! item from its root.

mod item;
mod link;
mod query;

pub use item::{Attribute, Constructor, Item, Joined};
pub use link::LinkSpec;
pub use query::{Comparator, Direction, Search};

use crate::context::{Context, Registration, Session};
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use link::{InboundLink, OutboundLink};
use parking_lot::{Mutex, RwLock};
use rowlive_store::{Column, Identity, Key, Row, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Items = Arc<RwLock<HashMap<Key, Arc<Item>>>>;

/// Describes the table a collection mirrors.
#[derive(Clone)]
pub struct TableSpec {
    table: String,
    keys: Vec<String>,
    constructor: Option<Constructor>,
}

impl TableSpec {
    /// Mirrors `table`, identified by `id` unless keys are given.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            keys: Vec::new(),
            constructor: None,
        }
    }

    /// Sets a single identifier column.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys = vec![key.into()];
        self
    }

    /// Sets the identifier columns, primary first.
    #[must_use]
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a value built from each record to its item.
    ///
    /// Read it back with [`Item::extension`].
    #[must_use]
    pub fn constructor<F, T>(mut self, build: F) -> Self
    where
        F: Fn(&Arc<Record>) -> T + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        self.constructor = Some(Arc::new(move |record| {
            Box::new(build(record)) as Box<dyn Any + Send + Sync>
        }));
        self
    }
}

impl std::fmt::Debug for TableSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSpec")
            .field("table", &self.table)
            .field("keys", &self.keys)
            .field("constructor", &self.constructor.is_some())
            .finish()
    }
}

/// State shared by a root collection and all of its branches.
pub(crate) struct Root {
    session: Arc<Session>,
    registration: Registration,
    identifiers: Vec<String>,
    constructor: Option<Constructor>,
    columns: RwLock<Vec<Column>>,
    increment: Mutex<Option<i64>>,
    items: Items,
    outbound: RwLock<Vec<OutboundLink>>,
    inbound: RwLock<Vec<InboundLink>>,
}

impl Root {
    fn table(&self) -> &str {
        self.registration.table()
    }

    fn column(&self, name: &str) -> Option<Column> {
        self.columns.read().iter().find(|c| c.name == name).cloned()
    }

    fn has_auto_identifier(&self) -> bool {
        let columns = self.columns.read();
        self.identifiers
            .iter()
            .any(|key| columns.iter().any(|c| &c.name == key && c.auto_increment))
    }

    /// Reads columns, the id counter and all rows.
    fn populate(&self) -> CoreResult<()> {
        let table = self.table().to_string();
        let columns = self.session.read_columns(&table)?;
        for key in &self.identifiers {
            if !columns.iter().any(|c| &c.name == key) {
                return Err(CoreError::configuration(format!(
                    "{table} has no identifier column {key}"
                )));
            }
        }
        *self.columns.write() = columns;

        let auto = self.has_auto_identifier();
        let counter = if auto {
            self.session.read_auto_increment(&table)?
        } else {
            None
        };

        let rows = self.session.read_all(&table)?;
        let mut loaded = HashMap::with_capacity(rows.len());
        let mut highest = 0;
        for row in rows {
            let record = Record::with_session(
                Arc::clone(&self.session),
                row,
                &table,
                &self.identifiers,
                true,
            )?;
            if let Some(n) = record.identity().primary_value().as_number() {
                highest = highest.max(n as i64);
            }
            let key = record.key();
            let item = Arc::new(Item::new(record, self.constructor.as_ref()));
            if loaded.insert(key.clone(), item).is_some() {
                warn!(table = %table, key = %key, "duplicate primary identifier while loading");
            }
        }
        if auto {
            *self.increment.lock() = Some(counter.unwrap_or(highest + 1));
        }

        info!(table = %table, items = loaded.len(), "collection loaded");
        self.items.write().extend(loaded);
        Ok(())
    }
}

impl Drop for Root {
    /// Clears the link attributes of this table's items.
    fn drop(&mut self) {
        for item in self.items.read().values() {
            item.clear_attributes();
        }
        debug!(table = %self.table(), "collection released");
    }
}

/// A keyed set of mirrored items.
///
/// Cloning a `Collection` yields another handle to the same set.
#[derive(Clone)]
pub struct Collection {
    root: Arc<Root>,
    items: Items,
    branch: bool,
}

impl Collection {
    /// Mirrors a table, blocking until every row is loaded.
    ///
    /// # Errors
    ///
    /// - Configuration error if async loading is on, the table name is
    ///   empty, or an identifier column does not exist
    /// - [`CoreError::DuplicateRegistration`] if the table is already mirrored
    /// - Gateway errors from reading the table
    pub fn load(ctx: &Context, spec: TableSpec) -> CoreResult<Self> {
        let session = ctx.session();
        session.ensure_open()?;
        session.check_load_mode(false)?;
        let collection = Self::register(session, spec)?;
        collection.root.populate()?;
        Ok(collection)
    }

    /// Mirrors a table in the background.
    ///
    /// Returns the empty collection at once; `on_loaded` runs when loading
    /// finishes, with the load outcome.
    ///
    /// # Errors
    ///
    /// Configuration error if async loading is off, plus the registration
    /// errors of [`Collection::load`].
    pub fn load_with<F>(ctx: &Context, spec: TableSpec, on_loaded: F) -> CoreResult<Self>
    where
        F: FnOnce(CoreResult<()>) + Send + 'static,
    {
        let session = ctx.session();
        session.ensure_open()?;
        session.check_load_mode(true)?;
        let collection = Self::register(session, spec)?;
        let root = Arc::clone(&collection.root);
        session.spawn(async move {
            let outcome = root.populate();
            if let Err(err) = &outcome {
                root.session.report("collection load", err.clone());
            }
            on_loaded(outcome);
        });
        Ok(collection)
    }

    fn register(session: &Arc<Session>, spec: TableSpec) -> CoreResult<Self> {
        let registration = session.register(&spec.table)?;
        let identifiers = if spec.keys.is_empty() {
            info!(table = %spec.table, "no keys specified, using id");
            vec!["id".to_string()]
        } else {
            spec.keys
        };
        let items: Items = Arc::new(RwLock::new(HashMap::new()));
        let root = Arc::new(Root {
            session: Arc::clone(session),
            registration,
            identifiers,
            constructor: spec.constructor,
            columns: RwLock::new(Vec::new()),
            increment: Mutex::new(None),
            items: Arc::clone(&items),
            outbound: RwLock::new(Vec::new()),
            inbound: RwLock::new(Vec::new()),
        });
        Ok(Self {
            root,
            items,
            branch: false,
        })
    }

    /// Returns an empty branch of this collection's table.
    pub fn branch(&self) -> Self {
        Self {
            root: Arc::clone(&self.root),
            items: Arc::new(RwLock::new(HashMap::new())),
            branch: true,
        }
    }

    pub(crate) fn branch_of<I>(&self, items: I) -> Self
    where
        I: IntoIterator<Item = (Key, Arc<Item>)>,
    {
        Self {
            root: Arc::clone(&self.root),
            items: Arc::new(RwLock::new(items.into_iter().collect())),
            branch: true,
        }
    }

    fn from_root(root: Arc<Root>) -> Self {
        let items = Arc::clone(&root.items);
        Self {
            root,
            items,
            branch: false,
        }
    }

    /// Returns the mirrored table.
    pub fn table(&self) -> &str {
        self.root.table()
    }

    /// Returns the identifier columns, primary first.
    pub fn identifiers(&self) -> &[String] {
        &self.root.identifiers
    }

    /// Returns the table columns.
    pub fn columns(&self) -> Vec<Column> {
        self.root.columns.read().clone()
    }

    /// Returns true for branches.
    pub fn is_branch(&self) -> bool {
        self.branch
    }

    /// Returns the root collection.
    pub fn root(&self) -> Self {
        Self::from_root(Arc::clone(&self.root))
    }

    /// Returns the next id the collection will allocate, if the table has
    /// an auto-increment identifier.
    pub fn next_id(&self) -> Option<i64> {
        *self.root.increment.lock()
    }

    /// Returns the item with key `key`.
    pub fn get(&self, key: impl Into<Key>) -> Option<Arc<Item>> {
        self.items.read().get(&key.into()).cloned()
    }

    /// Returns true if an item has key `key`.
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.items.read().contains_key(&key.into())
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if there are no items.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Returns the item keys, in no particular order.
    pub fn keys(&self) -> Vec<Key> {
        self.items.read().keys().cloned().collect()
    }

    /// Returns the items, in no particular order.
    pub fn items(&self) -> Vec<Arc<Item>> {
        self.items.read().values().cloned().collect()
    }

    pub(crate) fn entries(&self) -> Vec<(Key, Arc<Item>)> {
        self.items
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub(crate) fn insert_item(&self, key: Key, item: Arc<Item>) {
        self.items.write().insert(key, item);
    }

    /// Adds a row to the table.
    ///
    /// The item is available immediately; the insert is issued in the
    /// background. Missing auto-increment identifiers are allocated locally
    /// and other missing columns take their defaults.
    ///
    /// # Errors
    ///
    /// Nothing is changed when an error is returned.
    /// - [`CoreError::BranchMutation`] on a branch
    /// - [`CoreError::UnknownField`] for values naming no column
    /// - [`CoreError::MissingField`] for an identifier that is neither given
    ///   nor auto-increment
    /// - [`CoreError::DuplicateKey`] if the key is already present
    /// - [`CoreError::InvalidValue`] for NaN values
    pub fn add(&self, values: Row) -> CoreResult<Arc<Item>> {
        let root = &self.root;
        let table = root.table();
        if self.branch {
            return Err(CoreError::BranchMutation {
                table: table.to_string(),
                operation: "add",
            });
        }
        root.session.ensure_open()?;

        let columns = root.columns.read().clone();
        for (name, value) in &values {
            if !columns.iter().any(|c| &c.name == name) {
                return Err(CoreError::unknown_field(table, name));
            }
            if value.is_nan() {
                return Err(CoreError::invalid_value(name, "NaN is not a storable value"));
            }
        }

        let mut data = Row::new();
        for column in &columns {
            let value = match values.get(&column.name) {
                Some(value) => value.clone(),
                None if root.identifiers.contains(&column.name) => continue,
                None => column.resolve_default(),
            };
            data.insert(column.name.clone(), value);
        }

        let mut increment = root.increment.lock();
        let mut allocated = None;
        for key in &root.identifiers {
            if values.contains_key(key) {
                continue;
            }
            match root.column(key) {
                Some(column) if column.auto_increment => {
                    let next = (*increment).ok_or_else(|| {
                        CoreError::invalid_operation(format!("{table} has not finished loading"))
                    })?;
                    data.insert(key.clone(), Value::Integer(next));
                    allocated = Some(next);
                }
                _ => return Err(CoreError::missing_field(table, key)),
            }
        }

        let record = Record::with_session(
            Arc::clone(&root.session),
            data.clone(),
            table,
            &root.identifiers,
            false,
        )?;
        let key = record.key();
        let item = {
            let mut items = self.items.write();
            if items.contains_key(&key) {
                return Err(CoreError::DuplicateKey {
                    table: table.to_string(),
                    column: root.identifiers[0].clone(),
                    key: key.to_string(),
                });
            }
            let item = Arc::new(Item::new(Arc::clone(&record), root.constructor.as_ref()));
            items.insert(key.clone(), Arc::clone(&item));
            item
        };

        let used = allocated.or_else(|| {
            record
                .identity()
                .primary_value()
                .as_number()
                .filter(|_| root.has_auto_identifier())
                .map(|n| n as i64)
        });
        if let (Some(used), Some(next)) = (used, (*increment).as_mut()) {
            *next = (*next).max(used + 1);
        }
        drop(increment);

        link::attach(root, &item);

        let session = Arc::clone(&root.session);
        let table = table.to_string();
        debug!(target: "rowlive::store", table = %table, key = %key, "insert");
        root.session.spawn(async move {
            match session.insert(&table, &data) {
                Ok(generated) => {
                    if let (Some(generated), Some(expected)) = (generated, allocated) {
                        if generated != expected {
                            warn!(
                                table = %table,
                                expected,
                                generated,
                                "store generated a different id than the one allocated"
                            );
                        }
                    }
                    record.mark_persisted();
                }
                Err(err) => session.report("insert", err),
            }
        });
        Ok(item)
    }

    /// Removes an item and deletes its row.
    ///
    /// On a branch the item is removed from the branch and the root. Other
    /// branches and join attributes keep their reference. Returns false if
    /// no item has that key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ContextClosed`] after the context is closed.
    pub fn kill(&self, key: impl Into<Key>) -> CoreResult<bool> {
        let root = &self.root;
        root.session.ensure_open()?;
        let key = key.into();
        if self.branch {
            self.items.write().remove(&key);
        }
        let Some(item) = root.items.write().remove(&key) else {
            warn!(table = %root.table(), key = %key, "kill of an item that does not exist");
            return Ok(false);
        };

        link::forget(root, &item);
        let record = Arc::clone(item.record());
        record.detach();
        let identity: Identity = record.identity().clone();
        let session = Arc::clone(&root.session);
        let table = root.table().to_string();
        debug!(target: "rowlive::store", table = %table, identity = %identity, "delete");
        root.session.spawn(async move {
            if let Err(err) = session.delete(&table, &identity) {
                session.report("delete", err);
            }
        });
        Ok(true)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("table", &self.table())
            .field("branch", &self.branch)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use rowlive_store::{row, ColumnType, MemoryStore, StoreOp};

    pub(super) fn game_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_table(
            "players",
            vec![
                Column::new("id", ColumnType::Integer).auto_increment(),
                Column::new("name", ColumnType::Text),
                Column::new("money", ColumnType::Integer).with_default(0),
            ],
        );
        store
            .seed(
                "players",
                vec![
                    row! { "id" => 2, "name" => "Ann", "money" => 100 },
                    row! { "id" => 11, "name" => "Bo", "money" => 50 },
                ],
            )
            .unwrap();
        store.create_table(
            "shares",
            vec![
                Column::new("id", ColumnType::Integer).auto_increment(),
                Column::new("player", ColumnType::Integer),
                Column::new("owner", ColumnType::Integer),
                Column::new("amount", ColumnType::Integer).with_default(1),
            ],
        );
        store
            .seed(
                "shares",
                vec![
                    row! { "id" => 1, "player" => 2, "owner" => 11, "amount" => 3 },
                    row! { "id" => 2, "player" => 11, "owner" => 2, "amount" => 5 },
                    row! { "id" => 3, "player" => 2, "owner" => 2, "amount" => 1 },
                ],
            )
            .unwrap();
        store
    }

    fn inserts(store: &MemoryStore) -> Vec<Row> {
        store
            .journal()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Insert { row, .. } => Some(row),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn load_mirrors_all_rows() {
        let store = game_store();
        let ctx = Context::new(store, Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();

        assert_eq!(players.len(), 2);
        assert_eq!(players.identifiers(), ["id".to_string()]);
        assert_eq!(players.get(2).unwrap().get("name"), Some(Value::from("Ann")));
        assert_eq!(players.next_id(), Some(12));
        assert!(!players.is_branch());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_registration_is_rejected() {
        let ctx = Context::new(game_store(), Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();

        assert!(matches!(
            Collection::load(&ctx, TableSpec::new("players")),
            Err(CoreError::DuplicateRegistration { .. })
        ));
        drop(players);
        assert!(Collection::load(&ctx, TableSpec::new("players")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_identifier_column_is_rejected() {
        let ctx = Context::new(game_store(), Config::default()).unwrap();
        let result = Collection::load(&ctx, TableSpec::new("players").key("uuid"));
        assert!(matches!(result, Err(CoreError::Configuration { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn callback_requires_async_mode() {
        let ctx = Context::new(game_store(), Config::default()).unwrap();
        let result = Collection::load_with(&ctx, TableSpec::new("players"), |_| {});
        assert!(matches!(result, Err(CoreError::Configuration { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn async_load_fills_in_background() {
        let ctx = Context::new(game_store(), Config::default().async_loading(true)).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let players = Collection::load_with(&ctx, TableSpec::new("players"), move |outcome| {
            let _ = tx.send(outcome);
        })
        .unwrap();

        assert!(players.is_empty());
        rx.await.unwrap().unwrap();
        assert_eq!(players.len(), 2);
        assert!(matches!(
            Collection::load(&ctx, TableSpec::new("shares")),
            Err(CoreError::Configuration { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn add_allocates_ids_and_defaults() {
        let store = game_store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();

        let cy = players.add(row! { "name" => "Cy" }).unwrap();
        assert_eq!(cy.key(), Key::from(12));
        assert_eq!(cy.get("money"), Some(Value::Integer(0)));
        assert!(!cy.record().is_persisted());
        assert_eq!(players.next_id(), Some(13));

        ctx.settle().await;
        assert!(cy.record().is_persisted());
        assert_eq!(
            inserts(&store),
            vec![row! { "id" => 12, "name" => "Cy", "money" => 0 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_id_advances_counter() {
        let ctx = Context::new(game_store(), Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();

        players.add(row! { "id" => 40, "name" => "Di" }).unwrap();
        assert_eq!(players.next_id(), Some(41));
        let next = players.add(row! { "name" => "Ed" }).unwrap();
        assert_eq!(next.key(), Key::from(41));
    }

    #[tokio::test(start_paused = true)]
    async fn add_validates_before_mutating() {
        let store = game_store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();

        assert!(matches!(
            players.add(row! { "id" => 2, "name" => "Again" }),
            Err(CoreError::DuplicateKey { .. })
        ));
        assert!(matches!(
            players.add(row! { "colour" => "red" }),
            Err(CoreError::UnknownField { .. })
        ));
        assert!(matches!(
            players.branch().add(row! { "name" => "Fay" }),
            Err(CoreError::BranchMutation { .. })
        ));
        assert_eq!(players.len(), 2);
        assert_eq!(players.next_id(), Some(12));

        ctx.settle().await;
        assert!(inserts(&store).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn add_requires_non_generated_identifiers() {
        let ctx = Context::new(game_store(), Config::default()).unwrap();
        let shares = Collection::load(&ctx, TableSpec::new("shares").keys(["player", "owner"]))
            .unwrap();
        assert!(matches!(
            shares.add(row! { "owner" => 2 }),
            Err(CoreError::MissingField { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn changes_before_confirmation_are_written_after_it() {
        let store = game_store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();

        let cy = players.add(row! { "name" => "Cy" }).unwrap();
        cy.set("money", 9).unwrap();
        ctx.settle().await;

        let row = store
            .rows("players")
            .into_iter()
            .find(|r| r.get("id") == Some(&Value::Integer(12)))
            .unwrap();
        assert_eq!(row["money"], Value::Integer(9));
    }

    #[tokio::test(start_paused = true)]
    async fn kill_removes_from_root_and_deletes() {
        let store = game_store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();
        let everyone = players.branch_of(players.entries());
        let bo = players.find(&row! { "name" => "Bo" });

        assert!(everyone.kill(11).unwrap());
        assert!(!players.contains(11));
        assert!(!everyone.contains(11));
        assert!(bo.contains(11));
        assert!(!players.kill(11).unwrap());

        ctx.settle().await;
        assert_eq!(store.rows("players").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_insert_is_reported() {
        let store = game_store();
        let ctx = Context::new(store.clone(), Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();

        store.fail_writes("read only");
        let cy = players.add(row! { "name" => "Cy" }).unwrap();
        ctx.settle().await;

        assert!(!cy.record().is_persisted());
        assert!(players.contains(12));
        assert_eq!(ctx.take_failures().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn constructor_builds_extensions() {
        struct Wallet(i64);

        let ctx = Context::new(game_store(), Config::default()).unwrap();
        let spec = TableSpec::new("players").constructor(|record| {
            Wallet(
                record
                    .get("money")
                    .and_then(|v| v.as_integer())
                    .unwrap_or_default(),
            )
        });
        let players = Collection::load(&ctx, spec).unwrap();

        assert_eq!(players.get(2).unwrap().extension::<Wallet>().unwrap().0, 100);
        let cy = players.add(row! { "name" => "Cy", "money" => 7 }).unwrap();
        assert_eq!(cy.extension::<Wallet>().unwrap().0, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_context_rejects_mutations() {
        let ctx = Context::new(game_store(), Config::default()).unwrap();
        let players = Collection::load(&ctx, TableSpec::new("players")).unwrap();
        ctx.close().await.unwrap();

        assert_eq!(
            players.add(row! { "name" => "Cy" }).unwrap_err(),
            CoreError::ContextClosed
        );
        assert_eq!(players.kill(2).unwrap_err(), CoreError::ContextClosed);
    }
}
