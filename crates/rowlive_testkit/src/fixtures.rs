//! Test fixtures and context helpers.
//!
//! Provides a seeded in-memory game store, a context bound to it, and
//! helpers for asserting on the writes the engine issued.

use rowlive_core::{Config, Context};
use rowlive_store::{row, Column, ColumnType, Identity, MemoryStore, Row, StoreOp};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Creates the game store used across the test suite.
///
/// Tables:
/// - `players`: `id` (auto-increment), `name`, `money` (default 0),
///   `joined` (current timestamp); rows Ann (2) and Bo (11), so the next
///   generated id is 12
/// - `shares`: `id` (auto-increment), `player`, `owner`, `amount`
///   (default 1); Ann and Bo each hold one share in the other
/// - `clicks`: `publisher`, `advertiser`, `time` (current timestamp)
/// - `daily`: `day`, `campaign`, `views` (default 0)
pub fn game_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());

    store.create_table(
        "players",
        vec![
            Column::new("id", ColumnType::Integer).auto_increment(),
            Column::new("name", ColumnType::Text),
            Column::new("money", ColumnType::Integer).with_default(0),
            Column::new("joined", ColumnType::Timestamp).current_timestamp(),
        ],
    );
    store
        .seed(
            "players",
            vec![
                row! { "id" => 2, "name" => "Ann", "money" => 100, "joined" => 0 },
                row! { "id" => 11, "name" => "Bo", "money" => 50, "joined" => 0 },
            ],
        )
        .expect("seed players");

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
            ],
        )
        .expect("seed shares");

    store.create_table(
        "clicks",
        vec![
            Column::new("publisher", ColumnType::Integer),
            Column::new("advertiser", ColumnType::Integer),
            Column::new("time", ColumnType::Timestamp).current_timestamp(),
        ],
    );

    store.create_table(
        "daily",
        vec![
            Column::new("day", ColumnType::Text),
            Column::new("campaign", ColumnType::Integer),
            Column::new("views", ColumnType::Integer).with_default(0),
        ],
    );

    store
}

/// A context bound to an inspectable in-memory store.
pub struct TestContext {
    /// The context under test.
    pub ctx: Context,
    /// The store behind it.
    pub store: Arc<MemoryStore>,
}

impl TestContext {
    /// Creates a context over an empty store.
    ///
    /// Must be called inside a tokio runtime.
    pub fn memory(config: Config) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Creates a context over [`game_store`].
    ///
    /// Must be called inside a tokio runtime.
    pub fn game(config: Config) -> Self {
        Self::with_store(game_store(), config)
    }

    /// Creates a context over `store`.
    pub fn with_store(store: Arc<MemoryStore>, config: Config) -> Self {
        init_tracing();
        let ctx = Context::new(store.clone(), config).expect("tokio runtime");
        Self { ctx, store }
    }

    /// Returns the rows inserted into `table`.
    pub fn inserts(&self, table: &str) -> Vec<Row> {
        inserts(&self.store, table)
    }

    /// Returns the field sets written to `table`.
    pub fn updates(&self, table: &str) -> Vec<(Identity, Row)> {
        updates(&self.store, table)
    }

    /// Returns the identities deleted from `table`.
    pub fn deletes(&self, table: &str) -> Vec<Identity> {
        deletes(&self.store, table)
    }
}

impl std::ops::Deref for TestContext {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

/// Returns the rows the journal records as inserted into `table`.
pub fn inserts(store: &MemoryStore, table: &str) -> Vec<Row> {
    store
        .journal()
        .into_iter()
        .filter_map(|op| match op {
            StoreOp::Insert { table: t, row } if t == table => Some(row),
            _ => None,
        })
        .collect()
}

/// Returns the updates the journal records for `table`.
pub fn updates(store: &MemoryStore, table: &str) -> Vec<(Identity, Row)> {
    store
        .journal()
        .into_iter()
        .filter_map(|op| match op {
            StoreOp::Update {
                table: t,
                identity,
                fields,
            } if t == table => Some((identity, fields)),
            _ => None,
        })
        .collect()
}

/// Returns the deletes the journal records for `table`.
pub fn deletes(store: &MemoryStore, table: &str) -> Vec<Identity> {
    store
        .journal()
        .into_iter()
        .filter_map(|op| match op {
            StoreOp::Delete { table: t, identity } if t == table => Some(identity),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowlive_store::StoreGateway;

    #[test]
    fn game_store_next_player_id_is_twelve() {
        let store = game_store();
        assert_eq!(store.read_auto_increment("players").unwrap(), Some(12));
        assert_eq!(store.read_all("players").unwrap().len(), 2);
        assert!(store.read_all("clicks").unwrap().is_empty());
    }

    #[test]
    fn journal_helpers_filter_by_table() {
        let store = game_store();
        store
            .insert("clicks", &row! { "publisher" => 1, "advertiser" => 2 })
            .unwrap();
        store
            .update(
                "players",
                &Identity::single("id", 2),
                &row! { "money" => 1 },
            )
            .unwrap();

        assert_eq!(inserts(&store, "clicks").len(), 1);
        assert!(inserts(&store, "players").is_empty());
        assert_eq!(updates(&store, "players")[0].1, row! { "money" => 1 });
        assert!(deletes(&store, "players").is_empty());
    }
}
