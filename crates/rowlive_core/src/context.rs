//! Mirroring context and session state.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::stats::ContextStats;
use parking_lot::Mutex;
use rowlive_store::{Column, Identity, Row, StoreGateway};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error};

/// The main mirroring handle.
///
/// `Context` owns everything mirrors share:
/// - The store gateway
/// - The configuration switches
/// - The runtime background writes and timers run on
/// - The guard that keeps each table mirrored at most once
///
/// # Opening a Context
///
/// ```rust,ignore
/// use rowlive_core::{Collection, Config, Context, TableSpec};
///
/// let ctx = Context::new(store, Config::default())?;
/// let players = Collection::load(&ctx, TableSpec::new("players"))?;
///
/// // ... mutate records ...
///
/// // Wait for pending write-backs, then close the gateway
/// ctx.close().await?;
/// ```
///
/// Cloning a `Context` yields another handle to the same session.
#[derive(Clone)]
pub struct Context {
    session: Arc<Session>,
}

impl Context {
    /// Opens a context on the tokio runtime the caller runs in.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when called outside a tokio runtime.
    pub fn new(gateway: Arc<dyn StoreGateway>, config: Config) -> CoreResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| CoreError::configuration("a tokio runtime is required to open a context"))?;
        Ok(Self::with_runtime(gateway, config, runtime))
    }

    /// Opens a context that runs background work on `runtime`.
    pub fn with_runtime(gateway: Arc<dyn StoreGateway>, config: Config, runtime: Handle) -> Self {
        Self {
            session: Arc::new(Session {
                gateway,
                config,
                runtime,
                registry: Mutex::new(HashSet::new()),
                tasks: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
                stats: ContextStats::new(),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.session.config
    }

    /// Returns the context statistics.
    pub fn stats(&self) -> &ContextStats {
        &self.session.stats
    }

    /// Returns whether the context accepts mutations.
    pub fn is_open(&self) -> bool {
        self.session.open.load(Ordering::Acquire)
    }

    /// Returns true if `table` is currently mirrored.
    pub fn is_registered(&self, table: &str) -> bool {
        self.session.registry.lock().contains(table)
    }

    /// Drains the background failures collected so far.
    ///
    /// Background inserts, updates and deletes cannot return their error to
    /// the caller that scheduled them; they land here instead.
    pub fn take_failures(&self) -> Vec<CoreError> {
        std::mem::take(&mut *self.session.failures.lock())
    }

    /// Waits until every background task has finished.
    ///
    /// This includes pending write-back timers, so it returns only after
    /// every dirty field has been written (or its write failed).
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.session.tasks.lock());
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                // Superseded write-back timers finish as cancelled.
                let _ = handle.await;
            }
        }
    }

    /// Settles pending writes, closes the gateway and rejects further
    /// mutations.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway fails to close.
    pub async fn close(&self) -> CoreResult<()> {
        self.settle().await;
        self.session.open.store(false, Ordering::Release);
        self.session.gateway.close()?;
        Ok(())
    }

    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.session.config)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Shared session state behind a [`Context`].
pub(crate) struct Session {
    gateway: Arc<dyn StoreGateway>,
    pub(crate) config: Config,
    runtime: Handle,
    registry: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    failures: Mutex<Vec<CoreError>>,
    open: AtomicBool,
    pub(crate) stats: ContextStats,
}

impl Session {
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::ContextClosed)
        }
    }

    /// Rejects the construction mode that does not match the global switch.
    pub(crate) fn check_load_mode(&self, with_callback: bool) -> CoreResult<()> {
        match (self.config.async_loading, with_callback) {
            (false, true) => Err(CoreError::configuration(
                "can not have a completion callback when async loading is off",
            )),
            (true, false) => Err(CoreError::configuration(
                "async loading is on; pass a completion callback",
            )),
            _ => Ok(()),
        }
    }

    /// Claims `table` for one mirror.
    pub(crate) fn register(self: &Arc<Self>, table: &str) -> CoreResult<Registration> {
        if table.is_empty() {
            return Err(CoreError::configuration("no table specified"));
        }
        if !self.registry.lock().insert(table.to_string()) {
            return Err(CoreError::DuplicateRegistration {
                table: table.to_string(),
            });
        }
        Ok(Registration {
            session: Arc::downgrade(self),
            table: table.to_string(),
        })
    }

    /// Runs `future` in the background and tracks it for [`Context::settle`].
    pub(crate) fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.runtime.spawn(future);
        let abort = handle.abort_handle();
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
        abort
    }

    /// Records a failure that has no caller to return to.
    pub(crate) fn report(&self, what: &str, err: CoreError) {
        error!(error = %err, "{what} failed");
        self.stats.record_failure();
        self.failures.lock().push(err);
    }

    pub(crate) fn read_columns(&self, table: &str) -> CoreResult<Vec<Column>> {
        let columns = self.gateway.read_columns(table)?;
        self.stats.record_read(0);
        Ok(columns)
    }

    pub(crate) fn read_all(&self, table: &str) -> CoreResult<Vec<Row>> {
        let rows = self.gateway.read_all(table)?;
        self.stats.record_read(rows.len() as u64);
        debug!(table, rows = rows.len(), "rows loaded");
        Ok(rows)
    }

    pub(crate) fn read_one(&self, table: &str, identity: &Identity) -> CoreResult<Row> {
        let row = self.gateway.read_one(table, identity)?;
        self.stats.record_read(1);
        Ok(row)
    }

    pub(crate) fn read_auto_increment(&self, table: &str) -> CoreResult<Option<i64>> {
        let next = self.gateway.read_auto_increment(table)?;
        self.stats.record_read(0);
        Ok(next)
    }

    pub(crate) fn insert(&self, table: &str, row: &Row) -> CoreResult<Option<i64>> {
        self.stats.record_insert();
        Ok(self.gateway.insert(table, row)?)
    }

    pub(crate) fn update(&self, table: &str, identity: &Identity, fields: &Row) -> CoreResult<()> {
        self.stats.record_update();
        Ok(self.gateway.update(table, identity, fields)?)
    }

    pub(crate) fn delete(&self, table: &str, identity: &Identity) -> CoreResult<()> {
        self.stats.record_delete();
        Ok(self.gateway.delete(table, identity)?)
    }
}

/// Keeps a table claimed until the owning mirror is dropped.
pub(crate) struct Registration {
    session: Weak<Session>,
    table: String,
}

impl Registration {
    pub(crate) fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.registry.lock().remove(&self.table);
        }
    }
}
