//! Multi-dimensional event counting.
//!
//! A [`Log`] mirrors an append-only event table as a tree of counts. For
//! declared keys `k1..kn`, every event increments the count at every
//! ordering of its key values, so any subset of keys can be queried in any
//! order without scanning events:
//!
//! ```text
//! (total)
//! ├── publisher = 100 (total)
//! │   └── advertiser = 200 (count)
//! └── advertiser = 200 (total)
//!     └── publisher = 100 (count)
//! ```

use crate::context::{Context, Registration, Session};
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use rowlive_store::{Row, Value};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A node of the count tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LogNode {
    /// A leaf: events matching the full path.
    Count(u64),
    /// An interior node: its total and the remaining dimensions.
    Group(LogGroup),
}

/// An interior node of the count tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogGroup {
    /// Events matching the path to this node.
    pub total: u64,
    /// Remaining key, then key value, then child node.
    #[serde(flatten)]
    pub dimensions: BTreeMap<String, BTreeMap<String, LogNode>>,
}

impl LogNode {
    /// Returns the number of events counted at this node.
    pub fn total(&self) -> u64 {
        match self {
            LogNode::Count(n) => *n,
            LogNode::Group(group) => group.total,
        }
    }

    /// Returns the values recorded under `key` below this node.
    pub fn dimension(&self, key: &str) -> Option<&BTreeMap<String, LogNode>> {
        match self {
            LogNode::Group(group) => group.dimensions.get(key),
            LogNode::Count(_) => None,
        }
    }

    fn record(&mut self, keys: &[&String], event: &Row) {
        match self {
            LogNode::Count(n) => *n += 1,
            LogNode::Group(group) => {
                group.total += 1;
                for (i, key) in keys.iter().enumerate() {
                    let rest: Vec<&String> = keys
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, k)| *k)
                        .collect();
                    let value = event.get(*key).map_or_else(|| "null".to_string(), Value::key_text);
                    group
                        .dimensions
                        .entry((*key).clone())
                        .or_default()
                        .entry(value)
                        .or_insert_with(|| {
                            if rest.is_empty() {
                                LogNode::Count(0)
                            } else {
                                LogNode::Group(LogGroup::default())
                            }
                        })
                        .record(&rest, event);
                }
            }
        }
    }
}

impl Default for LogNode {
    fn default() -> Self {
        LogNode::Group(LogGroup::default())
    }
}

/// The result of [`Log::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Listing {
    /// The node at the path.
    Node(LogNode),
    /// The values of the requested dimension below the path.
    Values(BTreeMap<String, LogNode>),
    /// The path or dimension has no events.
    Empty,
}

/// Describes an event table.
#[derive(Debug, Clone)]
pub struct LogSpec {
    table: String,
    keys: Vec<String>,
}

impl LogSpec {
    /// Counts events of `table` by `keys`.
    pub fn new<I, S>(table: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

struct LogInner {
    session: Arc<Session>,
    registration: Registration,
    keys: Vec<String>,
    tree: RwLock<LogNode>,
}

impl LogInner {
    fn table(&self) -> &str {
        self.registration.table()
    }

    fn populate(&self) -> CoreResult<()> {
        let rows = self.session.read_all(self.table())?;
        let keys: Vec<&String> = self.keys.iter().collect();
        let mut tree = LogNode::default();
        let mut skipped = 0usize;
        for row in &rows {
            if self.keys.iter().all(|k| row.contains_key(k)) {
                tree.record(&keys, row);
            } else {
                skipped += 1;
            }
        }
        if skipped > 0 {
            warn!(table = %self.table(), skipped, "events without every key were not counted");
        }
        info!(table = %self.table(), events = tree.total(), "log loaded");
        *self.tree.write() = tree;
        Ok(())
    }
}

/// A mirrored event table with multi-dimensional counts.
///
/// Cloning a `Log` yields another handle to the same counts.
#[derive(Clone)]
pub struct Log {
    inner: Arc<LogInner>,
}

impl Log {
    /// Mirrors an event table, blocking until every event is counted.
    ///
    /// # Errors
    ///
    /// - Configuration error for an empty table, no keys, repeated keys, a
    ///   key named `total`, or if async loading is on
    /// - [`CoreError::DuplicateRegistration`] if the table is already mirrored
    pub fn open(ctx: &Context, spec: LogSpec) -> CoreResult<Self> {
        let session = ctx.session();
        session.ensure_open()?;
        session.check_load_mode(false)?;
        let log = Self::register(session, spec)?;
        log.inner.populate()?;
        Ok(log)
    }

    /// Mirrors an event table in the background.
    ///
    /// # Errors
    ///
    /// Configuration error if async loading is off, plus the errors of
    /// [`Log::open`] that precede loading.
    pub fn open_with<F>(ctx: &Context, spec: LogSpec, on_loaded: F) -> CoreResult<Self>
    where
        F: FnOnce(CoreResult<()>) + Send + 'static,
    {
        let session = ctx.session();
        session.ensure_open()?;
        session.check_load_mode(true)?;
        let log = Self::register(session, spec)?;
        let inner = Arc::clone(&log.inner);
        session.spawn(async move {
            let outcome = inner.populate();
            if let Err(err) = &outcome {
                inner.session.report("log load", err.clone());
            }
            on_loaded(outcome);
        });
        Ok(log)
    }

    fn register(session: &Arc<Session>, spec: LogSpec) -> CoreResult<Self> {
        if spec.keys.is_empty() {
            return Err(CoreError::configuration(format!(
                "no keys specified for log {}",
                spec.table
            )));
        }
        let mut seen = HashSet::new();
        if let Some(repeated) = spec.keys.iter().find(|k| !seen.insert(k.as_str())) {
            return Err(CoreError::configuration(format!(
                "key {repeated} is repeated in log {}",
                spec.table
            )));
        }
        if spec.keys.iter().any(|k| k == "total") {
            return Err(CoreError::configuration(format!(
                "key total is reserved for counts in log {}",
                spec.table
            )));
        }
        let registration = session.register(&spec.table)?;
        Ok(Self {
            inner: Arc::new(LogInner {
                session: Arc::clone(session),
                registration,
                keys: spec.keys,
                tree: RwLock::new(LogNode::default()),
            }),
        })
    }

    /// Returns the event table.
    pub fn table(&self) -> &str {
        self.inner.table()
    }

    /// Returns the declared keys.
    pub fn keys(&self) -> &[String] {
        &self.inner.keys
    }

    /// Returns the number of events counted.
    pub fn total(&self) -> u64 {
        self.inner.tree.read().total()
    }

    /// Returns a copy of the whole count tree.
    pub fn snapshot(&self) -> LogNode {
        self.inner.tree.read().clone()
    }

    /// Records an event.
    ///
    /// Counts update immediately; the event row is inserted in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingField`] if the event lacks a declared key.
    pub fn add(&self, event: Row) -> CoreResult<()> {
        let inner = &self.inner;
        inner.session.ensure_open()?;
        if let Some(missing) = inner.keys.iter().find(|k| !event.contains_key(*k)) {
            return Err(CoreError::missing_field(inner.table(), missing));
        }
        if let Some((field, _)) = event.iter().find(|(_, v)| v.is_nan()) {
            return Err(CoreError::invalid_value(field, "NaN is not a storable value"));
        }

        let keys: Vec<&String> = inner.keys.iter().collect();
        inner.tree.write().record(&keys, &event);

        let session = Arc::clone(&inner.session);
        let table = inner.table().to_string();
        debug!(target: "rowlive::store", table = %table, "insert event");
        inner.session.spawn(async move {
            if let Err(err) = session.insert(&table, &event) {
                session.report("event insert", err);
            }
        });
        Ok(())
    }

    fn check_keys<'a, I>(&self, keys: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        for key in keys {
            if !self.inner.keys.iter().any(|k| k == key) {
                return Err(CoreError::unknown_field(self.table(), key));
            }
            if !seen.insert(key) {
                return Err(CoreError::configuration(format!(
                    "key {key} is repeated in a path of log {}",
                    self.table()
                )));
            }
        }
        Ok(())
    }

    fn walk<'t>(&self, tree: &'t LogNode, path: &[(&str, Value)]) -> Option<&'t LogNode> {
        let mut node = tree;
        for (key, value) in path {
            let text = value.key_text();
            match node.dimension(key).and_then(|values| values.get(&text)) {
                Some(next) => node = next,
                None => {
                    warn!(table = %self.table(), key, value = %text, "no events at this path");
                    return None;
                }
            }
        }
        Some(node)
    }

    /// Counts the events matching every `(key, value)` pair of `path`.
    ///
    /// An empty path counts every event. Paths may name keys in any order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] for an undeclared key and a
    /// configuration error for a key named twice.
    pub fn count(&self, path: &[(&str, Value)]) -> CoreResult<u64> {
        self.check_keys(path.iter().map(|(k, _)| *k))?;
        let tree = self.inner.tree.read();
        Ok(self.walk(&tree, path).map_or(0, LogNode::total))
    }

    /// Returns the subtree at `path`, or with `dimension` the counts of
    /// each value of that key below `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] for an undeclared key and a
    /// configuration error for a key named twice, including `dimension`.
    pub fn list(&self, path: &[(&str, Value)], dimension: Option<&str>) -> CoreResult<Listing> {
        self.check_keys(path.iter().map(|(k, _)| *k).chain(dimension))?;
        let tree = self.inner.tree.read();
        let Some(node) = self.walk(&tree, path) else {
            return Ok(Listing::Empty);
        };
        Ok(match dimension {
            None => Listing::Node(node.clone()),
            Some(key) => match node.dimension(key) {
                Some(values) => Listing::Values(values.clone()),
                None => {
                    warn!(table = %self.table(), key, "no values below this path");
                    Listing::Empty
                }
            },
        })
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("table", &self.table())
            .field("keys", &self.keys())
            .field("total", &self.total())
            .finish()
    }
}
