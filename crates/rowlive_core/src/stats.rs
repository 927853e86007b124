//! Context statistics.
//!
//! Counts the store traffic a mirroring context generates.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rowlive_core::Context;
//!
//! let ctx = Context::new(store, Config::default())?;
//!
//! // Mutate records...
//! ann.set("money", 500)?;
//! ctx.settle().await;
//!
//! let stats = ctx.stats().snapshot();
//! println!("Updates: {}", stats.updates);
//! println!("Coalesced: {}", stats.coalesced);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Context statistics and metrics.
///
/// All counters are atomic and can be read while background writes are in
/// flight. Values are monotonically increasing.
#[derive(Debug, Default)]
pub struct ContextStats {
    // Read counters
    /// Total number of gateway reads (columns, rows, counters).
    reads: AtomicU64,
    /// Total number of rows materialised from reads.
    rows_loaded: AtomicU64,

    // Write counters
    /// Total number of inserts issued.
    inserts: AtomicU64,
    /// Total number of updates issued.
    updates: AtomicU64,
    /// Total number of deletes issued.
    deletes: AtomicU64,
    /// Field assignments superseded before their write-back fired.
    coalesced: AtomicU64,

    // Error counters
    /// Total number of background store failures.
    failures: AtomicU64,
}

impl ContextStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, rows: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.rows_loaded.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of gateway reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the total number of rows materialised.
    pub fn rows_loaded(&self) -> u64 {
        self.rows_loaded.load(Ordering::Relaxed)
    }

    /// Returns the total number of inserts issued.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns the total number of updates issued.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns the total number of deletes issued.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns how many field assignments were folded into a later write.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Returns the total number of background failures.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads(),
            rows_loaded: self.rows_loaded(),
            inserts: self.inserts(),
            updates: self.updates(),
            deletes: self.deletes(),
            coalesced: self.coalesced(),
            failures: self.failures(),
        }
    }
}

/// A point-in-time snapshot of context statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total number of gateway reads.
    pub reads: u64,
    /// Total number of rows materialised.
    pub rows_loaded: u64,
    /// Total number of inserts issued.
    pub inserts: u64,
    /// Total number of updates issued.
    pub updates: u64,
    /// Total number of deletes issued.
    pub deletes: u64,
    /// Field assignments folded into a later write.
    pub coalesced: u64,
    /// Total number of background failures.
    pub failures: u64,
}
