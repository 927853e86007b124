//! # rowlive Core
//!
//! Live in-memory mirrors of relational tables.
//!
//! This crate provides:
//! - [`Record`]s whose field assignments are written back to the store
//!   after a coalescing delay
//! - [`Collection`]s mirroring whole tables, with queries returning
//!   independent branches
//! - Links keeping one-to-many joins between collections current
//! - [`Log`]s counting events over every combination of their keys
//! - [`Grid`]s addressing records by several dimensions
//!
//! ## Example
//!
//! ```rust,ignore
//! use rowlive_core::{row, Collection, Config, Context, LinkSpec, TableSpec};
//!
//! let ctx = Context::new(store, Config::default())?;
//! let players = Collection::load(&ctx, TableSpec::new("players"))?;
//! let shares = Collection::load(&ctx, TableSpec::new("shares"))?;
//! players.link(&shares, LinkSpec::new("owner").attribute("investments"))?;
//!
//! let ann = players.get(2).expect("loaded");
//! ann.set("money", 500)?;
//! shares.add(row! { "player" => 11, "owner" => 2 })?;
//! assert_eq!(ann.joined("investments").map(|c| c.len()), Some(3));
//!
//! ctx.close().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod context;
mod error;
mod grid;
mod log;
mod record;
mod stats;

pub use collection::{
    Attribute, Collection, Comparator, Constructor, Direction, Item, Joined, LinkSpec, Search,
    TableSpec,
};
pub use config::Config;
pub use context::Context;
pub use error::{CoreError, CoreResult};
pub use grid::{Grid, GridSpec};
pub use log::{Listing, Log, LogGroup, LogNode, LogSpec};
pub use record::{Lifecycle, Record};
pub use stats::{ContextStats, StatsSnapshot};

pub use rowlive_store::{row, Identity, Key, Row, StoreGateway, Value};

/// rowlive version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
