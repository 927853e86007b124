//! # rowlive Store
//!
//! Store gateway contract and value types for rowlive.
//!
//! This crate provides the lowest-level abstraction rowlive mirrors from:
//! a gateway that reads and writes rows of a backing relational store.
//!
//! ## Design Principles
//!
//! - Gateways execute reads and writes; they own connectivity and retries
//! - No knowledge of records, collections, joins or write-back timing
//! - Must be `Send + Sync` so background tasks can call them
//! - Rows are plain `column -> Value` maps
//!
//! ## Available Gateways
//!
//! - [`MemoryStore`] - For testing and ephemeral sessions
//!
//! ## Example
//!
//! ```rust
//! use rowlive_store::{row, Column, ColumnType, Identity, MemoryStore, StoreGateway, Value};
//!
//! let store = MemoryStore::new();
//! store.create_table("players", vec![
//!     Column::new("id", ColumnType::Integer),
//!     Column::new("name", ColumnType::Text),
//! ]);
//! store.insert("players", &row! { "id" => 2, "name" => "Ann" }).unwrap();
//!
//! let ann = store.read_one("players", &Identity::single("id", 2)).unwrap();
//! assert_eq!(ann["name"], Value::from("Ann"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod column;
mod error;
mod memory;
mod row;
mod value;

pub use backend::StoreGateway;
pub use column::{Column, ColumnDefault, ColumnType};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, StoreOp};
pub use row::{Identity, Row};
pub use value::{Key, Value};
