//! # rowlive Testkit
//!
//! Test utilities for rowlive.
//!
//! This crate provides:
//! - Seeded in-memory stores and context helpers
//! - Journal inspection helpers for asserting issued writes
//! - Property-based test generators using proptest
//! - Tracing setup for test output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowlive_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_with_players() {
//!     let game = TestContext::game(Config::default());
//!     let players = Collection::load(&game.ctx, TableSpec::new("players")).unwrap();
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use rowlive_core::{
        row, Collection, Config, Context, CoreError, LinkSpec, Log, LogSpec, Row, TableSpec, Value,
    };
}

pub use fixtures::*;
pub use generators::*;
