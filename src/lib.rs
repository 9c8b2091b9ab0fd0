//! Bitemporal-DB: an append-only bitemporal history store
//!
//! Every fact carries two time axes: valid time, when it held in the world,
//! and transaction time, when the store believed it. Rows are never edited
//! in place. An update closes the transaction time of the rows it replaces
//! and appends their successors, so every past belief stays queryable.
//!
//! # Core Concepts
//!
//! - **Intervals**: half-open `[from, to)` ranges where a missing bound is
//!   infinite
//! - **History log**: the append-only store of rows, made durable by a
//!   write-ahead log
//! - **Engine**: splits rows at the edges of an update window and applies a
//!   transform to the covered slice
//! - **Snapshots**: point-in-time reads along either axis
//!
//! # Example
//!
//! ```no_run
//! use bitemporal_db::prelude::*;
//!
//! # async fn example() -> bitemporal_db::error::Result<()> {
//! let db = TaskDB::in_memory();
//!
//! let id = db.create("Buy milk", None).await?;
//! db.update_completed(&id, Some(Timestamp::now())).await?;
//!
//! let history = db.read_history(&id).await?;
//! assert_eq!(history.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod query;
pub mod storage;

/// Task database facade
pub mod db;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::core::*;
    pub use crate::db::TaskDB;
    pub use crate::engine::{BitemporalEngine, Supersession};
    pub use crate::error::{Error, Result};
    pub use crate::query::{Predicate, Query, SnapshotReader};
    pub use crate::storage::*;
}
