//! Storage layer: the append-only history log and its write-ahead log

pub mod history_log;
pub mod locks;
pub mod store;
pub mod wal;

pub use history_log::*;
pub use store::*;
pub use wal::*;
