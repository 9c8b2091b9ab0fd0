//! Core data types and models

pub mod clock;
pub mod record;
pub mod task;
pub mod temporal;

pub use clock::*;
pub use record::*;
pub use task::*;
pub use temporal::*;
