//! Store traits: the append-only history log and its transactions

use crate::core::record::{HistoryRecord, NewRecord, Payload, RowId};
use crate::core::temporal::Timestamp;
use crate::error::Result;
use crate::query::Query;
use async_trait::async_trait;

/// Durable, append-only history of every entity of one type.
///
/// Implementations provide serializable isolation for [`begin`]: two
/// transactions touching the same entity either run one after the other or
/// one of them fails with [`crate::error::Error::Conflict`].
///
/// [`begin`]: HistoryStore::begin
#[async_trait]
pub trait HistoryStore<P: Payload>: Send + Sync {
    type Transaction: StoreTransaction<P>;

    /// Start a serializable read-write transaction
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Read committed rows. Never observes a partially applied transaction
    /// and never takes entity locks.
    async fn query(&self, query: &Query) -> Result<Vec<HistoryRecord<P>>>;
}

/// A unit of work against a [`HistoryStore`].
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction<P: Payload>: Send {
    /// Append a row; ids are handed out in call order
    async fn append(&mut self, record: NewRecord<P>) -> Result<RowId>;

    /// Close the transaction time of exactly one open row
    async fn close_transaction(&mut self, row_id: RowId, at: Timestamp) -> Result<()>;

    /// Read rows as this transaction sees them, including its own writes
    async fn query(&mut self, query: &Query) -> Result<Vec<HistoryRecord<P>>>;

    /// Publish every write atomically
    async fn commit(self) -> Result<()>;

    /// Discard every write
    async fn rollback(self) -> Result<()>;
}
