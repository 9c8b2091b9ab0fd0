//! History log: append-only bitemporal row store
//!
//! Committed rows are held in memory, indexed by row id and by entity, and
//! made durable through a [`WriteAheadLog`]. Transactions buffer their
//! writes privately and publish them in one step at commit, under the
//! state's write lock, after the WAL has accepted the batch.

use crate::config::Config;
use crate::core::record::{EntityId, HistoryRecord, NewRecord, Payload, RowId};
use crate::core::temporal::Timestamp;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::storage::locks::{EntityGuard, LockTable};
use crate::storage::store::{HistoryStore, StoreTransaction};
use crate::storage::wal::{CommitBatch, FileWal, InMemoryWal, WriteAheadLog};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

struct LogState<P, W> {
    rows: BTreeMap<RowId, HistoryRecord<P>>,
    by_entity: HashMap<EntityId, Vec<RowId>>,
    wal: W,
}

impl<P: Payload, W> LogState<P, W> {
    fn new(wal: W) -> Self {
        Self {
            rows: BTreeMap::new(),
            by_entity: HashMap::new(),
            wal,
        }
    }

    fn scan(&self, query: &Query) -> Vec<HistoryRecord<P>> {
        let mut out: Vec<HistoryRecord<P>> = match &query.entity_id {
            Some(id) => self
                .by_entity
                .get(id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|row_id| self.rows.get(row_id))
                        .filter(|r| query.matches(r))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            None => self
                .rows
                .values()
                .filter(|r| query.matches(r))
                .cloned()
                .collect(),
        };
        query.sort(&mut out);
        out
    }

    fn validate(&self, batch: &CommitBatch<P>) -> Result<()> {
        for (row_id, at) in &batch.closed {
            let row = self.rows.get(row_id).ok_or_else(|| missing_row(*row_id))?;
            check_closable(row, *at)?;
        }
        for record in &batch.appended {
            if self.rows.contains_key(&record.row_id) {
                return Err(Error::Storage(format!(
                    "row {} already exists",
                    record.row_id
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: CommitBatch<P>) {
        for (row_id, at) in batch.closed {
            if let Some(row) = self.rows.get_mut(&row_id) {
                row.transact_to = Some(at);
            }
        }
        for record in batch.appended {
            self.by_entity
                .entry(record.entity_id.clone())
                .or_default()
                .push(record.row_id);
            self.rows.insert(record.row_id, record);
        }
    }
}

fn missing_row(row_id: RowId) -> Error {
    Error::Storage(format!("row {row_id} does not exist"))
}

fn check_closable<P>(row: &HistoryRecord<P>, at: Timestamp) -> Result<()> {
    if let Some(closed) = row.transact_to {
        return Err(Error::Storage(format!(
            "row {} was already closed at {closed}",
            row.row_id
        )));
    }
    if let Some(from) = row.transact_from {
        if at < from {
            return Err(Error::Temporal(format!(
                "cannot close row {} at {at}, before it was recorded at {from}",
                row.row_id
            )));
        }
    }
    Ok(())
}

struct Inner<P, W> {
    state: RwLock<LogState<P, W>>,
    locks: LockTable,
    next_row_id: AtomicU64,
}

/// The history store. Cheap to clone; clones share the same log.
pub struct HistoryLog<P, W> {
    inner: Arc<Inner<P, W>>,
}

impl<P, W> Clone for HistoryLog<P, W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Payload> HistoryLog<P, InMemoryWal<P>> {
    /// Create a volatile log
    pub fn in_memory() -> Self {
        Self::assemble(
            LogState::new(InMemoryWal::new()),
            Config::default().lock_timeout(),
            1,
        )
    }
}

impl<P: Payload> HistoryLog<P, FileWal> {
    /// Open the log file at `path`, replaying everything it holds
    pub fn open<Q: AsRef<Path>>(path: Q, config: &Config) -> Result<Self> {
        config.validate()?;
        let wal = FileWal::open(path, &config.wal)?;
        Self::with_wal(wal, config.lock_timeout())
    }
}

impl<P: Payload, W: WriteAheadLog<P>> HistoryLog<P, W> {
    /// Build a log on top of `wal`, replaying its batches
    pub fn with_wal(mut wal: W, lock_timeout: Duration) -> Result<Self> {
        let batches = wal.replay()?;
        let mut state = LogState::new(wal);
        let mut next_row_id = 1;
        for batch in batches {
            if let Some(max) = batch.appended.iter().map(|r| r.row_id.0).max() {
                next_row_id = next_row_id.max(max + 1);
            }
            state.apply(batch);
        }
        info!(rows = state.rows.len(), next_row_id, "history log ready");
        Ok(Self::assemble(state, lock_timeout, next_row_id))
    }

    fn assemble(state: LogState<P, W>, lock_timeout: Duration, next_row_id: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                locks: LockTable::new(lock_timeout),
                next_row_id: AtomicU64::new(next_row_id),
            }),
        }
    }

    /// Number of committed rows, superseded ones included
    pub async fn len(&self) -> usize {
        self.inner.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Flush the WAL to disk
    pub async fn flush(&self) -> Result<()> {
        self.inner.state.write().await.wal.flush()
    }
}

#[async_trait]
impl<P, W> HistoryStore<P> for HistoryLog<P, W>
where
    P: Payload,
    W: WriteAheadLog<P> + 'static,
{
    type Transaction = LogTransaction<P, W>;

    async fn begin(&self) -> Result<Self::Transaction> {
        Ok(LogTransaction {
            inner: Arc::clone(&self.inner),
            guards: HashMap::new(),
            appended: Vec::new(),
            closed: Vec::new(),
        })
    }

    async fn query(&self, query: &Query) -> Result<Vec<HistoryRecord<P>>> {
        let state = self.inner.state.read().await;
        Ok(state.scan(query))
    }
}

/// Serializable transaction over a [`HistoryLog`]
pub struct LogTransaction<P, W> {
    inner: Arc<Inner<P, W>>,
    guards: HashMap<EntityId, EntityGuard>,
    appended: Vec<HistoryRecord<P>>,
    closed: Vec<(RowId, Timestamp)>,
}

impl<P: Payload, W: WriteAheadLog<P>> LogTransaction<P, W> {
    async fn lock(&mut self, entity_id: &EntityId) -> Result<()> {
        if !self.guards.contains_key(entity_id) {
            let guard = self.inner.locks.acquire(entity_id).await?;
            self.guards.insert(entity_id.clone(), guard);
        }
        Ok(())
    }

    fn closed_at(&self, row_id: RowId) -> Option<Timestamp> {
        self.closed
            .iter()
            .find(|(id, _)| *id == row_id)
            .map(|(_, at)| *at)
    }
}

#[async_trait]
impl<P, W> StoreTransaction<P> for LogTransaction<P, W>
where
    P: Payload,
    W: WriteAheadLog<P> + 'static,
{
    async fn append(&mut self, record: NewRecord<P>) -> Result<RowId> {
        self.lock(&record.entity_id).await?;
        let row_id = RowId(self.inner.next_row_id.fetch_add(1, Ordering::SeqCst));
        self.appended.push(HistoryRecord::from_new(row_id, record));
        Ok(row_id)
    }

    async fn close_transaction(&mut self, row_id: RowId, at: Timestamp) -> Result<()> {
        if let Some(row) = self.appended.iter_mut().find(|r| r.row_id == row_id) {
            check_closable(row, at)?;
            row.transact_to = Some(at);
            return Ok(());
        }

        let entity_id = {
            let state = self.inner.state.read().await;
            let row = state.rows.get(&row_id).ok_or_else(|| missing_row(row_id))?;
            row.entity_id.clone()
        };
        self.lock(&entity_id).await?;

        if let Some(closed) = self.closed_at(row_id) {
            return Err(Error::Storage(format!(
                "row {row_id} was already closed at {closed}"
            )));
        }
        {
            let state = self.inner.state.read().await;
            let row = state.rows.get(&row_id).ok_or_else(|| missing_row(row_id))?;
            check_closable(row, at)?;
        }
        self.closed.push((row_id, at));
        Ok(())
    }

    async fn query(&mut self, query: &Query) -> Result<Vec<HistoryRecord<P>>> {
        let entity_id = query.entity_id.as_ref().ok_or_else(|| {
            Error::Validation("queries inside a transaction must name an entity".to_string())
        })?;
        self.lock(entity_id).await?;

        let mut rows = {
            let state = self.inner.state.read().await;
            state.scan(&Query::entity(entity_id.clone()))
        };
        for row in &mut rows {
            if let Some(at) = self.closed_at(row.row_id) {
                row.transact_to = Some(at);
            }
        }
        rows.extend(self.appended.iter().cloned());
        rows.retain(|r| query.matches(r));
        query.sort(&mut rows);
        Ok(rows)
    }

    async fn commit(self) -> Result<()> {
        // Entity locks stay held until the batch is published.
        let Self {
            inner,
            guards: _guards,
            appended,
            closed,
        } = self;
        let batch = CommitBatch { appended, closed };
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = inner.state.write().await;
        state.validate(&batch)?;
        state.wal.append(&batch)?;

        let (appended, closed) = (batch.appended.len(), batch.closed.len());
        state.apply(batch);
        debug!(appended, closed, "transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(
            appended = self.appended.len(),
            closed = self.closed.len(),
            "transaction rolled back"
        );
        Ok(())
    }
}
