//! Bitemporal update engine
//!
//! An update asserts a fact over a valid-time window `[from, to)`. Every
//! transaction-time-current row overlapping the window is superseded: its
//! transaction time is closed at `now` and up to three replacement rows are
//! appended, in this order:
//!
//! 1. the left remainder, `[row.from, from)`, with the original payload;
//! 2. the transformed slice, `[max(from, row.from), min(to, row.to))`, unless
//!    the transform deletes it;
//! 3. the right remainder, `[to, row.to)`, with the original payload.
//!
//! Rows are processed in ascending `valid_from` order and the store hands
//! out row ids in append order, so the ids of one update are causally
//! ordered. All of it happens inside one store transaction.
//!
//! `now` is read from the caller's [`Clock`] after the entity lock is taken.
//! If the entity already carries a row stamped later than that instant,
//! another writer committed first and the call fails with
//! [`Error::Conflict`].

use crate::core::clock::Clock;
use crate::core::record::{EntityId, HistoryRecord, NewRecord, Payload, RowId};
use crate::core::temporal::{
    is_left_of, is_right_of, max_lower_bound, min_upper_bound, Interval, Timestamp,
};
use crate::error::{Error, Result};
use crate::query::{Order, Predicate, Query};
use crate::storage::{HistoryStore, StoreTransaction};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What one engine call did to the log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Supersession {
    /// Rows whose transaction time was closed
    pub superseded: Vec<RowId>,
    /// Replacement rows, in insertion order
    pub inserted: Vec<RowId>,
}

impl Supersession {
    pub fn is_noop(&self) -> bool {
        self.superseded.is_empty() && self.inserted.is_empty()
    }
}

/// Applies bitemporal writes to a [`HistoryStore`]
#[derive(Clone)]
pub struct BitemporalEngine<S> {
    store: S,
}

impl<S> BitemporalEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record the first fact about a new entity.
    ///
    /// Fails with [`Error::Conflict`] if the entity already has current rows.
    pub async fn assert_new<P, N>(
        &self,
        entity_id: &EntityId,
        payload: P,
        valid: Interval,
        clock: N,
    ) -> Result<RowId>
    where
        P: Payload,
        S: HistoryStore<P>,
        N: Clock,
    {
        let valid = Interval::new(valid.from, valid.to)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let now = lock_entity::<P, _, _>(&mut tx, entity_id, &clock).await?;
            if !current_rows::<P, _>(&mut tx, entity_id, now).await?.is_empty() {
                return Err(Error::Conflict(format!("entity {entity_id} already exists")));
            }
            tx.append(NewRecord::asserted_at(entity_id.clone(), payload, valid, now))
                .await
        }
        .await;

        let row_id = finish::<P, _, _>(tx, result).await?;
        info!(entity = %entity_id, row = %row_id, valid = %valid, "asserted new entity");
        Ok(row_id)
    }

    /// Apply `transform` to the entity over `window`, splitting rows at the
    /// window's edges. A transform returning `None` deletes that slice.
    ///
    /// Fails with [`Error::NotFound`] when the entity has no current rows at
    /// all; a window that overlaps none of them is a no-op.
    pub async fn update<P, F, N>(
        &self,
        entity_id: &EntityId,
        transform: F,
        window: Interval,
        clock: N,
    ) -> Result<Supersession>
    where
        P: Payload,
        S: HistoryStore<P>,
        F: FnMut(&P) -> Option<P> + Send,
        N: Clock,
    {
        self.apply_update(entity_id, transform, window, clock, false).await
    }

    /// Like [`update`](Self::update), but the entity must be valid at the
    /// window's start as currently believed. Otherwise fails with
    /// [`Error::NotFound`] instead of doing nothing.
    pub async fn update_existing<P, F, N>(
        &self,
        entity_id: &EntityId,
        transform: F,
        window: Interval,
        clock: N,
    ) -> Result<Supersession>
    where
        P: Payload,
        S: HistoryStore<P>,
        F: FnMut(&P) -> Option<P> + Send,
        N: Clock,
    {
        self.apply_update(entity_id, transform, window, clock, true).await
    }

    async fn apply_update<P, F, N>(
        &self,
        entity_id: &EntityId,
        mut transform: F,
        window: Interval,
        clock: N,
        require_start: bool,
    ) -> Result<Supersession>
    where
        P: Payload,
        S: HistoryStore<P>,
        F: FnMut(&P) -> Option<P> + Send,
        N: Clock,
    {
        let window = Interval::new(window.from, window.to)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let now = lock_entity::<P, _, _>(&mut tx, entity_id, &clock).await?;
            let overlapping = overlapping_rows::<P, _>(&mut tx, entity_id, window, now).await?;
            if require_start && !overlapping.iter().any(|row| covers_start(row, window.from)) {
                return Err(Error::NotFound(format!(
                    "entity {entity_id} is not valid at {}",
                    window.from.map_or_else(|| "-inf".to_string(), |t| t.to_string())
                )));
            }
            supersede::<P, _, _>(&mut tx, overlapping, &mut transform, window, now).await
        }
        .await;

        let outcome = finish::<P, _, _>(tx, result).await?;
        info!(
            entity = %entity_id,
            window = %window,
            superseded = outcome.superseded.len(),
            inserted = outcome.inserted.len(),
            "update committed"
        );
        Ok(outcome)
    }

    /// Overwrite the entity with `payload` over exactly `window`, filling any
    /// gaps inside it. Left remainders of all overlapping rows come first,
    /// then the new row, then the right remainders.
    pub async fn replace<P, N>(
        &self,
        entity_id: &EntityId,
        payload: P,
        window: Interval,
        clock: N,
    ) -> Result<Supersession>
    where
        P: Payload,
        S: HistoryStore<P>,
        N: Clock,
    {
        let window = Interval::new(window.from, window.to)?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let now = lock_entity::<P, _, _>(&mut tx, entity_id, &clock).await?;
            let overlapping = overlapping_rows::<P, _>(&mut tx, entity_id, window, now).await?;
            replace_window::<P, _>(&mut tx, entity_id, overlapping, payload, window, now).await
        }
        .await;

        let outcome = finish::<P, _, _>(tx, result).await?;
        info!(
            entity = %entity_id,
            window = %window,
            superseded = outcome.superseded.len(),
            inserted = outcome.inserted.len(),
            "replace committed"
        );
        Ok(outcome)
    }
}

/// Commit on success, roll back on failure
async fn finish<P, T, R>(tx: T, result: Result<R>) -> Result<R>
where
    P: Payload,
    T: StoreTransaction<P>,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Take the entity lock, then read the transaction time.
///
/// A row opened or closed after that instant was written by a transaction
/// that committed first; going ahead would rewrite history it already
/// superseded.
async fn lock_entity<P, T, N>(tx: &mut T, entity_id: &EntityId, clock: &N) -> Result<Timestamp>
where
    P: Payload,
    T: StoreTransaction<P>,
    N: Clock,
{
    let rows = tx.query(&Query::entity(entity_id.clone())).await?;
    let now = clock.now();
    let later = |at: Option<Timestamp>| at.map_or(false, |at| at > now);
    if let Some(row) = rows
        .iter()
        .find(|row| later(row.transact_from) || later(row.transact_to))
    {
        return Err(Error::Conflict(format!(
            "row {} of entity {entity_id} was written after {now}",
            row.row_id
        )));
    }
    Ok(now)
}

/// Whether `row` holds the instant a window starting at `from` opens with
fn covers_start<P>(row: &HistoryRecord<P>, from: Option<Timestamp>) -> bool {
    match from {
        Some(t) => row.valid().contains(t),
        None => row.valid_from.is_none(),
    }
}

async fn current_rows<P, T>(
    tx: &mut T,
    entity_id: &EntityId,
    now: Timestamp,
) -> Result<Vec<HistoryRecord<P>>>
where
    P: Payload,
    T: StoreTransaction<P>,
{
    tx.query(&Query::entity(entity_id.clone()).filter(Predicate::transact_as_of(now)))
        .await
}

/// Rows believed at `now` whose valid time overlaps `window`, earliest first
async fn overlapping_rows<P, T>(
    tx: &mut T,
    entity_id: &EntityId,
    window: Interval,
    now: Timestamp,
) -> Result<Vec<HistoryRecord<P>>>
where
    P: Payload,
    T: StoreTransaction<P>,
{
    let query = Query::entity(entity_id.clone())
        .filter(Predicate::transact_as_of(now))
        .filter(Predicate::valid_between(window))
        .order_by(Order::ValidFrom);
    let rows = tx.query(&query).await?;

    if rows.is_empty() && current_rows::<P, _>(tx, entity_id, now).await?.is_empty() {
        return Err(Error::NotFound(format!("entity {entity_id} has no current rows")));
    }
    Ok(rows)
}

async fn append_row<P, T>(
    tx: &mut T,
    outcome: &mut Supersession,
    record: NewRecord<P>,
    kind: &'static str,
) -> Result<()>
where
    P: Payload,
    T: StoreTransaction<P>,
{
    let valid = record.valid;
    let row_id = tx.append(record).await?;
    debug!(row = %row_id, valid = %valid, kind, "appended replacement row");
    outcome.inserted.push(row_id);
    Ok(())
}

async fn supersede<P, T, F>(
    tx: &mut T,
    overlapping: Vec<HistoryRecord<P>>,
    transform: &mut F,
    window: Interval,
    now: Timestamp,
) -> Result<Supersession>
where
    P: Payload,
    T: StoreTransaction<P>,
    F: FnMut(&P) -> Option<P> + Send,
{
    let mut outcome = Supersession::default();

    for item in overlapping {
        tx.close_transaction(item.row_id, now).await?;
        outcome.superseded.push(item.row_id);

        if is_left_of(item.valid_from, window.from) {
            let valid = Interval {
                from: item.valid_from,
                to: window.from,
            };
            let record =
                NewRecord::asserted_at(item.entity_id.clone(), item.payload.clone(), valid, now);
            append_row(tx, &mut outcome, record, "left").await?;
        }

        if let Some(payload) = transform(&item.payload) {
            let valid = Interval {
                from: max_lower_bound(window.from, item.valid_from),
                to: min_upper_bound(window.to, item.valid_to),
            };
            let record = NewRecord::asserted_at(item.entity_id.clone(), payload, valid, now);
            append_row(tx, &mut outcome, record, "transformed").await?;
        }

        if is_right_of(item.valid_to, window.to) {
            let valid = Interval {
                from: window.to,
                to: item.valid_to,
            };
            let record = NewRecord::asserted_at(item.entity_id, item.payload, valid, now);
            append_row(tx, &mut outcome, record, "right").await?;
        }
    }

    Ok(outcome)
}

async fn replace_window<P, T>(
    tx: &mut T,
    entity_id: &EntityId,
    overlapping: Vec<HistoryRecord<P>>,
    payload: P,
    window: Interval,
    now: Timestamp,
) -> Result<Supersession>
where
    P: Payload,
    T: StoreTransaction<P>,
{
    let mut outcome = Supersession::default();

    for item in &overlapping {
        tx.close_transaction(item.row_id, now).await?;
        outcome.superseded.push(item.row_id);

        if is_left_of(item.valid_from, window.from) {
            let valid = Interval {
                from: item.valid_from,
                to: window.from,
            };
            let record =
                NewRecord::asserted_at(item.entity_id.clone(), item.payload.clone(), valid, now);
            append_row(tx, &mut outcome, record, "left").await?;
        }
    }

    let record = NewRecord::asserted_at(entity_id.clone(), payload, window, now);
    append_row(tx, &mut outcome, record, "replacement").await?;

    for item in overlapping {
        if is_right_of(item.valid_to, window.to) {
            let valid = Interval {
                from: window.to,
                to: item.valid_to,
            };
            let record = NewRecord::asserted_at(item.entity_id, item.payload, valid, now);
            append_row(tx, &mut outcome, record, "right").await?;
        }
    }

    Ok(outcome)
}
