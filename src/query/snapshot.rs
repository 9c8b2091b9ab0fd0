//! Point-in-time reads over the history log

use crate::core::record::{EntityId, HistoryRecord, Payload, RowId};
use crate::core::temporal::{cmp_lower_bounds, Timestamp};
use crate::error::Result;
use crate::query::{Order, Predicate, Query};
use crate::storage::HistoryStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// An entity's payload at one bitemporal point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<P> {
    pub entity_id: EntityId,
    pub payload: P,
}

/// The latest valid-time segment of an entity. `deleted_at` is set when
/// that segment has already ended by the instant of the read; a segment
/// scheduled to end later still counts as live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestVersion<P> {
    pub entity_id: EntityId,
    pub payload: P,
    pub deleted_at: Option<Timestamp>,
}

/// One segment of an entity's valid-time timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment<P> {
    pub row_id: RowId,
    pub payload: P,
    pub valid_from: Option<Timestamp>,
    pub valid_to: Option<Timestamp>,
}

impl<P> From<HistoryRecord<P>> for Segment<P> {
    fn from(row: HistoryRecord<P>) -> Self {
        Self {
            row_id: row.row_id,
            payload: row.payload,
            valid_from: row.valid_from,
            valid_to: row.valid_to,
        }
    }
}

/// Read-only view over a [`HistoryStore`]
#[derive(Clone)]
pub struct SnapshotReader<S> {
    store: S,
}

impl<S> SnapshotReader<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// What is true now, as currently believed, ordered by entity
    pub async fn current<P>(&self, entity_id: Option<&EntityId>, now: Timestamp) -> Result<Vec<Snapshot<P>>>
    where
        P: Payload,
        S: HistoryStore<P>,
    {
        self.as_of(entity_id, now, now).await
    }

    /// What was true at `valid_at`, as believed at `transact_at`
    pub async fn as_of<P>(
        &self,
        entity_id: Option<&EntityId>,
        valid_at: Timestamp,
        transact_at: Timestamp,
    ) -> Result<Vec<Snapshot<P>>>
    where
        P: Payload,
        S: HistoryStore<P>,
    {
        let query = scope(entity_id)
            .filter(Predicate::valid_as_of(valid_at))
            .filter(Predicate::transact_as_of(transact_at))
            .order_by(Order::EntityId);
        let rows = self.store.query(&query).await?;
        debug!(rows = rows.len(), valid_at = %valid_at, transact_at = %transact_at, "snapshot read");

        Ok(rows
            .into_iter()
            .map(|row| Snapshot {
                entity_id: row.entity_id,
                payload: row.payload,
            })
            .collect())
    }

    /// The latest segment of every entity, deleted ones included.
    ///
    /// "Latest" is the currently believed row with the greatest
    /// `valid_from`; equal bounds resolve to the most recently written row.
    pub async fn all_with_deletion_markers<P>(&self, now: Timestamp) -> Result<Vec<LatestVersion<P>>>
    where
        P: Payload,
        S: HistoryStore<P>,
    {
        let query = Query::all()
            .filter(Predicate::transact_as_of(now))
            .order_by(Order::EntityId);
        let rows = self.store.query(&query).await?;

        let mut latest: Vec<HistoryRecord<P>> = Vec::new();
        for row in rows {
            match latest.last_mut() {
                Some(best) if best.entity_id == row.entity_id => {
                    if is_later_segment(&row, best) {
                        *best = row;
                    }
                }
                _ => latest.push(row),
            }
        }

        Ok(latest
            .into_iter()
            .map(|row| LatestVersion {
                entity_id: row.entity_id,
                payload: row.payload,
                deleted_at: row.valid_to.filter(|end| *end <= now),
            })
            .collect())
    }

    /// The entity's whole valid-time timeline as currently believed
    pub async fn history<P>(&self, entity_id: &EntityId, now: Timestamp) -> Result<Vec<Segment<P>>>
    where
        P: Payload,
        S: HistoryStore<P>,
    {
        self.history_as_known_at(entity_id, now).await
    }

    /// The entity's valid-time timeline as it was believed at `transact_at`
    pub async fn history_as_known_at<P>(
        &self,
        entity_id: &EntityId,
        transact_at: Timestamp,
    ) -> Result<Vec<Segment<P>>>
    where
        P: Payload,
        S: HistoryStore<P>,
    {
        let query = Query::entity(entity_id.clone())
            .filter(Predicate::transact_as_of(transact_at))
            .order_by(Order::ValidFrom);
        let rows = self.store.query(&query).await?;
        Ok(rows.into_iter().map(Segment::from).collect())
    }

    /// Every row ever written for the entity, superseded ones included
    pub async fn audit<P>(&self, entity_id: &EntityId) -> Result<Vec<HistoryRecord<P>>>
    where
        P: Payload,
        S: HistoryStore<P>,
    {
        self.store.query(&Query::entity(entity_id.clone())).await
    }
}

fn scope(entity_id: Option<&EntityId>) -> Query {
    match entity_id {
        Some(id) => Query::entity(id.clone()),
        None => Query::all(),
    }
}

fn is_later_segment<P>(row: &HistoryRecord<P>, best: &HistoryRecord<P>) -> bool {
    cmp_lower_bounds(row.valid_from, best.valid_from).then(row.row_id.cmp(&best.row_id))
        == Ordering::Greater
}
