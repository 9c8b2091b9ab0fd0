//! History records: immutable rows tagged with valid and transaction time

use crate::core::temporal::{Interval, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Business attributes carried by a history row.
///
/// Blanket-implemented for anything cloneable and serializable, so domain
/// types only need the usual derives.
pub trait Payload: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Insertion-order surrogate key. Never reused, even for rolled back rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical identifier, stable across every version of an entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A row waiting to be appended; the store assigns its [`RowId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord<P> {
    pub entity_id: EntityId,
    pub payload: P,
    pub valid: Interval,
    pub transact_from: Option<Timestamp>,
}

impl<P> NewRecord<P> {
    /// A row believed from `now` on, with an open transaction-time interval.
    pub fn asserted_at(entity_id: EntityId, payload: P, valid: Interval, now: Timestamp) -> Self {
        Self {
            entity_id,
            payload,
            valid,
            transact_from: Some(now),
        }
    }
}

/// One committed row of an entity's history.
///
/// Only `transact_to` ever changes after commit, and only once, from `None`
/// to a concrete instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord<P> {
    pub row_id: RowId,
    pub entity_id: EntityId,
    pub payload: P,
    pub valid_from: Option<Timestamp>,
    pub valid_to: Option<Timestamp>,
    pub transact_from: Option<Timestamp>,
    pub transact_to: Option<Timestamp>,
}

impl<P> HistoryRecord<P> {
    pub(crate) fn from_new(row_id: RowId, record: NewRecord<P>) -> Self {
        Self {
            row_id,
            entity_id: record.entity_id,
            payload: record.payload,
            valid_from: record.valid.from,
            valid_to: record.valid.to,
            transact_from: record.transact_from,
            transact_to: None,
        }
    }

    /// Valid-time interval `[valid_from, valid_to)`
    pub fn valid(&self) -> Interval {
        Interval {
            from: self.valid_from,
            to: self.valid_to,
        }
    }

    /// Transaction-time interval `[transact_from, transact_to)`
    pub fn transaction(&self) -> Interval {
        Interval {
            from: self.transact_from,
            to: self.transact_to,
        }
    }

    /// Whether this row's transaction time has been closed
    pub fn is_superseded(&self) -> bool {
        self.transact_to.is_some()
    }
}
