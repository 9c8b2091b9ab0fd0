//! Query shape shared by the read and write paths

pub mod predicate;
pub mod snapshot;

pub use predicate::*;
pub use snapshot::*;

use crate::core::record::{EntityId, HistoryRecord};
use crate::core::temporal::cmp_lower_bounds;

/// Result ordering. Every order breaks ties by ascending row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    RowId,
    ValidFrom,
    EntityId,
}

/// A filtered, ordered scan of the history log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub entity_id: Option<EntityId>,
    pub predicate: Predicate,
    pub order: Order,
}

impl Query {
    /// Scan every entity
    pub fn all() -> Self {
        Self {
            entity_id: None,
            predicate: Predicate::All,
            order: Order::RowId,
        }
    }

    /// Scan a single entity
    pub fn entity(entity_id: EntityId) -> Self {
        Self {
            entity_id: Some(entity_id),
            ..Self::all()
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = self.predicate.and(predicate);
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn matches<P>(&self, record: &HistoryRecord<P>) -> bool {
        self.entity_id
            .as_ref()
            .map_or(true, |id| &record.entity_id == id)
            && self.predicate.matches(record)
    }

    /// Sort rows in place according to `order`
    pub fn sort<P>(&self, rows: &mut [HistoryRecord<P>]) {
        match self.order {
            Order::RowId => rows.sort_by_key(|r| r.row_id),
            Order::ValidFrom => rows.sort_by(|a, b| {
                cmp_lower_bounds(a.valid_from, b.valid_from).then(a.row_id.cmp(&b.row_id))
            }),
            Order::EntityId => rows.sort_by(|a, b| {
                a.entity_id
                    .cmp(&b.entity_id)
                    .then(a.row_id.cmp(&b.row_id))
            }),
        }
    }
}
