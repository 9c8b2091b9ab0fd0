//! Temporal predicates over both time axes
//!
//! A [`Predicate`] is plain data: the store evaluates it while scanning, and
//! its `Display` form is a SQL `WHERE` fragment over the history columns, so
//! the same filter can be pushed down to a relational backend unchanged.
//! Timestamps render as integer nanoseconds since the Unix epoch.

use crate::core::record::HistoryRecord;
use crate::core::temporal::{Interval, Timestamp};
use std::fmt;

/// Which time dimension a predicate constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Valid,
    Transaction,
}

impl Axis {
    fn columns(self) -> (&'static str, &'static str) {
        match self {
            Axis::Valid => ("valid_from", "valid_to"),
            Axis::Transaction => ("transact_from", "transact_to"),
        }
    }

    fn bounds<P>(self, record: &HistoryRecord<P>) -> Interval {
        match self {
            Axis::Valid => record.valid(),
            Axis::Transaction => record.transaction(),
        }
    }
}

/// Composable row filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every row
    All,
    /// `(from IS NULL OR from <= t) AND (to IS NULL OR t < to)` on one axis
    AsOf(Axis, Timestamp),
    /// Rows whose interval on one axis overlaps the window
    Between(Axis, Interval),
    /// Conjunction
    And(Vec<Predicate>),
}

impl Predicate {
    /// Rows valid in the modelled world at `t`
    pub fn valid_as_of(t: Timestamp) -> Self {
        Predicate::AsOf(Axis::Valid, t)
    }

    /// Rows the system believed at `t`
    pub fn transact_as_of(t: Timestamp) -> Self {
        Predicate::AsOf(Axis::Transaction, t)
    }

    /// Rows whose valid interval overlaps `window`
    pub fn valid_between(window: Interval) -> Self {
        Predicate::Between(Axis::Valid, window)
    }

    /// Conjoin two predicates, flattening nested conjunctions
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And(mut lhs), Predicate::And(rhs)) => {
                lhs.extend(rhs);
                Predicate::And(lhs)
            }
            (Predicate::And(mut lhs), p) => {
                lhs.push(p);
                Predicate::And(lhs)
            }
            (p, Predicate::And(mut rhs)) => {
                rhs.insert(0, p);
                Predicate::And(rhs)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    /// Evaluate against a row
    pub fn matches<P>(&self, record: &HistoryRecord<P>) -> bool {
        match self {
            Predicate::All => true,
            Predicate::AsOf(axis, t) => axis.bounds(record).contains(*t),
            Predicate::Between(axis, window) => axis.bounds(record).overlaps(window),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(record)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::All => f.write_str("TRUE"),
            Predicate::AsOf(axis, t) => {
                let (lo, hi) = axis.columns();
                let t = t.as_nanos();
                write!(
                    f,
                    "({lo} IS NULL OR {lo} <= {t}) AND ({hi} IS NULL OR {t} < {hi})"
                )
            }
            Predicate::Between(axis, window) => {
                let (lo, hi) = axis.columns();
                match (window.from, window.to) {
                    (None, None) => f.write_str("TRUE"),
                    (Some(from), None) => {
                        write!(f, "({hi} IS NULL OR {} < {hi})", from.as_nanos())
                    }
                    (None, Some(to)) => {
                        write!(f, "({lo} IS NULL OR {lo} < {})", to.as_nanos())
                    }
                    (Some(from), Some(to)) => write!(
                        f,
                        "({hi} IS NULL OR {} < {hi}) AND ({lo} IS NULL OR {lo} < {})",
                        from.as_nanos(),
                        to.as_nanos()
                    ),
                }
            }
            Predicate::And(parts) if parts.is_empty() => f.write_str("TRUE"),
            Predicate::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "({part})")?;
                }
                Ok(())
            }
        }
    }
}
