//! Temporal data types, half-open intervals and bound algebra
//!
//! Interval bounds are `Option<Timestamp>`: a `None` lower bound means
//! "since the beginning of time" and a `None` upper bound means "until
//! further notice". The four bound primitives at the bottom of this module
//! are the only comparison logic the engine needs.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Timestamp representing a point in time with nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp {
    /// Nanoseconds since Unix epoch
    nanos: i64,
}

impl Timestamp {
    /// Create a timestamp from nanoseconds since Unix epoch
    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Create a timestamp from milliseconds since Unix epoch
    pub fn from_millis(millis: i64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Create a timestamp from seconds since Unix epoch
    pub fn from_secs(secs: i64) -> Self {
        Self {
            nanos: secs * 1_000_000_000,
        }
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Get nanoseconds since Unix epoch
    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }

    /// Get seconds since Unix epoch
    pub fn as_secs(&self) -> i64 {
        self.nanos.div_euclid(1_000_000_000)
    }

    /// Convert to chrono DateTime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.nanos)
    }

    /// Add duration in nanoseconds
    pub fn add_nanos(&self, nanos: i64) -> Self {
        Self {
            nanos: self.nanos + nanos,
        }
    }

    /// Add duration in seconds
    pub fn add_secs(&self, secs: i64) -> Self {
        self.add_nanos(secs * 1_000_000_000)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            nanos: dt.timestamp_nanos_opt().unwrap_or(0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    /// Parse an RFC 3339 instant such as `2024-03-01T00:00:00Z`.
    fn from_str(s: &str) -> Result<Self> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| Error::Validation(format!("invalid timestamp {s:?}: {e}")))?;
        let nanos = dt.with_timezone(&Utc).timestamp_nanos_opt().ok_or_else(|| {
            Error::Temporal(format!("timestamp {s:?} is outside the representable range"))
        })?;
        Ok(Self { nanos })
    }
}

/// Half-open interval `[from, to)` with optional (unbounded) ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Interval {
    /// Inclusive lower bound; `None` means since the beginning of time
    pub from: Option<Timestamp>,
    /// Exclusive upper bound; `None` means unbounded
    pub to: Option<Timestamp>,
}

impl Interval {
    /// Create an interval, rejecting empty or inverted concrete bounds
    pub fn new(from: Option<Timestamp>, to: Option<Timestamp>) -> Result<Self> {
        if let (Some(f), Some(t)) = (from, to) {
            if f >= t {
                return Err(Error::Validation(format!(
                    "interval [{f}, {t}) is empty: lower bound must precede upper bound"
                )));
            }
        }
        Ok(Self { from, to })
    }

    /// The whole timeline
    pub fn unbounded() -> Self {
        Self { from: None, to: None }
    }

    /// `[start, +inf)`
    pub fn since(start: Timestamp) -> Self {
        Self {
            from: Some(start),
            to: None,
        }
    }

    /// Whether `ts` falls inside `[from, to)`
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from.map_or(true, |f| f <= ts) && self.to.map_or(true, |t| ts < t)
    }

    /// Whether the two half-open intervals share at least one instant
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.to.map_or(true, |t| other.from.map_or(true, |f| f < t))
            && self.from.map_or(true, |f| other.to.map_or(true, |t| f < t))
    }

    /// Intersection of two intervals, `None` if they do not overlap
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Interval {
            from: max_lower_bound(self.from, other.from),
            to: min_upper_bound(self.to, other.to),
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Some(from) => write!(f, "[{from}, ")?,
            None => write!(f, "(-inf, ")?,
        }
        match self.to {
            Some(to) => write!(f, "{to})"),
            None => write!(f, "+inf)"),
        }
    }
}

/// The later of two lower bounds, `None` counting as -inf.
pub fn max_lower_bound(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// The earlier of two upper bounds, `None` counting as +inf.
pub fn min_upper_bound(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// True if `bound` is concrete and the lower bound `point` lies strictly
/// before it (`None` being -inf).
pub fn is_left_of(point: Option<Timestamp>, bound: Option<Timestamp>) -> bool {
    match (point, bound) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(p), Some(b)) => p < b,
    }
}

/// True if `bound` is concrete and the upper bound `point` lies strictly
/// after it (`None` being +inf).
pub fn is_right_of(point: Option<Timestamp>, bound: Option<Timestamp>) -> bool {
    match (point, bound) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(p), Some(b)) => b < p,
    }
}

/// Order two lower bounds with `None` first.
pub fn cmp_lower_bounds(a: Option<Timestamp>, b: Option<Timestamp>) -> Ordering {
    // Option's derived ordering already places None before Some.
    a.cmp(&b)
}
