//! Sources of "now"
//!
//! The snapshot reader takes `now` as an explicit instant. The engine takes
//! anything implementing [`Clock`] and reads it only once the entity lock is
//! held; a bare [`Timestamp`] is a clock stuck at that instant. Only the task
//! facade owns a moving clock, so tests can drive it by hand.

use crate::core::temporal::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

/// Supplies the wall-clock instant used as transaction time
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            nanos: AtomicI64::new(start.as_nanos()),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.nanos.store(ts.as_nanos(), Ordering::SeqCst);
    }

    /// Move forward by `secs` and return the new instant
    pub fn advance_secs(&self, secs: i64) -> Timestamp {
        let delta = secs * 1_000_000_000;
        Timestamp::from_nanos(self.nanos.fetch_add(delta, Ordering::SeqCst) + delta)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

impl Clock for Timestamp {
    fn now(&self) -> Timestamp {
        *self
    }
}
