//! Wall-clock access.
//!
//! Everything that compares against "now" takes an injected [`Clock`] so the
//! scheduler boundaries (due exactly now, one second late) can be tested
//! deterministically with [`ManualClock`].

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, FixedOffset, Local, Offset, TimeDelta, Timelike, Utc};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// Offset of the device's local calendar at `at`, used to decompose
    /// calendar-field triggers.
    fn local_offset(&self, at: DateTime<Utc>) -> FixedOffset;
}

/// The system clock and the process-local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset(&self, at: DateTime<Utc>) -> FixedOffset {
        at.with_timezone(&Local).offset().fix()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_offset(now, Utc.fix())
    }

    pub fn with_offset(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local_offset(&self, _at: DateTime<Utc>) -> FixedOffset {
        self.offset
    }
}

/// Server-side timestamp source for the document stores.
///
/// Stamps are truncated to microseconds and strictly increasing, so two
/// documents created back to back never share a `createdAt`.
pub(crate) struct ServerClock {
    clock: std::sync::Arc<dyn Clock>,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ServerClock {
    pub(crate) fn new(clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    pub(crate) fn next(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let now = now
            .with_nanosecond(now.nanosecond() / 1_000 * 1_000)
            .unwrap_or(now);

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = match *last {
            Some(prev) if now <= prev => prev + TimeDelta::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}
