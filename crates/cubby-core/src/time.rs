//! Instants and time windows.
//!
//! Instants are plain `i64` nanoseconds since the Unix epoch (UTC). Windows
//! select a contiguous range of instants and come in two flavours:
//!
//! - half-open `[start, end)` via [`TimeWindow::half_open`], which is what
//!   calendar requests use (a midnight-to-midnight window covers exactly one
//!   day and excludes the next midnight);
//! - closed `[start, end]` via [`TimeWindow::closed`], for numeric ranges
//!   where the upper instant is meant to be included.
//!
//! Because instants are integers, both flavours normalise to an inclusive
//! `[start, last]` pair. Equality and all range math use that pair, so
//! `closed(2, 4)` and `half_open(2, 5)` are the same window.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

use chrono::{DateTime, Utc};
use snafu::ensure;

use crate::error::{CubbyError, CubbyResult, InvalidWindowSnafu};

/// Nanoseconds since the Unix epoch (UTC).
pub type Instant = i64;

/// Convert a calendar timestamp into an [`Instant`].
///
/// Fails with [`CubbyError::TimeConversionOverflow`] outside roughly
/// 1677..2262, the range representable as `i64` nanoseconds.
pub fn instant_from_datetime(ts: DateTime<Utc>) -> CubbyResult<Instant> {
    ts.timestamp_nanos_opt()
        .ok_or(CubbyError::TimeConversionOverflow { timestamp: ts })
}

/// Convert an [`Instant`] back into a calendar timestamp.
pub fn datetime_from_instant(instant: Instant) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(instant)
}

/// Whether the upper bound of a [`TimeWindow`] is part of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndBound {
    /// `[start, end)`: the end instant is excluded.
    Exclusive,
    /// `[start, end]`: the end instant is included.
    Inclusive,
}

/// A contiguous range of instants.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    start: Instant,
    end: Instant,
    end_bound: EndBound,
}

impl TimeWindow {
    /// Half-open window `[start, end)`. Requires `start < end`.
    pub fn half_open(start: Instant, end: Instant) -> CubbyResult<Self> {
        ensure!(start < end, InvalidWindowSnafu { start, end });
        Ok(Self {
            start,
            end,
            end_bound: EndBound::Exclusive,
        })
    }

    /// Closed window `[start, end]`. Requires `start <= end`.
    pub fn closed(start: Instant, end: Instant) -> CubbyResult<Self> {
        ensure!(start <= end, InvalidWindowSnafu { start, end });
        Ok(Self {
            start,
            end,
            end_bound: EndBound::Inclusive,
        })
    }

    /// Half-open window between two calendar timestamps.
    pub fn from_datetimes(start: DateTime<Utc>, end: DateTime<Utc>) -> CubbyResult<Self> {
        Self::half_open(instant_from_datetime(start)?, instant_from_datetime(end)?)
    }

    /// First instant in the window.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Upper bound as supplied at construction (see [`Self::end_bound`]).
    pub fn end(&self) -> Instant {
        self.end
    }

    /// Whether [`Self::end`] is included.
    pub fn end_bound(&self) -> EndBound {
        self.end_bound
    }

    /// Last instant that belongs to the window.
    pub fn last(&self) -> Instant {
        match self.end_bound {
            EndBound::Inclusive => self.end,
            // start < end is enforced at construction, so this cannot underflow
            // below `start`.
            EndBound::Exclusive => self.end - 1,
        }
    }

    /// Whether `instant` lies inside the window.
    pub fn contains(&self, instant: Instant) -> bool {
        self.start <= instant && instant <= self.last()
    }

    /// Whether every instant of `other` lies inside `self`.
    pub fn covers(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.last() <= self.last()
    }

    /// Whether the two windows share at least one instant.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start <= other.last() && other.start <= self.last()
    }

    /// Intersection of two windows, if any, as a closed window.
    pub fn intersection(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let start = self.start.max(other.start);
        let last = self.last().min(other.last());
        (start <= last).then_some(TimeWindow {
            start,
            end: last,
            end_bound: EndBound::Inclusive,
        })
    }

    /// Index range of the instants in a sorted slice that fall in the window.
    ///
    /// Both bounds are found by binary search, so this is `O(log n)`.
    pub fn bounds_in(&self, instants: &[Instant]) -> Range<usize> {
        let lo = instants.partition_point(|&t| t < self.start);
        let last = self.last();
        let hi = instants.partition_point(|&t| t <= last);
        lo..hi.max(lo)
    }
}

impl PartialEq for TimeWindow {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.last() == other.last()
    }
}

impl Eq for TimeWindow {}

impl Hash for TimeWindow {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start.hash(state);
        self.last().hash(state);
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end_bound {
            EndBound::Exclusive => write!(f, "[{}, {})", self.start, self.end),
            EndBound::Inclusive => write!(f, "[{}, {}]", self.start, self.end),
        }
    }
}
