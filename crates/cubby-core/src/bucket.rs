//! Mapping instants into discrete time buckets for gap analysis.
//!
//! - Bucket ids count forward from the Unix epoch; bucket 0 is
//!   `[epoch, epoch + len)`.
//! - The bucket width comes from a [`TimeBucket`], parseable from widths
//!   such as `30s`, `1m`, `2h` or `1d`.
//! - `bucket_id` is monotonic in time: later instants never map to a smaller
//!   bucket.
//! - Bucket ids must fit the `u32` domain of the coverage bitmaps; instants
//!   before the epoch or too far after it are reported, not clamped.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::coverage::Bucket;
use crate::error::{CubbyError, CubbyResult};
use crate::time::{Instant, TimeWindow};

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * 60;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Why a `gap_bucket` width such as `30s` or `1h` was rejected.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum ParseTimeBucketError {
    /// Nothing but whitespace.
    #[snafu(display("gap bucket width is empty"))]
    Empty,

    /// A unit with no count in front of it, like `h`.
    #[snafu(display("gap bucket width '{input}' has no count"))]
    MissingNumber {
        /// Rejected text.
        input: String,
    },

    /// A bare count, like `10`.
    #[snafu(display("gap bucket width '{input}' has no unit (use s, m, h or d)"))]
    MissingUnit {
        /// Rejected text.
        input: String,
    },

    /// The count is not an integer.
    #[snafu(display("gap bucket count in '{input}' is not an integer: {source}"))]
    InvalidNumber {
        /// Rejected text.
        input: String,
        /// Integer parse failure.
        source: std::num::ParseIntError,
    },

    /// A zero-width bucket would put every sample in a gap.
    #[snafu(display("gap bucket width '{input}' must be at least 1 (got {value})"))]
    NonPositive {
        /// Rejected text.
        input: String,
        /// Parsed count.
        value: u64,
    },

    /// The count does not fit a bucket id.
    #[snafu(display("gap bucket count {value} in '{input}' exceeds u32"))]
    TooLarge {
        /// Rejected text.
        input: String,
        /// Parsed count.
        value: u64,
    },

    /// Weeks, months and other units are not supported.
    #[snafu(display("gap bucket unit '{unit}' in '{input}' is not one of s, m, h, d"))]
    UnknownUnit {
        /// Rejected text.
        input: String,
        /// Unit as written.
        unit: String,
    },
}

/// Width of the buckets used for sample gap analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeBucket {
    /// A bucket spanning a fixed number of seconds.
    Seconds(u32),
    /// A bucket spanning a fixed number of minutes.
    Minutes(u32),
    /// A bucket spanning a fixed number of hours.
    Hours(u32),
    /// A bucket spanning a fixed number of days.
    Days(u32),
}

impl Default for TimeBucket {
    fn default() -> Self {
        TimeBucket::Minutes(1)
    }
}

impl FromStr for TimeBucket {
    type Err = ParseTimeBucketError;

    /// Accepts `<count><unit>` with optional whitespace between, where the
    /// unit is `s`, `m`, `h` or `d` (or a spelled-out form like `mins`).
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        ensure!(!text.is_empty(), EmptySnafu);

        let split = text
            .find(|c: char| c.is_ascii_alphabetic())
            .context(MissingUnitSnafu { input: text })?;
        ensure!(split > 0, MissingNumberSnafu { input: text });

        let (count, unit) = text.split_at(split);
        let value: u64 = count
            .trim()
            .parse()
            .context(InvalidNumberSnafu { input: text })?;
        ensure!(value > 0, NonPositiveSnafu { input: text, value });
        let n = u32::try_from(value)
            .ok()
            .context(TooLargeSnafu { input: text, value })?;

        let unit = unit.trim().to_ascii_lowercase();
        let bucket = match unit.as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => TimeBucket::Seconds(n),
            "m" | "min" | "mins" | "minute" | "minutes" => TimeBucket::Minutes(n),
            "h" | "hr" | "hrs" | "hour" | "hours" => TimeBucket::Hours(n),
            "d" | "day" | "days" => TimeBucket::Days(n),
            _ => return UnknownUnitSnafu { input: text, unit: unit.as_str() }.fail(),
        };
        Ok(bucket)
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TimeBucket::Seconds(n) => write!(f, "{n}s"),
            TimeBucket::Minutes(n) => write!(f, "{n}m"),
            TimeBucket::Hours(n) => write!(f, "{n}h"),
            TimeBucket::Days(n) => write!(f, "{n}d"),
        }
    }
}

impl TimeBucket {
    /// Parse a width such as `1h`, `15m`, `30s` or `2d`.
    pub fn parse(text: &str) -> Result<Self, ParseTimeBucketError> {
        text.parse()
    }

    /// Bucket width in nanoseconds.
    pub fn len_nanos(&self) -> i64 {
        let secs = match *self {
            TimeBucket::Seconds(n) => n as i64,
            TimeBucket::Minutes(n) => (n as i64) * SECONDS_PER_MINUTE,
            TimeBucket::Hours(n) => (n as i64) * SECONDS_PER_HOUR,
            TimeBucket::Days(n) => (n as i64) * SECONDS_PER_DAY,
        };
        secs * NANOS_PER_SECOND
    }

    /// The half-open window `[start, start + len)` covered by `bucket`.
    pub fn window_of(&self, bucket: Bucket) -> CubbyResult<TimeWindow> {
        let len = self.len_nanos();
        let start = (bucket as i64).saturating_mul(len);
        TimeWindow::half_open(start, start.saturating_add(len))
    }
}

/// Map an instant into its bucket id.
pub fn bucket_id(width: &TimeBucket, instant: Instant) -> CubbyResult<Bucket> {
    let bucket = instant.div_euclid(width.len_nanos());
    Bucket::try_from(bucket).map_err(|_| CubbyError::BucketOutOfRange { instant, bucket })
}

/// Inclusive range of bucket ids intersecting `window`.
pub fn bucket_range(
    width: &TimeBucket,
    window: &TimeWindow,
) -> CubbyResult<RangeInclusive<Bucket>> {
    Ok(bucket_id(width, window.start())?..=bucket_id(width, window.last())?)
}

/// Bitmap of every bucket intersecting `window`.
pub fn expected_buckets_for_window(
    width: &TimeBucket,
    window: &TimeWindow,
) -> CubbyResult<RoaringBitmap> {
    let range = bucket_range(width, window)?;
    let mut bitmap = RoaringBitmap::new();
    bitmap.insert_range(range);
    Ok(bitmap)
}
