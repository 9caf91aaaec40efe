//! Sample coverage and gap analysis over time buckets.
//!
//! [`Coverage`] wraps a `roaring::RoaringBitmap` of bucket ids that hold at
//! least one sample. It knows nothing about variables or producers: callers
//! map instants into `u32` bucket ids with [`crate::bucket`] and compare the
//! result against the buckets a window is expected to span.
//!
//! ```
//! use cubby_core::bucket::{TimeBucket, expected_buckets_for_window};
//! use cubby_core::coverage::Coverage;
//! use cubby_core::time::TimeWindow;
//!
//! let width = TimeBucket::Seconds(1);
//! let second = 1_000_000_000;
//! // Samples in seconds 0, 1, 2 and 4; second 3 is a gap.
//! let samples = [0, second, 2 * second, 4 * second];
//! let cov = Coverage::from_instants(&width, &samples).unwrap();
//!
//! let window = TimeWindow::half_open(0, 5 * second).unwrap();
//! let expected = expected_buckets_for_window(&width, &window).unwrap();
//! assert_eq!(cov.max_gap_len(&expected), 1);
//! assert!((cov.coverage_ratio(&expected) - 0.8).abs() < 1e-9);
//! ```

use std::ops::RangeInclusive;

use roaring::RoaringBitmap;

use crate::bucket::{TimeBucket, bucket_id};
use crate::error::CubbyResult;
use crate::time::Instant;

/// Bucket ids used by [`Coverage`].
///
/// `u32` is enough for minute buckets over several millennia after the epoch.
pub type Bucket = u32;

/// Set of buckets that hold at least one sample.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    bitmap: RoaringBitmap,
}

impl Coverage {
    /// No bucket present.
    pub fn empty() -> Self {
        Self {
            bitmap: RoaringBitmap::new(),
        }
    }

    /// Buckets touched by `instants`.
    pub fn from_instants(width: &TimeBucket, instants: &[Instant]) -> CubbyResult<Self> {
        let mut bitmap = RoaringBitmap::new();
        for &instant in instants {
            bitmap.insert(bucket_id(width, instant)?);
        }
        Ok(Self { bitmap })
    }

    /// Borrow the bitmap of present buckets.
    pub fn present(&self) -> &RoaringBitmap {
        &self.bitmap
    }

    /// Number of buckets present.
    pub fn cardinality(&self) -> u64 {
        self.bitmap.len()
    }

    /// `expected - present`.
    pub fn missing_points(&self, expected: &RoaringBitmap) -> RoaringBitmap {
        let mut missing = expected.clone();
        missing -= &self.bitmap;
        missing
    }

    /// Missing buckets grouped into contiguous inclusive runs, optionally
    /// split into chunks of at most `max_run_len`.
    pub fn missing_runs(
        &self,
        expected: &RoaringBitmap,
        max_run_len: Option<u64>,
    ) -> Vec<RangeInclusive<u64>> {
        let runs = runs_from_bitmap(&self.missing_points(expected));
        match max_run_len {
            Some(max_len) => split_runs_by_len(runs, max_len),
            None => runs,
        }
    }

    /// Fraction of `expected` that is present, in `[0.0, 1.0]`.
    ///
    /// An empty `expected` is vacuously fully covered.
    pub fn coverage_ratio(&self, expected: &RoaringBitmap) -> f64 {
        let expected_count = expected.len();
        if expected_count == 0 {
            return 1.0;
        }
        let covered = &self.bitmap & expected;
        covered.len() as f64 / expected_count as f64
    }

    /// Length in buckets of the longest missing run, 0 when nothing is missing.
    pub fn max_gap_len(&self, expected: &RoaringBitmap) -> u64 {
        runs_from_bitmap(&self.missing_points(expected))
            .into_iter()
            .map(|r| r.end() - r.start() + 1)
            .max()
            .unwrap_or(0)
    }
}

impl FromIterator<Bucket> for Coverage {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Bucket>,
    {
        Self {
            bitmap: iter.into_iter().collect(),
        }
    }
}

fn runs_from_bitmap(bitmap: &RoaringBitmap) -> Vec<RangeInclusive<u64>> {
    let mut out = Vec::new();
    let mut iter = bitmap.iter();

    let Some(mut start) = iter.next() else {
        return out;
    };
    let mut prev = start;

    for v in iter {
        if v == prev + 1 {
            prev = v;
        } else {
            out.push(start as u64..=prev as u64);
            start = v;
            prev = v;
        }
    }
    out.push(start as u64..=prev as u64);
    out
}

fn split_runs_by_len(runs: Vec<RangeInclusive<u64>>, max_len: u64) -> Vec<RangeInclusive<u64>> {
    if max_len == 0 {
        return Vec::new();
    }

    let mut out = Vec::new();
    for range in runs {
        let (start, end) = (*range.start(), *range.end());
        let mut cur = start;
        loop {
            let chunk_end = (cur + max_len - 1).min(end);
            out.push(cur..=chunk_end);
            if chunk_end == end {
                break;
            }
            cur = chunk_end + 1;
        }
    }
    out
}
