//! Shared, strictly increasing time axes.
//!
//! A [`TimeAxis`] is a cheap-to-clone view over an `Arc<[Instant]>` buffer:
//! every variable handle of an owning instance holds a clone of the same axis,
//! and clipping produces a sub-view without copying instants.
//!
//! Rank-2 axes carry a channel count. Their instants are stored once per row;
//! the channel dimension is implied, which makes the "every row is constant
//! across channels" invariant hold by construction. [`TimeAxis::from_rows`]
//! validates that invariant when a producer hands over explicit rows.

use std::ops::Range;
use std::sync::Arc;

use snafu::ensure;

use crate::error::{
    CubbyResult, NonConstantTimeRowSnafu, RaggedTimeRowsSnafu, UnsortedTimeAxisSnafu,
};
use crate::time::{Instant, TimeWindow};

/// An ordered, de-duplicated sequence of instants.
#[derive(Debug, Clone)]
pub struct TimeAxis {
    buffer: Arc<[Instant]>,
    offset: usize,
    len: usize,
    channels: Option<usize>,
}

impl TimeAxis {
    /// An empty rank-1 axis.
    pub fn empty() -> Self {
        Self {
            buffer: Arc::from(Vec::new()),
            offset: 0,
            len: 0,
            channels: None,
        }
    }

    /// Build a rank-1 axis, validating strict ordering.
    pub fn new(instants: Vec<Instant>) -> CubbyResult<Self> {
        check_strictly_increasing(&instants)?;
        Ok(Self::from_sorted_unchecked(instants, None))
    }

    /// Build a rank-2 axis with `channels` columns per row.
    pub fn rank2(instants: Vec<Instant>, channels: usize) -> CubbyResult<Self> {
        check_strictly_increasing(&instants)?;
        Ok(Self::from_sorted_unchecked(instants, Some(channels)))
    }

    /// Build a rank-2 axis from explicit rows of replicated instants.
    ///
    /// Every row must have the same width and be constant along it.
    pub fn from_rows(rows: &[Vec<Instant>]) -> CubbyResult<Self> {
        let width = rows.first().map_or(0, Vec::len);
        let mut instants = Vec::with_capacity(rows.len());
        for (row, values) in rows.iter().enumerate() {
            ensure!(
                values.len() == width,
                RaggedTimeRowsSnafu {
                    row,
                    expected: width,
                    actual: values.len(),
                }
            );
            let Some(&first) = values.first() else {
                return NonConstantTimeRowSnafu { row }.fail();
            };
            ensure!(
                values.iter().all(|&t| t == first),
                NonConstantTimeRowSnafu { row }
            );
            instants.push(first);
        }
        Self::rank2(instants, width)
    }

    pub(crate) fn from_sorted_unchecked(instants: Vec<Instant>, channels: Option<usize>) -> Self {
        let len = instants.len();
        Self {
            buffer: Arc::from(instants),
            offset: 0,
            len,
            channels,
        }
    }

    /// Number of samples (rows).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the axis has no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 1 for a plain axis, 2 for a channel-replicated axis.
    pub fn rank(&self) -> usize {
        if self.channels.is_some() { 2 } else { 1 }
    }

    /// Channel count of a rank-2 axis.
    pub fn channels(&self) -> Option<usize> {
        self.channels
    }

    /// The leading (time-varying) instants.
    pub fn instants(&self) -> &[Instant] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    /// First instant, if any.
    pub fn first(&self) -> Option<Instant> {
        self.instants().first().copied()
    }

    /// Last instant, if any.
    pub fn last(&self) -> Option<Instant> {
        self.instants().last().copied()
    }

    /// Closed window spanning the axis, or `None` when empty.
    pub fn span(&self) -> Option<TimeWindow> {
        let (first, last) = (self.first()?, self.last()?);
        TimeWindow::closed(first, last).ok()
    }

    /// Index range of the samples inside `window`.
    pub fn window_bounds(&self, window: &TimeWindow) -> Range<usize> {
        window.bounds_in(self.instants())
    }

    /// Zero-copy sub-view over `range` (clamped to the axis).
    pub fn slice(&self, range: Range<usize>) -> TimeAxis {
        let start = range.start.min(self.len);
        let end = range.end.clamp(start, self.len);
        TimeAxis {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset + start,
            len: end - start,
            channels: self.channels,
        }
    }

    /// Sub-view of the samples inside `window`.
    pub fn clip(&self, window: &TimeWindow) -> TimeAxis {
        self.slice(self.window_bounds(window))
    }
}

impl Default for TimeAxis {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for TimeAxis {
    fn eq(&self, other: &Self) -> bool {
        self.channels == other.channels && self.instants() == other.instants()
    }
}

impl Eq for TimeAxis {}

fn check_strictly_increasing(instants: &[Instant]) -> CubbyResult<()> {
    for (i, pair) in instants.windows(2).enumerate() {
        ensure!(
            pair[0] < pair[1],
            UnsortedTimeAxisSnafu {
                index: i + 1,
                previous: pair[0],
                current: pair[1],
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CubbyError;

    #[test]
    fn rejects_duplicates_and_disorder() {
        assert!(matches!(
            TimeAxis::new(vec![0, 1, 1, 2]),
            Err(CubbyError::UnsortedTimeAxis { index: 2, .. })
        ));
        assert!(matches!(
            TimeAxis::new(vec![3, 1]),
            Err(CubbyError::UnsortedTimeAxis {
                index: 1,
                previous: 3,
                current: 1
            })
        ));
    }

    #[test]
    fn rank2_rows_must_be_constant() {
        let axis = TimeAxis::from_rows(&[vec![0, 0, 0], vec![5, 5, 5]]).unwrap();
        assert_eq!(axis.rank(), 2);
        assert_eq!(axis.channels(), Some(3));
        assert_eq!(axis.instants(), &[0, 5]);

        assert!(matches!(
            TimeAxis::from_rows(&[vec![0, 0], vec![5, 6]]),
            Err(CubbyError::NonConstantTimeRow { row: 1 })
        ));
        assert!(matches!(
            TimeAxis::from_rows(&[vec![0, 0], vec![5]]),
            Err(CubbyError::RaggedTimeRows { row: 1, .. })
        ));
    }

    #[test]
    fn slices_share_the_buffer() {
        let axis = TimeAxis::new(vec![0, 10, 20, 30, 40]).unwrap();
        let sub = axis.slice(1..4);
        assert_eq!(sub.instants(), &[10, 20, 30]);
        assert!(Arc::ptr_eq(&axis.buffer, &sub.buffer));

        let nested = sub.slice(1..10);
        assert_eq!(nested.instants(), &[20, 30]);
        assert!(axis.slice(7..9).is_empty());
    }

    #[test]
    fn clip_and_span() {
        let axis = TimeAxis::new(vec![0, 1, 2, 3, 4, 5]).unwrap();
        let window = TimeWindow::closed(2, 4).unwrap();
        assert_eq!(axis.clip(&window).instants(), &[2, 3, 4]);
        assert_eq!(axis.span(), Some(TimeWindow::closed(0, 5).unwrap()));
        assert_eq!(TimeAxis::empty().span(), None);
    }
}
