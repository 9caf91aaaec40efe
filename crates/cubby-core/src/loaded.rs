//! Bookkeeping of which windows have already been requested from a producer.
//!
//! [`LoadedWindows`] keeps a sorted list of disjoint, coalesced inclusive
//! spans. A window that was loaded but returned no samples still counts as
//! loaded: there is simply no data there, and asking again would not help.

use std::num::NonZeroU64;

use crate::time::{Instant, TimeWindow};

/// Sorted, disjoint, coalesced spans of instants already loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedWindows {
    /// Inclusive `(first, last)` pairs.
    spans: Vec<(Instant, Instant)>,
}

impl LoadedWindows {
    /// Nothing loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Loaded spans as closed windows, in order.
    pub fn windows(&self) -> Vec<TimeWindow> {
        self.spans
            .iter()
            .filter_map(|&(first, last)| TimeWindow::closed(first, last).ok())
            .collect()
    }

    /// Record `window` as loaded, merging it with overlapping or adjacent spans.
    pub fn insert(&mut self, window: &TimeWindow) {
        let (mut first, mut last) = (window.start(), window.last());

        // Spans strictly before `window` and not adjacent to it.
        let lo = self
            .spans
            .partition_point(|&(_, l)| l.checked_add(1).is_some_and(|next| next < first));
        // Spans that start at or before `last + 1`.
        let hi = self
            .spans
            .partition_point(|&(f, _)| last.checked_add(1).is_none_or(|next| f <= next));

        if lo < hi {
            first = first.min(self.spans[lo].0);
            last = last.max(self.spans[hi - 1].1);
        }
        self.spans.splice(lo..hi, [(first, last)]);
    }

    /// Whether every instant of `window` was loaded.
    pub fn covers(&self, window: &TimeWindow) -> bool {
        let idx = self.spans.partition_point(|&(_, l)| l < window.start());
        self.spans
            .get(idx)
            .is_some_and(|&(f, l)| f <= window.start() && window.last() <= l)
    }

    /// Parts of `window` not loaded yet, optionally split into pieces of at
    /// most `max_len` instants.
    pub fn missing(&self, window: &TimeWindow, max_len: Option<NonZeroU64>) -> Vec<TimeWindow> {
        let mut gaps = Vec::new();
        let mut cursor = window.start();
        let end = window.last();
        let mut open = true;

        for &(f, l) in &self.spans {
            if l < cursor {
                continue;
            }
            if f > end {
                break;
            }
            if f > cursor {
                gaps.push((cursor, f - 1));
            }
            match l.checked_add(1) {
                Some(next) if l < end => cursor = next,
                _ => {
                    open = false;
                    break;
                }
            }
        }
        if open && cursor <= end {
            gaps.push((cursor, end));
        }

        let gaps = match max_len {
            Some(max_len) => split_spans_by_len(gaps, max_len),
            None => gaps,
        };
        gaps.into_iter()
            .filter_map(|(f, l)| TimeWindow::closed(f, l).ok())
            .collect()
    }

    /// Keep only the parts inside `window`.
    pub fn retain(&mut self, window: &TimeWindow) {
        self.spans = self
            .spans
            .iter()
            .filter_map(|&(f, l)| {
                let first = f.max(window.start());
                let last = l.min(window.last());
                (first <= last).then_some((first, last))
            })
            .collect();
    }
}

/// Split spans into pieces of at most `max_len` instants.
fn split_spans_by_len(
    spans: Vec<(Instant, Instant)>,
    max_len: NonZeroU64,
) -> Vec<(Instant, Instant)> {
    let step = i64::try_from(max_len.get()).unwrap_or(i64::MAX);

    let mut out = Vec::new();
    for (first, last) in spans {
        let mut cur = first;
        loop {
            let chunk_end = cur.saturating_add(step - 1).min(last);
            out.push((cur, chunk_end));
            if chunk_end == last {
                break;
            }
            cur = chunk_end + 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(a: i64, b: i64) -> TimeWindow {
        TimeWindow::closed(a, b).unwrap()
    }

    #[test]
    fn insert_coalesces_overlapping_and_adjacent() {
        let mut loaded = LoadedWindows::new();
        loaded.insert(&closed(10, 20));
        loaded.insert(&closed(30, 40));
        assert_eq!(loaded.windows(), vec![closed(10, 20), closed(30, 40)]);

        // Adjacent on the left of 30.
        loaded.insert(&closed(21, 29));
        assert_eq!(loaded.windows(), vec![closed(10, 40)]);

        loaded.insert(&closed(0, 5));
        loaded.insert(&closed(3, 12));
        assert_eq!(loaded.windows(), vec![closed(0, 40)]);
    }

    #[test]
    fn covers_requires_single_span() {
        let mut loaded = LoadedWindows::new();
        loaded.insert(&TimeWindow::half_open(0, 10).unwrap());
        loaded.insert(&closed(20, 30));
        assert!(loaded.covers(&closed(0, 9)));
        assert!(!loaded.covers(&TimeWindow::closed(0, 10).unwrap()));
        assert!(loaded.covers(&closed(22, 25)));
        assert!(!loaded.covers(&closed(5, 25)));
        assert!(!LoadedWindows::new().covers(&closed(0, 0)));
    }

    #[test]
    fn missing_lists_gaps_in_order() {
        let mut loaded = LoadedWindows::new();
        loaded.insert(&closed(10, 19));
        loaded.insert(&closed(30, 39));

        assert_eq!(
            loaded.missing(&closed(0, 50), None),
            vec![closed(0, 9), closed(20, 29), closed(40, 50)]
        );
        assert!(loaded.missing(&closed(12, 15), None).is_empty());
        assert_eq!(loaded.missing(&closed(15, 35), None), vec![closed(20, 29)]);
    }

    #[test]
    fn missing_can_be_split() {
        let loaded = LoadedWindows::new();
        assert_eq!(
            loaded.missing(&closed(0, 9), NonZeroU64::new(4)),
            vec![closed(0, 3), closed(4, 7), closed(8, 9)]
        );
        assert_eq!(
            loaded.missing(&closed(0, 9), NonZeroU64::new(1)).len(),
            10
        );
    }

    #[test]
    fn retain_clips_spans() {
        let mut loaded = LoadedWindows::new();
        loaded.insert(&closed(0, 10));
        loaded.insert(&closed(20, 30));
        loaded.retain(&closed(5, 25));
        assert_eq!(loaded.windows(), vec![closed(5, 10), closed(20, 25)]);
    }
}
