//! Sample gap queries for the store.
//!
//! These APIs:
//! - map an instance's sample instants into [`TimeBucket`]s
//!   ([`StoreConfig::gap_bucket`](crate::config::StoreConfig::gap_bucket));
//! - derive the expected bucket domain from a window;
//! - reuse [`Coverage`] for ratio, longest gap and missing runs.
//!
//! This is about where samples *are*, not about which windows were loaded:
//! a loaded window can still contain data gaps.

use log::debug;
use snafu::OptionExt;

use crate::bucket::{TimeBucket, expected_buckets_for_window};
use crate::coverage::{Bucket, Coverage};
use crate::error::{CubbyResult, UnknownInstanceSnafu};
use crate::store::Store;
use crate::time::TimeWindow;

/// Where an instance has samples inside one window.
#[derive(Debug, Clone, PartialEq)]
pub struct GapReport {
    /// The window analysed.
    pub window: TimeWindow,
    /// Buckets the window spans.
    pub expected_buckets: u64,
    /// Buckets holding at least one sample.
    pub covered_buckets: u64,
    /// `covered_buckets / expected_buckets`, 1.0 for an empty domain.
    pub coverage_ratio: f64,
    /// Longest run of empty buckets.
    pub max_gap_buckets: u64,
    /// Empty stretches, clipped to the window, in order.
    pub missing: Vec<TimeWindow>,
}

impl GapReport {
    /// Whether every bucket of the window holds a sample.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

impl Store {
    /// Buckets of instance `name` that hold at least one sample.
    pub fn sample_coverage(&self, name: &str) -> CubbyResult<Coverage> {
        let instance = self
            .instance(name)
            .context(UnknownInstanceSnafu { name })?;
        Coverage::from_instants(&self.config().gap_bucket, instance.time().instants())
    }

    /// Gap analysis of instance `name` over `window`.
    pub fn gap_report(&self, name: &str, window: &TimeWindow) -> CubbyResult<GapReport> {
        let width = self.config().gap_bucket;
        let instance = self
            .instance(name)
            .context(UnknownInstanceSnafu { name })?;

        let samples = instance.time().clip(window);
        let cov = Coverage::from_instants(&width, samples.instants())?;
        let expected = expected_buckets_for_window(&width, window)?;

        let expected_buckets = expected.len();
        let covered_buckets = expected_buckets - cov.missing_points(&expected).len();
        debug!(
            "{name}: {covered_buckets}/{expected_buckets} {width} buckets hold samples in {window}"
        );

        let mut missing = Vec::new();
        for run in cov.missing_runs(&expected, None) {
            let gap = runs_to_window(&width, *run.start() as Bucket, *run.end() as Bucket)?;
            if let Some(gap) = gap.intersection(window) {
                missing.push(gap);
            }
        }

        Ok(GapReport {
            window: *window,
            expected_buckets,
            covered_buckets,
            coverage_ratio: cov.coverage_ratio(&expected),
            max_gap_buckets: cov.max_gap_len(&expected),
            missing,
        })
    }
}

fn runs_to_window(width: &TimeBucket, first: Bucket, last: Bucket) -> CubbyResult<TimeWindow> {
    let start = width.window_of(first)?.start();
    let end = width.window_of(last)?.end();
    TimeWindow::half_open(start, end)
}
