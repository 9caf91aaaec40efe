//! Merge engine: reconcile cached and freshly loaded samples.
//!
//! Given the cached `(time axis, fields)` of an owning instance and an
//! incoming batch for the same instance, [`merge_series`] produces one
//! reconciled series with no duplicate instants:
//!
//! - All time-varying fields are re-indexed with one shared [`MergePlan`], so
//!   they stay aligned with each other and with the merged axis.
//! - Static fields are never re-indexed; an incoming static field replaces the
//!   cached one wholesale.
//! - On an exact instant collision the incoming sample wins ("freshest load
//!   overwrites").
//!
//! Plan construction:
//!
//! 1. Empty cache: the incoming axis is adopted as-is.
//! 2. Incoming strictly after (before) the cache: the fields are concatenated
//!    in order and no index mapping is built.
//! 3. Otherwise the merged axis is the sorted union of both axes, and each
//!    side's rows are placed by binary-searching their instants in the union.
//!    Arrow's `interleave` kernel materialises every output array in one pass,
//!    writing cached rows first and incoming rows over them.
//!
//! Dtypes and rank-2 (`FixedSizeList`) shapes pass through untouched. Any
//! length disagreement is reported as [`CubbyError::ShapeMismatch`].

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt64Array, new_null_array};
use arrow::compute::{concat, interleave, take};
use log::debug;
use snafu::{ResultExt, ensure};

use crate::error::{
    ArrowSnafu, ChannelMismatchSnafu, CubbyResult, DataTypeMismatchSnafu, ShapeMismatchSnafu,
};
use crate::field::{FieldData, FieldKind, ensure_rows};
use crate::time::Instant;
use crate::time_axis::TimeAxis;

/// A time axis together with the fields indexed by it.
#[derive(Debug, Clone, Default)]
pub struct Series {
    /// Shared time axis.
    pub time: TimeAxis,
    /// Fields keyed by variable name.
    pub fields: BTreeMap<String, FieldData>,
}

impl Series {
    /// Build a series, checking every time-varying field against the axis.
    pub fn new(time: TimeAxis, fields: BTreeMap<String, FieldData>) -> CubbyResult<Self> {
        for (name, field) in &fields {
            if field.kind == FieldKind::TimeVarying {
                ensure_rows(name, field.values.as_ref(), time.len())?;
            }
        }
        Ok(Self { time, fields })
    }

    /// Values of a field, if present.
    pub fn values(&self, name: &str) -> Option<&ArrayRef> {
        self.fields.get(name).map(|f| &f.values)
    }
}

/// How a [`MergePlan`] combines the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Nothing cached: the incoming series is adopted.
    Adopt,
    /// Incoming lies strictly after the cache.
    Append,
    /// Incoming lies strictly before the cache.
    Prepend,
    /// The two sides overlap or interleave.
    Interleave,
}

/// Shared index mapping used to re-index every time-varying field.
#[derive(Debug, Clone)]
pub struct MergePlan {
    time: TimeAxis,
    strategy: MergeStrategy,
    existing_len: usize,
    incoming_len: usize,
    /// `(source, row)` for each merged position; source 0 is cached, 1 incoming.
    slots: Vec<(usize, usize)>,
}

impl MergePlan {
    /// Plan the merge of two axes.
    pub fn build(existing: &TimeAxis, incoming: &TimeAxis) -> CubbyResult<Self> {
        let existing_len = existing.len();
        let incoming_len = incoming.len();

        if existing.is_empty() {
            return Ok(Self {
                time: incoming.clone(),
                strategy: MergeStrategy::Adopt,
                existing_len,
                incoming_len,
                slots: Vec::new(),
            });
        }

        ensure!(
            incoming.is_empty() || existing.channels() == incoming.channels(),
            ChannelMismatchSnafu {
                context: "time axis",
                left: existing.channels(),
                right: incoming.channels(),
            }
        );

        let (old, new) = (existing.instants(), incoming.instants());
        let bounds = (
            old.first().copied(),
            old.last().copied(),
            new.first().copied(),
            new.last().copied(),
        );
        let strategy = match bounds {
            (_, _, None, _) => MergeStrategy::Append,
            (_, Some(old_last), Some(new_first), _) if new_first > old_last => {
                MergeStrategy::Append
            }
            (Some(old_first), _, _, Some(new_last)) if new_last < old_first => {
                MergeStrategy::Prepend
            }
            _ => MergeStrategy::Interleave,
        };

        let channels = existing.channels();
        let (time, slots) = match strategy {
            MergeStrategy::Append => (concat_instants(old, new, channels), Vec::new()),
            MergeStrategy::Prepend => (concat_instants(new, old, channels), Vec::new()),
            _ => {
                let merged = sorted_union(old, new);
                let mut slots = vec![(0usize, 0usize); merged.len()];
                for (row, pos) in positions(&merged, old).into_iter().enumerate() {
                    slots[pos] = (0, row);
                }
                for (row, pos) in positions(&merged, new).into_iter().enumerate() {
                    slots[pos] = (1, row);
                }
                (TimeAxis::from_sorted_unchecked(merged, channels), slots)
            }
        };

        debug!(
            "merge plan {strategy:?}: {existing_len} cached + {incoming_len} incoming -> {} samples",
            time.len()
        );

        Ok(Self {
            time,
            strategy,
            existing_len,
            incoming_len,
            slots,
        })
    }

    /// The merged time axis.
    pub fn merged_time(&self) -> &TimeAxis {
        &self.time
    }

    /// Strategy chosen for this plan.
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Re-index one time-varying field.
    ///
    /// A side that lacks the field (`None`) contributes nulls of the other
    /// side's dtype, so fields first seen in a later load stay aligned.
    pub fn apply(
        &self,
        field: &str,
        existing: Option<&ArrayRef>,
        incoming: Option<&ArrayRef>,
    ) -> CubbyResult<ArrayRef> {
        if self.strategy == MergeStrategy::Adopt {
            // Whatever the cache held was empty; its placeholder dtype is moot.
            let adopted = match (incoming, existing) {
                (Some(i), _) => Arc::clone(i),
                (None, Some(e)) => new_null_array(e.data_type(), self.incoming_len),
                (None, None) => {
                    return ShapeMismatchSnafu {
                        field,
                        expected: self.time.len(),
                        actual: 0usize,
                    }
                    .fail();
                }
            };
            ensure_rows(field, adopted.as_ref(), self.time.len())?;
            return Ok(adopted);
        }

        // An all-null cached column is a placeholder; adopt the incoming dtype.
        let existing = existing.filter(|e| {
            incoming.is_none_or(|i| e.data_type() == i.data_type() || e.null_count() < e.len())
        });

        let (existing, incoming) = match (existing, incoming) {
            (Some(e), Some(i)) => {
                ensure!(
                    e.data_type() == i.data_type(),
                    DataTypeMismatchSnafu {
                        field,
                        existing: e.data_type().clone(),
                        incoming: i.data_type().clone(),
                    }
                );
                (Arc::clone(e), Arc::clone(i))
            }
            (Some(e), None) => (Arc::clone(e), new_null_array(e.data_type(), self.incoming_len)),
            (None, Some(i)) => (new_null_array(i.data_type(), self.existing_len), Arc::clone(i)),
            (None, None) => {
                return ShapeMismatchSnafu {
                    field,
                    expected: self.time.len(),
                    actual: 0usize,
                }
                .fail();
            }
        };

        ensure_rows(field, existing.as_ref(), self.existing_len)?;
        ensure_rows(field, incoming.as_ref(), self.incoming_len)?;

        let merged = match self.strategy {
            MergeStrategy::Adopt | MergeStrategy::Append => {
                concat(&[existing.as_ref(), incoming.as_ref()])
                    .context(ArrowSnafu { context: field })?
            }
            MergeStrategy::Prepend => concat(&[incoming.as_ref(), existing.as_ref()])
                .context(ArrowSnafu { context: field })?,
            MergeStrategy::Interleave => {
                interleave(&[existing.as_ref(), incoming.as_ref()], &self.slots)
                    .context(ArrowSnafu { context: field })?
            }
        };

        ensure_rows(field, merged.as_ref(), self.time.len())?;
        Ok(merged)
    }
}

/// Merge an incoming series into a cached one.
///
/// Both series must already be classified and normalised (strictly increasing
/// axes). Returns the merged series and the strategy that produced it.
pub fn merge_series(existing: &Series, incoming: &Series) -> CubbyResult<(Series, MergeStrategy)> {
    let plan = MergePlan::build(&existing.time, &incoming.time)?;
    let mut fields = BTreeMap::new();

    let names = existing.fields.keys().chain(incoming.fields.keys());
    for name in names {
        if fields.contains_key(name) {
            continue;
        }
        let old = existing.fields.get(name);
        let new = incoming.fields.get(name);

        let merged = match (old, new) {
            (_, Some(new)) if new.kind == FieldKind::Static => new.clone(),
            (Some(old), None) if old.kind == FieldKind::Static => old.clone(),
            _ => {
                let values = plan.apply(
                    name,
                    old.filter(|f| f.kind == FieldKind::TimeVarying).map(|f| &f.values),
                    new.map(|f| &f.values),
                )?;
                FieldData {
                    values,
                    kind: FieldKind::TimeVarying,
                }
            }
        };
        fields.insert(name.clone(), merged);
    }

    let strategy = plan.strategy();
    let series = Series::new(plan.time, fields)?;
    Ok((series, strategy))
}

/// Sort an incoming batch and collapse duplicate instants (last one wins).
///
/// Producers may hand over samples in arbitrary order; time-varying fields
/// are permuted with the same `take` indices as the axis.
pub fn normalise_incoming(
    instants: Vec<Instant>,
    channels: Option<usize>,
    mut fields: BTreeMap<String, FieldData>,
) -> CubbyResult<Series> {
    if instants.windows(2).all(|w| w[0] < w[1]) {
        let time = TimeAxis::from_sorted_unchecked(instants, channels);
        return Series::new(time, fields);
    }

    for (name, field) in &fields {
        if field.kind == FieldKind::TimeVarying {
            ensure_rows(name, field.values.as_ref(), instants.len())?;
        }
    }

    let mut order: Vec<usize> = (0..instants.len()).collect();
    // Stable: among equal instants the later delivery stays later.
    order.sort_by_key(|&i| instants[i]);

    let mut keep: Vec<u64> = Vec::with_capacity(order.len());
    let mut sorted: Vec<Instant> = Vec::with_capacity(order.len());
    for (pos, &idx) in order.iter().enumerate() {
        let next_same = order
            .get(pos + 1)
            .is_some_and(|&next| instants[next] == instants[idx]);
        if !next_same {
            keep.push(idx as u64);
            sorted.push(instants[idx]);
        }
    }

    debug!(
        "normalised incoming batch: {} samples -> {} after sort/dedup",
        instants.len(),
        sorted.len()
    );

    let indices = UInt64Array::from(keep);
    for (name, field) in fields.iter_mut() {
        if field.kind == FieldKind::TimeVarying {
            field.values =
                take(field.values.as_ref(), &indices, None).context(ArrowSnafu { context: name })?;
        }
    }

    Series::new(TimeAxis::from_sorted_unchecked(sorted, channels), fields)
}

fn concat_instants(first: &[Instant], second: &[Instant], channels: Option<usize>) -> TimeAxis {
    let mut out = Vec::with_capacity(first.len() + second.len());
    out.extend_from_slice(first);
    out.extend_from_slice(second);
    TimeAxis::from_sorted_unchecked(out, channels)
}

/// Sorted union of two strictly increasing slices, duplicates collapsed.
fn sorted_union(a: &[Instant], b: &[Instant]) -> Vec<Instant> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Position of each instant of `side` in `merged`, by binary search.
fn positions(merged: &[Instant], side: &[Instant]) -> Vec<usize> {
    side.iter()
        .map(|&t| merged.partition_point(|&m| m < t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CubbyError;
    use arrow::array::{Float32Array, Float64Array, Int64Array};

    fn series(instants: Vec<Instant>, fields: Vec<(&str, ArrayRef, FieldKind)>) -> Series {
        let fields = fields
            .into_iter()
            .map(|(n, values, kind)| (n.to_string(), FieldData { values, kind }))
            .collect();
        Series::new(TimeAxis::new(instants).unwrap(), fields).unwrap()
    }

    fn f64s(values: &[f64]) -> ArrayRef {
        Arc::new(Float64Array::from(values.to_vec()))
    }

    fn as_f64(values: &ArrayRef) -> Vec<f64> {
        values
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn overlapping_load_overwrites_collisions() {
        let a = series(
            vec![0, 1, 2, 3],
            vec![("v", f64s(&[10.0, 20.0, 30.0, 40.0]), FieldKind::TimeVarying)],
        );
        let b = series(
            vec![2, 3, 4, 5],
            vec![("v", f64s(&[31.0, 41.0, 50.0, 60.0]), FieldKind::TimeVarying)],
        );
        let (merged, strategy) = merge_series(&a, &b).unwrap();
        assert_eq!(strategy, MergeStrategy::Interleave);
        assert_eq!(merged.time.instants(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(
            as_f64(merged.values("v").unwrap()),
            vec![10.0, 20.0, 31.0, 41.0, 50.0, 60.0]
        );
    }

    #[test]
    fn disjoint_loads_take_fast_paths() {
        let early = series(vec![0, 1], vec![("v", f64s(&[1.0, 2.0]), FieldKind::TimeVarying)]);
        let late = series(vec![5, 6], vec![("v", f64s(&[5.0, 6.0]), FieldKind::TimeVarying)]);

        let (appended, s1) = merge_series(&early, &late).unwrap();
        assert_eq!(s1, MergeStrategy::Append);
        assert_eq!(appended.time.instants(), &[0, 1, 5, 6]);

        let (prepended, s2) = merge_series(&late, &early).unwrap();
        assert_eq!(s2, MergeStrategy::Prepend);
        assert_eq!(prepended.time.instants(), &[0, 1, 5, 6]);
        assert_eq!(as_f64(prepended.values("v").unwrap()), vec![1.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn dtype_is_preserved() {
        let a = series(
            vec![0, 2],
            vec![("n", Arc::new(Int64Array::from(vec![1, 3])) as ArrayRef, FieldKind::TimeVarying)],
        );
        let b = series(
            vec![1],
            vec![("n", Arc::new(Int64Array::from(vec![2])) as ArrayRef, FieldKind::TimeVarying)],
        );
        let (merged, _) = merge_series(&a, &b).unwrap();
        let n = merged.values("n").unwrap();
        let n = n.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(n.values().to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn dtype_disagreement_is_reported() {
        let a = series(vec![0], vec![("v", f64s(&[1.0]), FieldKind::TimeVarying)]);
        let b = series(
            vec![0],
            vec![(
                "v",
                Arc::new(Float32Array::from(vec![1.0f32])) as ArrayRef,
                FieldKind::TimeVarying,
            )],
        );
        assert!(matches!(
            merge_series(&a, &b),
            Err(CubbyError::DataTypeMismatch { .. })
        ));
    }

    #[test]
    fn static_fields_are_not_reindexed() {
        let bins = f64s(&[100.0, 200.0, 300.0]);
        let a = series(
            vec![0, 1],
            vec![
                ("v", f64s(&[1.0, 2.0]), FieldKind::TimeVarying),
                ("bins", Arc::clone(&bins), FieldKind::Static),
            ],
        );
        let b = series(vec![1, 2], vec![("v", f64s(&[9.0, 3.0]), FieldKind::TimeVarying)]);
        let (merged, _) = merge_series(&a, &b).unwrap();
        assert_eq!(as_f64(merged.values("bins").unwrap()), vec![100.0, 200.0, 300.0]);
        assert_eq!(merged.fields["bins"].kind, FieldKind::Static);
        assert_eq!(as_f64(merged.values("v").unwrap()), vec![1.0, 9.0, 3.0]);
    }

    #[test]
    fn field_missing_on_one_side_is_null_filled() {
        let a = series(vec![0, 1], vec![("v", f64s(&[1.0, 2.0]), FieldKind::TimeVarying)]);
        let b = series(
            vec![1, 2],
            vec![
                ("v", f64s(&[3.0, 4.0]), FieldKind::TimeVarying),
                ("w", f64s(&[7.0, 8.0]), FieldKind::TimeVarying),
            ],
        );
        let (merged, _) = merge_series(&a, &b).unwrap();
        let w = merged.values("w").unwrap();
        assert_eq!(w.len(), 3);
        assert!(w.is_null(0));
        assert!(!w.is_null(1));
    }

    #[test]
    fn plan_rejects_misclassified_lengths() {
        let plan = MergePlan::build(
            &TimeAxis::new(vec![0, 1]).unwrap(),
            &TimeAxis::new(vec![1, 2]).unwrap(),
        )
        .unwrap();
        let wrong = f64s(&[1.0, 2.0, 3.0]);
        let right = f64s(&[1.0, 2.0]);
        let err = plan.apply("bins", Some(&wrong), Some(&right)).unwrap_err();
        assert!(matches!(
            err,
            CubbyError::ShapeMismatch {
                expected: 2,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn rank2_channel_mismatch_is_rejected() {
        let a = TimeAxis::rank2(vec![0, 1], 4).unwrap();
        let b = TimeAxis::rank2(vec![2], 8).unwrap();
        assert!(matches!(
            MergePlan::build(&a, &b),
            Err(CubbyError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn normalise_sorts_and_keeps_last_duplicate() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "v".to_string(),
            FieldData {
                values: f64s(&[3.0, 1.0, 2.0, 1.5]),
                kind: FieldKind::TimeVarying,
            },
        );
        let series = normalise_incoming(vec![3, 1, 2, 1], None, fields).unwrap();
        assert_eq!(series.time.instants(), &[1, 2, 3]);
        assert_eq!(as_f64(series.values("v").unwrap()), vec![1.5, 2.0, 3.0]);
    }

    #[test]
    fn union_and_positions() {
        let merged = sorted_union(&[0, 2, 4], &[1, 2, 5]);
        assert_eq!(merged, vec![0, 1, 2, 4, 5]);
        assert_eq!(positions(&merged, &[1, 2, 5]), vec![1, 2, 4]);
    }
}
