//! Payload fields and the static / time-varying classification rule.
//!
//! A payload field is an Arrow array. Time-varying fields have one row per
//! time sample and are re-indexed on merge and sliced on clip. Static fields
//! (a fixed energy or frequency channel axis, for example) are neither: they
//! are loaded once and replaced wholesale when a later load redefines them.
//!
//! Getting this wrong is the most damaging bug class in the store, so the
//! rule is explicit and ordered ([`classify`]):
//!
//! 1. A kind supplied by the producer is authoritative.
//! 2. A kind already recorded for the field in its owning instance is reused,
//!    except that a field only inferred as time-varying is demoted to static
//!    once a later load shows it kept its row count while the time length
//!    changed.
//! 3. A field whose row count equals the incoming time length is time-varying.
//! 4. A field whose row count differs and is at most `static_threshold` is
//!    static.
//! 5. Anything else is a [`crate::error::CubbyError::ShapeMismatch`].
//!
//! A static field is small, fixed and does not grow between loads. A field
//! classified time-varying whose length does not match the time axis is
//! always rejected, never truncated.

use arrow::array::{Array, ArrayRef, FixedSizeListArray};
use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{CubbyResult, ShapeMismatchSnafu};

/// How a payload field relates to the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Leading dimension tracks time.
    TimeVarying,
    /// Does not vary with time.
    Static,
}

/// A field as delivered by a producer, before classification.
#[derive(Debug, Clone)]
pub struct IncomingField {
    /// Variable name inside the owning instance.
    pub name: String,
    /// Payload array; rank-2 payloads are `FixedSizeList` arrays.
    pub values: ArrayRef,
    /// Explicit kind from the producer, if it knows.
    pub kind: Option<FieldKind>,
}

impl IncomingField {
    /// A field whose kind is left to the heuristic.
    pub fn new(name: impl Into<String>, values: ArrayRef) -> Self {
        Self {
            name: name.into(),
            values,
            kind: None,
        }
    }

    /// Attach an explicit kind.
    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// A classified field, ready to merge.
#[derive(Debug, Clone)]
pub struct FieldData {
    /// Payload array.
    pub values: ArrayRef,
    /// Resolved kind.
    pub kind: FieldKind,
}

/// What an owning instance remembers about a field from its last load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRecord {
    /// Kind the field was classified as.
    pub kind: FieldKind,
    /// Whether the producer flagged the kind explicitly.
    pub explicit: bool,
    /// Row count of the field in that load.
    pub rows: usize,
    /// Time length of that load.
    pub time_len: usize,
}

impl FieldRecord {
    /// Whether a field inferred as time-varying has revealed itself static:
    /// its row count stayed put while the time length moved.
    fn is_fixed_length(&self, rows: usize, time_len: usize, static_threshold: usize) -> bool {
        self.kind == FieldKind::TimeVarying
            && !self.explicit
            && rows == self.rows
            && rows != time_len
            && time_len != self.time_len
            && rows <= static_threshold
    }
}

/// Decide whether a field is static or time-varying.
///
/// `explicit` comes from the producer, `recorded` from earlier loads into the
/// same owning instance. See the module docs for the rule order.
pub fn classify(
    name: &str,
    values: &dyn Array,
    time_len: usize,
    explicit: Option<FieldKind>,
    recorded: Option<&FieldRecord>,
    static_threshold: usize,
) -> CubbyResult<FieldKind> {
    let rows = values.len();

    let kind = match (explicit, recorded) {
        (Some(kind), _) => kind,
        (None, Some(record)) if record.is_fixed_length(rows, time_len, static_threshold) => {
            FieldKind::Static
        }
        (None, Some(record)) => record.kind,
        (None, None) if rows == time_len => FieldKind::TimeVarying,
        (None, None) if rows <= static_threshold => FieldKind::Static,
        (None, None) => {
            return ShapeMismatchSnafu {
                field: name,
                expected: time_len,
                actual: rows,
            }
            .fail();
        }
    };

    if kind == FieldKind::TimeVarying {
        ensure_rows(name, values, time_len)?;
    }
    Ok(kind)
}

/// Fail with [`crate::error::CubbyError::ShapeMismatch`] unless `values` has `expected` rows.
pub fn ensure_rows(name: &str, values: &dyn Array, expected: usize) -> CubbyResult<()> {
    ensure!(
        values.len() == expected,
        ShapeMismatchSnafu {
            field: name,
            expected,
            actual: values.len(),
        }
    );
    Ok(())
}

/// Channel width of a rank-2 payload, `None` for rank-1 payloads.
pub fn channels_of(values: &dyn Array) -> Option<usize> {
    match values.data_type() {
        DataType::FixedSizeList(_, width) => usize::try_from(*width).ok(),
        _ => None,
    }
}

/// Borrow a rank-2 payload as a `FixedSizeListArray`.
pub fn as_rank2(values: &dyn Array) -> Option<&FixedSizeListArray> {
    values.as_any().downcast_ref::<FixedSizeListArray>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CubbyError;
    use arrow::array::{Float64Array, Int32Array};
    use std::sync::Arc;

    fn floats(n: usize) -> ArrayRef {
        Arc::new(Float64Array::from_iter_values((0..n).map(|v| v as f64)))
    }

    fn inferred(kind: FieldKind, rows: usize, time_len: usize) -> FieldRecord {
        FieldRecord {
            kind,
            explicit: false,
            rows,
            time_len,
        }
    }

    #[test]
    fn explicit_flag_overrides_heuristic() {
        // 16 rows against 16 samples would look time-varying.
        let bins = floats(16);
        let kind = classify("energy", bins.as_ref(), 16, Some(FieldKind::Static), None, 1000);
        assert_eq!(kind.unwrap(), FieldKind::Static);
    }

    #[test]
    fn heuristic_matches_time_length_first() {
        let v = floats(5);
        assert_eq!(
            classify("v", v.as_ref(), 5, None, None, 1000).unwrap(),
            FieldKind::TimeVarying
        );
        let bins = Arc::new(Int32Array::from(vec![10, 20, 30])) as ArrayRef;
        assert_eq!(
            classify("bins", bins.as_ref(), 5, None, None, 1000).unwrap(),
            FieldKind::Static
        );
    }

    #[test]
    fn large_unmatched_field_is_shape_mismatch() {
        let v = floats(2000);
        let err = classify("v", v.as_ref(), 5, None, None, 1000).unwrap_err();
        assert!(matches!(err, CubbyError::ShapeMismatch { .. }));
    }

    #[test]
    fn inferred_time_varying_with_fixed_length_becomes_static() {
        // A 3-row channel table first arrived next to 3 samples.
        let bins = floats(3);
        let record = inferred(FieldKind::TimeVarying, 3, 3);
        assert_eq!(
            classify("energy", bins.as_ref(), 5, None, Some(&record), 1000).unwrap(),
            FieldKind::Static
        );
    }

    #[test]
    fn growing_field_keeps_time_varying_and_is_rejected() {
        let bins = floats(32);
        let record = inferred(FieldKind::TimeVarying, 20, 20);
        let err = classify("bins", bins.as_ref(), 50, None, Some(&record), 1000).unwrap_err();
        assert!(matches!(
            err,
            CubbyError::ShapeMismatch {
                expected: 50,
                actual: 32,
                ..
            }
        ));
    }

    #[test]
    fn explicit_time_varying_record_is_not_demoted() {
        let bins = floats(3);
        let record = FieldRecord {
            explicit: true,
            ..inferred(FieldKind::TimeVarying, 3, 3)
        };
        let err = classify("bx", bins.as_ref(), 5, None, Some(&record), 1000).unwrap_err();
        assert!(matches!(err, CubbyError::ShapeMismatch { .. }));
    }

    #[test]
    fn fixed_length_above_threshold_is_not_demoted() {
        let bins = floats(3);
        let record = inferred(FieldKind::TimeVarying, 3, 3);
        assert!(classify("bins", bins.as_ref(), 5, None, Some(&record), 2).is_err());
    }

    #[test]
    fn recorded_static_kind_is_sticky() {
        let bins = floats(8);
        let record = inferred(FieldKind::Static, 8, 4);
        assert_eq!(
            classify("bins", bins.as_ref(), 8, None, Some(&record), 1000).unwrap(),
            FieldKind::Static
        );
    }
}
