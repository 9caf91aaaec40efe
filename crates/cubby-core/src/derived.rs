//! Derived variables: arithmetic over other variables.
//!
//! A [`DerivedVariable`] owns its result handle outright: its own time axis
//! view, its own payload and its own [`PlotConfig`], cloned from the first
//! source when the variable is created. Changing a source's display
//! attributes afterwards does not touch the derived one, and the reverse.
//!
//! Every evaluation clips each source afresh against one common window (the
//! tracker's window, or the full axes when none is set); cached clips are not
//! consulted. Operands must then share the exact same instants. Arithmetic
//! runs in `Float64` through Arrow's numeric kernels; rank-2 operands are
//! combined element-wise when their channel counts agree.

use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, FixedSizeListArray, Float64Array};
use arrow::buffer::NullBuffer;
use arrow::compute::kernels::numeric::{add, div, mul, sub};
use arrow::compute::{cast, unary};
use arrow::datatypes::{DataType, Field, Float64Type};
use log::debug;
use snafu::{OptionExt, ResultExt, ensure};

use crate::error::{
    ArrowSnafu, ChannelMismatchSnafu, CubbyResult, InvalidOperandsSnafu, MisalignedOperandsSnafu,
    UnsupportedDataTypeSnafu,
};
use crate::field::{FieldKind, as_rank2, channels_of};
use crate::handle::VariableHandle;
use crate::plot_config::PlotConfig;
use crate::preserve::{ConfigSnapshot, LostAttribute, RestoreReport};
use crate::store::{Store, VariableKey};
use crate::time::TimeWindow;
use crate::time_axis::TimeAxis;

/// Operation a derived variable applies to its sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerivedOp {
    /// Sum of two or more sources.
    Add,
    /// First source minus each following one.
    Subtract,
    /// Product of two or more sources.
    Multiply,
    /// First source divided by each following one.
    Divide,
    /// One source times a constant.
    Scale(f64),
    /// One source plus a constant.
    Offset(f64),
    /// Euclidean norm across channels of one rank-2 source (absolute value
    /// for a rank-1 source).
    Magnitude,
}

impl DerivedOp {
    fn is_nary(&self) -> bool {
        matches!(
            self,
            DerivedOp::Add | DerivedOp::Subtract | DerivedOp::Multiply | DerivedOp::Divide
        )
    }
}

impl fmt::Display for DerivedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivedOp::Add => f.write_str("add"),
            DerivedOp::Subtract => f.write_str("subtract"),
            DerivedOp::Multiply => f.write_str("multiply"),
            DerivedOp::Divide => f.write_str("divide"),
            DerivedOp::Scale(k) => write!(f, "scale({k})"),
            DerivedOp::Offset(k) => write!(f, "offset({k})"),
            DerivedOp::Magnitude => f.write_str("magnitude"),
        }
    }
}

/// A variable computed from other variables.
#[derive(Debug)]
pub struct DerivedVariable {
    op: DerivedOp,
    sources: Vec<VariableKey>,
    source_generations: Vec<u64>,
    window: Option<TimeWindow>,
    handle: VariableHandle,
}

impl DerivedVariable {
    /// Evaluate `op` over `operands` (paired with their keys) clipped to
    /// `window`, giving the result handle `generation`.
    ///
    /// The result's display attributes are a copy of the first source's,
    /// labelled with `name`.
    pub fn evaluate(
        name: &str,
        op: DerivedOp,
        operands: &[(&VariableKey, &VariableHandle)],
        window: Option<TimeWindow>,
        generation: u64,
    ) -> CubbyResult<Self> {
        let handles: Vec<&VariableHandle> = operands.iter().map(|(_, h)| *h).collect();
        let (time, values) = combine(op, &handles, window.as_ref())?;

        let config = handles
            .first()
            .map(|h| h.config().clone())
            .unwrap_or_default()
            .with_label(name);

        Ok(Self {
            op,
            sources: operands.iter().map(|(k, _)| (*k).clone()).collect(),
            source_generations: handles.iter().map(|h| h.generation()).collect(),
            window,
            handle: VariableHandle::new(
                name,
                values,
                FieldKind::TimeVarying,
                time,
                config,
                generation,
            ),
        })
    }

    /// Recompute against the current state of the sources, keeping this
    /// variable's own display attributes.
    pub fn reevaluate(
        &mut self,
        operands: &[&VariableHandle],
        window: Option<TimeWindow>,
        generation: u64,
    ) -> CubbyResult<RestoreReport> {
        let (time, values) = combine(self.op, operands, window.as_ref())?;
        let snapshot = ConfigSnapshot::capture(self.handle.config());

        let mut handle = VariableHandle::new(
            self.handle.name(),
            values,
            FieldKind::TimeVarying,
            time,
            PlotConfig::default(),
            generation,
        );
        let (config, lost) = snapshot.restore();
        handle.set_config(config);

        self.source_generations = operands.iter().map(|h| h.generation()).collect();
        self.window = window;
        self.handle = handle;

        Ok(RestoreReport {
            restored: 1,
            lost: lost
                .into_iter()
                .map(|attribute| LostAttribute {
                    variable: self.handle.name().to_string(),
                    attribute: Some(attribute),
                })
                .collect(),
        })
    }

    /// The operation.
    pub fn op(&self) -> DerivedOp {
        self.op
    }

    /// Source variables, in operand order.
    pub fn sources(&self) -> &[VariableKey] {
        &self.sources
    }

    /// Source generations the current result was computed from.
    pub fn source_generations(&self) -> &[u64] {
        &self.source_generations
    }

    /// Window the current result was computed for.
    pub fn window(&self) -> Option<TimeWindow> {
        self.window
    }

    /// The result handle.
    pub fn handle(&self) -> &VariableHandle {
        &self.handle
    }

    /// Mutable display attributes of the result.
    pub fn config_mut(&mut self) -> &mut PlotConfig {
        self.handle.config_mut()
    }

    /// Whether any source was replaced (or removed) in `store` since the
    /// result was computed.
    pub fn is_stale(&self, store: &Store) -> bool {
        let current: Vec<Option<u64>> = self
            .sources
            .iter()
            .map(|key| store.lookup_key(key).ok().map(VariableHandle::generation))
            .collect();
        self.is_stale_against(&current)
    }

    /// Whether any source generation differs from `current`, given in
    /// operand order (`None` for a source that no longer exists).
    pub fn is_stale_against(&self, current: &[Option<u64>]) -> bool {
        current.len() != self.source_generations.len()
            || current
                .iter()
                .zip(&self.source_generations)
                .any(|(now, then)| *now != Some(*then))
    }
}

/// Apply `op` to `operands` clipped to `window`.
///
/// Returns the common clipped time axis and the `Float64` result.
pub fn combine(
    op: DerivedOp,
    operands: &[&VariableHandle],
    window: Option<&TimeWindow>,
) -> CubbyResult<(TimeAxis, ArrayRef)> {
    let op_name = op.to_string();
    if op.is_nary() {
        ensure!(
            operands.len() >= 2,
            InvalidOperandsSnafu {
                op: op_name,
                reason: format!("needs at least two sources, got {}", operands.len()),
            }
        );
    } else {
        ensure!(
            operands.len() == 1,
            InvalidOperandsSnafu {
                op: op_name,
                reason: format!("needs exactly one source, got {}", operands.len()),
            }
        );
    }

    let mut views = Vec::with_capacity(operands.len());
    for handle in operands {
        ensure!(
            handle.kind() == FieldKind::TimeVarying,
            InvalidOperandsSnafu {
                op: op_name.as_str(),
                reason: format!("{} is a static field", handle.name()),
            }
        );
        // Fresh clip: the cache may hold a window from another request.
        let view = handle.clip_to(window);
        views.push((handle.name(), view.time, to_f64(handle.name(), &view.values)?));
    }

    let (first_name, time, first) = views.remove(0);
    for (name, other_time, _) in &views {
        ensure!(
            other_time.instants() == time.instants(),
            MisalignedOperandsSnafu {
                left: first_name,
                right: *name,
                left_len: time.len(),
                right_len: other_time.len(),
            }
        );
    }

    debug!(
        "evaluating {op} over {} operand(s), {} samples",
        views.len() + 1,
        time.len()
    );

    let result = match op {
        DerivedOp::Add | DerivedOp::Subtract | DerivedOp::Multiply | DerivedOp::Divide => {
            let mut acc = first;
            for (name, _, rhs) in &views {
                acc = binary(op, first_name, name, &acc, rhs)?;
            }
            acc
        }
        DerivedOp::Scale(k) => scalar(op, first_name, &first, k)?,
        DerivedOp::Offset(k) => scalar(op, first_name, &first, k)?,
        DerivedOp::Magnitude => magnitude(first_name, &first)?,
    };

    let time = match (op, time.channels()) {
        (DerivedOp::Magnitude, Some(_)) => {
            TimeAxis::from_sorted_unchecked(time.instants().to_vec(), None)
        }
        _ => time,
    };
    Ok((time, result))
}

/// Cast a rank-1 or rank-2 numeric payload to `Float64`.
fn to_f64(name: &str, values: &ArrayRef) -> CubbyResult<ArrayRef> {
    let target = match values.data_type() {
        DataType::FixedSizeList(item, width) if item.data_type().is_numeric() => {
            DataType::FixedSizeList(
                Arc::new(Field::new(item.name(), DataType::Float64, true)),
                *width,
            )
        }
        dt if dt.is_numeric() => DataType::Float64,
        other => {
            return UnsupportedDataTypeSnafu {
                field: name,
                datatype: other.clone(),
            }
            .fail();
        }
    };
    if values.data_type() == &target {
        return Ok(Arc::clone(values));
    }
    cast(values.as_ref(), &target).context(ArrowSnafu { context: name })
}

fn binary(
    op: DerivedOp,
    left_name: &str,
    right_name: &str,
    lhs: &ArrayRef,
    rhs: &ArrayRef,
) -> CubbyResult<ArrayRef> {
    let kernel = |l: &ArrayRef, r: &ArrayRef| match op {
        DerivedOp::Add => add(l, r),
        DerivedOp::Subtract => sub(l, r),
        DerivedOp::Multiply => mul(l, r),
        _ => div(l, r),
    };

    ensure!(
        channels_of(lhs.as_ref()) == channels_of(rhs.as_ref()),
        ChannelMismatchSnafu {
            context: format!("{op} of {left_name} and {right_name}"),
            left: channels_of(lhs.as_ref()),
            right: channels_of(rhs.as_ref()),
        }
    );

    match (as_rank2(lhs.as_ref()), as_rank2(rhs.as_ref())) {
        (Some(l), Some(r)) => {
            let values = kernel(l.values(), r.values()).context(ArrowSnafu { context: left_name })?;
            let nulls = NullBuffer::union(l.nulls(), r.nulls());
            rebuild_rank2(left_name, l, values, nulls)
        }
        _ => kernel(lhs, rhs).context(ArrowSnafu { context: left_name }),
    }
}

fn scalar(op: DerivedOp, name: &str, values: &ArrayRef, k: f64) -> CubbyResult<ArrayRef> {
    let k = Float64Array::new_scalar(k);
    let apply = |v: &ArrayRef| match op {
        DerivedOp::Offset(_) => add(v, &k),
        _ => mul(v, &k),
    };
    match as_rank2(values.as_ref()) {
        Some(list) => {
            let inner = apply(list.values()).context(ArrowSnafu { context: name })?;
            rebuild_rank2(name, list, inner, list.nulls().cloned())
        }
        None => apply(values).context(ArrowSnafu { context: name }),
    }
}

fn magnitude(name: &str, values: &ArrayRef) -> CubbyResult<ArrayRef> {
    let Some(list) = as_rank2(values.as_ref()) else {
        let flat = values
            .as_any()
            .downcast_ref::<Float64Array>()
            .context(InvalidOperandsSnafu {
                op: "magnitude",
                reason: format!("{name} is not a Float64 array"),
            })?;
        let abs: Float64Array = unary::<Float64Type, _, Float64Type>(flat, f64::abs);
        return Ok(Arc::new(abs));
    };

    let width = list.value_length() as usize;
    let child = list
        .values()
        .as_any()
        .downcast_ref::<Float64Array>()
        .context(InvalidOperandsSnafu {
            op: "magnitude",
            reason: format!("{name} does not hold Float64 channels"),
        })?;

    let norms: Float64Array = (0..list.len())
        .map(|row| {
            if list.is_null(row) {
                return None;
            }
            let start = row * width;
            let sum: f64 = (start..start + width)
                .filter(|&i| child.is_valid(i))
                .map(|i| child.value(i).powi(2))
                .sum();
            Some(sum.sqrt())
        })
        .collect();
    Ok(Arc::new(norms))
}

fn rebuild_rank2(
    name: &str,
    template: &FixedSizeListArray,
    values: ArrayRef,
    nulls: Option<NullBuffer>,
) -> CubbyResult<ArrayRef> {
    let DataType::FixedSizeList(item, width) = template.data_type() else {
        return InvalidOperandsSnafu {
            op: "rank-2 arithmetic",
            reason: format!("{name} is not a fixed-size list"),
        }
        .fail();
    };
    let list = FixedSizeListArray::try_new(Arc::clone(item), *width, values, nulls)
        .context(ArrowSnafu { context: name })?;
    Ok(Arc::new(list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CubbyError;
    use arrow::array::{Float32Array, Int32Array};

    fn handle(name: &str, instants: Vec<i64>, values: ArrayRef) -> VariableHandle {
        VariableHandle::new(
            name,
            values,
            FieldKind::TimeVarying,
            TimeAxis::new(instants).unwrap(),
            PlotConfig::default(),
            1,
        )
    }

    fn f64s(values: &ArrayRef) -> Vec<f64> {
        values
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    fn rank2(name: &str, instants: Vec<i64>, flat: Vec<f64>, width: i32) -> VariableHandle {
        let list = FixedSizeListArray::new(
            Arc::new(Field::new("item", DataType::Float64, true)),
            width,
            Arc::new(Float64Array::from(flat)),
            None,
        );
        let channels = width as usize;
        VariableHandle::new(
            name,
            Arc::new(list),
            FieldKind::TimeVarying,
            TimeAxis::rank2(instants, channels).unwrap(),
            PlotConfig::default(),
            1,
        )
    }

    #[test]
    fn nary_ops_fold_left_in_f64() {
        let a = handle("a", vec![0, 1, 2], Arc::new(Float64Array::from(vec![10.0, 20.0, 30.0])));
        let b = handle("b", vec![0, 1, 2], Arc::new(Int32Array::from(vec![1, 2, 3])));
        let c = handle("c", vec![0, 1, 2], Arc::new(Float32Array::from(vec![1.0, 1.0, 1.0])));

        let (_, sum) = combine(DerivedOp::Add, &[&a, &b, &c], None).unwrap();
        assert_eq!(f64s(&sum), vec![12.0, 23.0, 34.0]);

        let (_, diff) = combine(DerivedOp::Subtract, &[&a, &b, &c], None).unwrap();
        assert_eq!(f64s(&diff), vec![8.0, 17.0, 26.0]);

        let (_, quot) = combine(DerivedOp::Divide, &[&a, &b], None).unwrap();
        assert_eq!(f64s(&quot), vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn operands_are_clipped_to_the_window_first() {
        let a_values = Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0, 4.0]));
        let b_values = Arc::new(Float64Array::from(vec![1.0, 1.0, 1.0, 1.0]));
        let a = handle("a", vec![0, 1, 2, 3], a_values);
        let b = handle("b", vec![1, 2, 3, 4], b_values);

        assert!(matches!(
            combine(DerivedOp::Multiply, &[&a, &b], None),
            Err(CubbyError::MisalignedOperands { .. })
        ));

        let window = TimeWindow::closed(1, 3).unwrap();
        let (time, product) = combine(DerivedOp::Multiply, &[&a, &b], Some(&window)).unwrap();
        assert_eq!(time.instants(), &[1, 2, 3]);
        assert_eq!(f64s(&product), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn arity_and_dtype_are_checked() {
        let a = handle("a", vec![0], Arc::new(Float64Array::from(vec![1.0])));
        assert!(matches!(
            combine(DerivedOp::Add, &[&a], None),
            Err(CubbyError::InvalidOperands { .. })
        ));
        assert!(matches!(
            combine(DerivedOp::Scale(2.0), &[&a, &a], None),
            Err(CubbyError::InvalidOperands { .. })
        ));

        let text = handle("s", vec![0], Arc::new(arrow::array::StringArray::from(vec!["x"])));
        assert!(matches!(
            combine(DerivedOp::Offset(1.0), &[&text], None),
            Err(CubbyError::UnsupportedDataType { .. })
        ));
    }

    #[test]
    fn magnitude_reduces_rank2_to_rank1() {
        let b = rank2("b", vec![0, 1], vec![3.0, 4.0, 0.0, 0.0, 0.0, 2.0], 3);
        let (time, norm) = combine(DerivedOp::Magnitude, &[&b], None).unwrap();
        assert_eq!(time.channels(), None);
        let norm = f64s(&norm);
        assert!((norm[0] - 5.0).abs() < 1e-12);
        assert!((norm[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn rank2_arithmetic_is_elementwise() {
        let a = rank2("a", vec![0, 1], vec![1.0, 2.0, 3.0, 4.0], 2);
        let b = rank2("b", vec![0, 1], vec![10.0, 20.0, 30.0, 40.0], 2);
        let (time, sum) = combine(DerivedOp::Add, &[&a, &b], None).unwrap();
        assert_eq!(time.channels(), Some(2));
        let list = as_rank2(sum.as_ref()).unwrap();
        assert_eq!(f64s(list.values()), vec![11.0, 22.0, 33.0, 44.0]);

        let (_, scaled) = combine(DerivedOp::Scale(0.5), &[&a], None).unwrap();
        let list = as_rank2(scaled.as_ref()).unwrap();
        assert_eq!(f64s(list.values()), vec![0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn derived_config_is_independent_of_source() {
        let mut src = handle("bx", vec![0, 1], Arc::new(Float64Array::from(vec![1.0, 2.0])));
        src.config_mut().color = Some("blue".into());
        let key = VariableKey::new("fgm", "bx");

        let mut derived =
            DerivedVariable::evaluate("bx_nT", DerivedOp::Scale(1e9), &[(&key, &src)], None, 7)
                .unwrap();
        assert_eq!(derived.handle().config().color.as_deref(), Some("blue"));
        assert_eq!(derived.handle().config().label.as_deref(), Some("bx_nT"));

        derived.config_mut().color = Some("red".into());
        assert_eq!(src.config().color.as_deref(), Some("blue"));

        src.config_mut().color = Some("green".into());
        let report = derived.reevaluate(&[&src], None, 8).unwrap();
        assert!(report.is_clean());
        assert_eq!(derived.handle().config().color.as_deref(), Some("red"));
        assert_eq!(derived.handle().generation(), 8);
    }

    #[test]
    fn staleness_follows_source_generations() {
        let src = handle("bx", vec![0], Arc::new(Float64Array::from(vec![1.0])));
        let key = VariableKey::new("fgm", "bx");
        let derived =
            DerivedVariable::evaluate("neg", DerivedOp::Scale(-1.0), &[(&key, &src)], None, 2)
                .unwrap();
        assert!(!derived.is_stale_against(&[Some(1)]));
        assert!(derived.is_stale_against(&[Some(3)]));
        assert!(derived.is_stale_against(&[None]));
    }
}
