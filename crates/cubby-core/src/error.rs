//! Error types and SNAFU context selectors for the variable store.
//!
//! Every fallible operation in this crate returns [`CubbyError`]. Merge and
//! shape errors always surface to the caller; a series is never truncated or
//! padded to make it fit.
//!
//! Two conditions are not errors:
//! - a clip whose window does not overlap the data yields a zero-length view;
//! - a stale window left by a nested request, or a display attribute that
//!   could not be restored, is logged with `log::warn!` and reported through
//!   return values instead.

use arrow::{datatypes::DataType, error::ArrowError};
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::time::Instant;

/// Boxed error returned by a [`crate::producer::Producer`].
pub type BoxedProducerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type CubbyResult<T> = Result<T, CubbyError>;

/// Errors from store, merge, clip and derived-variable operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CubbyError {
    /// A field's length disagrees with the time axis it is indexed by.
    ///
    /// This almost always means a static field was treated as time-varying
    /// (or the reverse). Supply an explicit field kind from the producer to
    /// resolve it.
    #[snafu(display(
        "Shape mismatch for field {field}: expected {expected} rows to match the time axis, found {actual} (misclassified static/time-varying field?)"
    ))]
    ShapeMismatch {
        /// Name of the offending field.
        field: String,
        /// Length implied by the time axis.
        expected: usize,
        /// Length actually found.
        actual: usize,
    },

    /// Existing and incoming data for the same field have different dtypes.
    #[snafu(display(
        "Data type mismatch for field {field}: cached {existing:?}, incoming {incoming:?}"
    ))]
    DataTypeMismatch {
        /// Name of the offending field.
        field: String,
        /// Data type of the cached array.
        existing: DataType,
        /// Data type of the incoming array.
        incoming: DataType,
    },

    /// Two time axes (or operands) disagree on the channel dimension.
    #[snafu(display("Channel mismatch for {context}: {left:?} vs {right:?}"))]
    ChannelMismatch {
        /// What was being reconciled.
        context: String,
        /// Channel count on the left / cached side (`None` for rank-1).
        left: Option<usize>,
        /// Channel count on the right / incoming side (`None` for rank-1).
        right: Option<usize>,
    },

    /// A rank-2 time row was not constant along the channel dimension.
    #[snafu(display("Time row {row} is not constant across channels"))]
    NonConstantTimeRow {
        /// Index of the first offending row.
        row: usize,
    },

    /// Rows of a rank-2 time axis have different widths.
    #[snafu(display("Time row {row} has {actual} channels, expected {expected}"))]
    RaggedTimeRows {
        /// Index of the first offending row.
        row: usize,
        /// Width of the first row.
        expected: usize,
        /// Width of the offending row.
        actual: usize,
    },

    /// A time axis was not strictly increasing.
    #[snafu(display(
        "Time axis is not strictly increasing at index {index} ({previous} then {current})"
    ))]
    UnsortedTimeAxis {
        /// Index of the first instant that broke the ordering.
        index: usize,
        /// The instant before it.
        previous: Instant,
        /// The offending instant.
        current: Instant,
    },

    /// Window bounds are inverted (or empty for a half-open window).
    #[snafu(display("Invalid window: start={start}, end={end}"))]
    InvalidWindow {
        /// Lower bound supplied by the caller.
        start: Instant,
        /// Upper bound supplied by the caller.
        end: Instant,
    },

    /// Converting a calendar timestamp to nanoseconds would overflow `i64`.
    #[snafu(display("Timestamp {timestamp} cannot be represented as i64 nanoseconds"))]
    TimeConversionOverflow {
        /// The timestamp that could not be converted.
        timestamp: DateTime<Utc>,
    },

    /// A bucket id does not fit into the `u32` coverage domain.
    #[snafu(display("Instant {instant} maps to bucket {bucket} outside the u32 coverage domain"))]
    BucketOutOfRange {
        /// The instant being bucketed.
        instant: Instant,
        /// The computed (signed) bucket id.
        bucket: i64,
    },

    /// Arrow compute or construction error.
    #[snafu(display("Arrow error while processing {context}: {source}"))]
    Arrow {
        /// What was being computed.
        context: String,
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// No owning instance is registered under this name.
    #[snafu(display("Unknown instance {name}"))]
    UnknownInstance {
        /// Requested instance name.
        name: String,
    },

    /// The owning instance exists but has no such variable.
    #[snafu(display("Unknown variable {variable} in instance {instance}"))]
    UnknownVariable {
        /// Instance that was searched.
        instance: String,
        /// Requested variable name.
        variable: String,
    },

    /// No derived variable is registered under this name.
    #[snafu(display("Unknown derived variable {name}"))]
    UnknownDerived {
        /// Requested derived variable name.
        name: String,
    },

    /// Operands of a derived operation do not share the same clipped instants.
    #[snafu(display(
        "Operands {left} and {right} are not aligned in time ({left_len} vs {right_len} samples)"
    ))]
    MisalignedOperands {
        /// Name of the first operand.
        left: String,
        /// Name of the operand that disagrees with it.
        right: String,
        /// Sample count of the first operand.
        left_len: usize,
        /// Sample count of the disagreeing operand.
        right_len: usize,
    },

    /// The operation cannot be applied to the supplied operands.
    #[snafu(display("Invalid operands for {op}: {reason}"))]
    InvalidOperands {
        /// Operation name.
        op: String,
        /// Why the operands were rejected.
        reason: String,
    },

    /// Arithmetic was requested on a non-numeric field.
    #[snafu(display("Field {field} has unsupported data type {datatype:?} for arithmetic"))]
    UnsupportedDataType {
        /// Field name.
        field: String,
        /// Data type encountered.
        datatype: DataType,
    },

    /// The producer failed to deliver samples.
    #[snafu(display("Producer failed to load {name} for {window}: {source}"))]
    Producer {
        /// Instance that was being loaded.
        name: String,
        /// Window that was requested, rendered for display.
        window: String,
        /// Underlying producer error.
        source: BoxedProducerError,
    },
}
