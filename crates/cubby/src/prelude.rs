//! Wrapper prelude.
//!
//! The `cubby` crate is the supported public entry point. Downstream code
//! should prefer importing from this prelude instead of depending on internal
//! core module paths.

pub use crate::coverage;
pub use crate::{
    AxisScale, ClippedView, CubbyError, CubbyResult, DerivedOp, DerivedVariable, FieldKind,
    GapReport, IncomingField, IngestReport, Instant, LoadReport, LoadedBatch, LostAttribute,
    MarkerStyle, OwningInstance, ParseTimeBucketError, PlotConfig, PlotKind, Producer,
    RequestScope, RestoreReport, Store, StoreConfig, TimeAxis, TimeBucket, TimeWindow,
    VariableHandle, VariableKey, WindowTracker,
};
