//! # cubby
//!
//! In-memory, time-windowed variable store with lazy clipping, metadata
//! preservation and derived variables.
//!
//! This crate is the supported public entry point and provides a small, stable surface.
//!
//! ## Example
//!
//! ```rust
//! use cubby::prelude::*;
//!
//! let mut store = Store::default();
//! store
//!     .ingest(
//!         "fgm",
//!         LoadedBatch::new(vec![0, 1, 2, 3]).with_f64("bx", vec![10.0, 20.0, 30.0, 40.0]),
//!         None,
//!     )
//!     .unwrap();
//!
//! let tracker = store.tracker().clone();
//! let mut request = tracker.begin_request();
//! request.set_window(TimeWindow::closed(1, 2).unwrap());
//!
//! let bx = store.lookup("fgm", "bx").unwrap();
//! assert_eq!(bx.time_for_window(&tracker).instants(), &[1, 2]);
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Coverage namespace (wrapper-only).
pub mod coverage {
    pub use cubby_core::coverage::{Bucket, Coverage};
}

pub use cubby_core::bucket::{ParseTimeBucketError, TimeBucket};
pub use cubby_core::config::StoreConfig;
pub use cubby_core::derived::{DerivedOp, DerivedVariable};
pub use cubby_core::error::{CubbyError, CubbyResult};
pub use cubby_core::field::{FieldKind, IncomingField};
pub use cubby_core::handle::{ClippedView, VariableHandle};
pub use cubby_core::instance::{IngestReport, OwningInstance};
pub use cubby_core::plot_config::{AxisScale, MarkerStyle, PlotConfig, PlotKind};
pub use cubby_core::preserve::{LostAttribute, RestoreReport};
pub use cubby_core::producer::{LoadedBatch, Producer};
pub use cubby_core::store::{GapReport, LoadReport, Store, VariableKey};
pub use cubby_core::time::{Instant, TimeWindow};
pub use cubby_core::time_axis::TimeAxis;
pub use cubby_core::window::{RequestScope, WindowTracker};
