//! Variable handles and their lazy clip cache.
//!
//! A [`VariableHandle`] composes one payload array, a view of its owning
//! instance's time axis and a [`PlotConfig`]. Handles are replaced, never
//! mutated, when the instance's storage is reallocated; the store stamps each
//! new handle with a fresh `generation` so callers holding a
//! [`crate::store::VariableKey`] can tell when theirs went stale.
//!
//! Reading a handle through a [`WindowTracker`] goes through [`ClipCache`]:
//! the clip is recomputed only when the tracker's window differs from the one
//! the cache was built for. Clipping is two binary searches plus zero-copy
//! slices, so a window change costs `O(log n)` and a repeated read costs a
//! comparison.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, new_empty_array, new_null_array};
use arrow::datatypes::DataType;
use log::debug;

use crate::field::FieldKind;
use crate::plot_config::PlotConfig;
use crate::time::TimeWindow;
use crate::time_axis::TimeAxis;
use crate::window::WindowTracker;

/// Hands out store-wide, strictly increasing handle generations.
#[derive(Debug, Default)]
pub struct GenerationCounter(u64);

impl GenerationCounter {
    /// Next generation number.
    pub fn next_generation(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

/// A clipped view of a handle: time and payload for one window.
#[derive(Debug, Clone)]
pub struct ClippedView {
    /// Instants inside the window.
    pub time: TimeAxis,
    /// Payload rows inside the window (unsliced for static fields).
    pub values: ArrayRef,
}

impl ClippedView {
    /// Number of samples in the view. Zero is a valid, empty result.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Whether the window selected no samples.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// The last clip computed for a handle and the window it was computed for.
///
/// `window == None` caches the full, unclipped view.
#[derive(Debug, Clone)]
pub struct ClipCache {
    /// Window the view was computed for.
    pub window: Option<TimeWindow>,
    /// The cached view.
    pub view: ClippedView,
}

/// One named variable: payload, time axis view, display config and clip cache.
#[derive(Debug)]
pub struct VariableHandle {
    name: String,
    values: ArrayRef,
    kind: FieldKind,
    time: TimeAxis,
    config: PlotConfig,
    generation: u64,
    cache: RefCell<Option<ClipCache>>,
    clip_computations: Cell<u64>,
}

impl VariableHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        values: ArrayRef,
        kind: FieldKind,
        time: TimeAxis,
        config: PlotConfig,
        generation: u64,
    ) -> Self {
        Self {
            name: name.into(),
            values,
            kind,
            time,
            config,
            generation,
            cache: RefCell::new(None),
            clip_computations: Cell::new(0),
        }
    }

    /// A handle with no data yet, bound to `time`.
    ///
    /// Against an empty axis the payload is a zero-length `Float64` array;
    /// against a populated axis it is an all-null column of matching length.
    pub(crate) fn placeholder(name: impl Into<String>, time: &TimeAxis, generation: u64) -> Self {
        let values = if time.is_empty() {
            new_empty_array(&DataType::Float64)
        } else {
            new_null_array(&DataType::Float64, time.len())
        };
        Self::new(
            name,
            values,
            FieldKind::TimeVarying,
            time.clone(),
            PlotConfig::default(),
            generation,
        )
    }

    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full, unclipped payload.
    pub fn values(&self) -> &ArrayRef {
        &self.values
    }

    /// Static or time-varying.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Full time axis view.
    pub fn time(&self) -> &TimeAxis {
        &self.time
    }

    /// Display attributes.
    pub fn config(&self) -> &PlotConfig {
        &self.config
    }

    /// Mutable display attributes.
    pub fn config_mut(&mut self) -> &mut PlotConfig {
        &mut self.config
    }

    pub(crate) fn set_config(&mut self, config: PlotConfig) {
        self.config = config;
    }

    /// Store-wide generation stamped when this handle was created.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of samples on the full axis.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Whether the handle holds no samples.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// How many times a clip was actually computed (cache misses).
    pub fn clip_computations(&self) -> u64 {
        self.clip_computations.get()
    }

    /// The window the clip cache currently holds, if populated.
    pub fn cached_window(&self) -> Option<Option<TimeWindow>> {
        self.cache.borrow().as_ref().map(|c| c.window)
    }

    /// Clipped view for the tracker's current window, served from cache
    /// when the window has not changed.
    pub fn clipped(&self, tracker: &WindowTracker) -> ClippedView {
        let window = tracker.get_window();
        if let Some(cached) = self.cache.borrow().as_ref()
            && cached.window == window
        {
            return cached.view.clone();
        }

        let view = self.clip_to(window.as_ref());
        self.clip_computations.set(self.clip_computations.get() + 1);
        *self.cache.borrow_mut() = Some(ClipCache {
            window,
            view: view.clone(),
        });
        view
    }

    /// Payload clipped to the tracker's current window.
    pub fn value_for_window(&self, tracker: &WindowTracker) -> ArrayRef {
        self.clipped(tracker).values
    }

    /// Time axis clipped to the tracker's current window.
    pub fn time_for_window(&self, tracker: &WindowTracker) -> TimeAxis {
        self.clipped(tracker).time
    }

    /// Compute a clip for `window` without consulting or updating the cache.
    ///
    /// `None` yields the full view. Time-varying payloads (rank-1 or rank-2)
    /// are sliced along the leading axis only; static payloads are returned
    /// whole.
    pub fn clip_to(&self, window: Option<&TimeWindow>) -> ClippedView {
        let Some(window) = window else {
            return ClippedView {
                time: self.time.clone(),
                values: Arc::clone(&self.values),
            };
        };

        let bounds = self.time.window_bounds(window);
        debug!(
            "clipping {} to {window}: rows {}..{} of {}",
            self.name,
            bounds.start,
            bounds.end,
            self.time.len()
        );

        let time = self.time.slice(bounds.clone());
        let values = match self.kind {
            FieldKind::Static => Arc::clone(&self.values),
            FieldKind::TimeVarying => self.values.slice(bounds.start, bounds.len()),
        };
        ClippedView { time, values }
    }
}
