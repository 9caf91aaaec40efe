//! The producer seam: where samples come from.
//!
//! A [`Producer`] fetches raw samples for one owning instance over one window
//! and returns them as a [`LoadedBatch`]. The store decides *whether* to call
//! it ([`crate::store::Store::load_with`] only asks for windows that were not
//! loaded before); the producer only decides *how* to fetch.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array};

use crate::field::{FieldKind, IncomingField};
use crate::time::{Instant, TimeWindow};

/// Source of raw samples for owning instances.
pub trait Producer {
    /// Error type reported by this producer.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the samples of instance `name` inside `window`.
    ///
    /// Returning fewer samples than the window could hold (or none) is fine;
    /// the window still counts as loaded.
    fn load(&mut self, name: &str, window: &TimeWindow) -> Result<LoadedBatch, Self::Error>;
}

/// Samples delivered by a producer for one instance.
///
/// Instants may arrive unsorted and with duplicates; the store normalises
/// them before merging (the last delivered sample for an instant wins).
#[derive(Debug, Clone, Default)]
pub struct LoadedBatch {
    /// One instant per sample.
    pub time: Vec<Instant>,
    /// Channel width when the time axis is rank-2.
    pub channels: Option<usize>,
    /// Payload fields.
    pub fields: Vec<IncomingField>,
}

impl LoadedBatch {
    /// A rank-1 batch with no fields yet.
    pub fn new(time: Vec<Instant>) -> Self {
        Self {
            time,
            channels: None,
            fields: Vec::new(),
        }
    }

    /// A rank-2 batch whose time rows span `channels` columns.
    pub fn rank2(time: Vec<Instant>, channels: usize) -> Self {
        Self {
            time,
            channels: Some(channels),
            fields: Vec::new(),
        }
    }

    /// Add a field, leaving its kind to the classification heuristic.
    pub fn with_field(mut self, name: impl Into<String>, values: ArrayRef) -> Self {
        self.fields.push(IncomingField::new(name, values));
        self
    }

    /// Add a field with an explicit kind.
    pub fn with_kind(mut self, name: impl Into<String>, values: ArrayRef, kind: FieldKind) -> Self {
        self.fields.push(IncomingField::new(name, values).with_kind(kind));
        self
    }

    /// Add a field the producer knows to be static.
    pub fn with_static_field(self, name: impl Into<String>, values: ArrayRef) -> Self {
        self.with_kind(name, values, FieldKind::Static)
    }

    /// Convenience for a rank-1 `Float64` field.
    pub fn with_f64(self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.with_field(name, Arc::new(Float64Array::from(values)))
    }

    /// Number of samples delivered.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Whether the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

impl<P: Producer + ?Sized> Producer for &mut P {
    type Error = P::Error;

    fn load(&mut self, name: &str, window: &TimeWindow) -> Result<LoadedBatch, Self::Error> {
        (**self).load(name, window)
    }
}
