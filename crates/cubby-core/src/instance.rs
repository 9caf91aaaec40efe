//! Owning instances: named bundles of handles sharing one time axis.
//!
//! An [`OwningInstance`] is created once per collection name and lives as
//! long as its store. Its handles are swapped wholesale whenever storage is
//! reallocated (merge, rebuild, retain); the instance itself, its sticky
//! field kinds and its loaded-window bookkeeping stay put.

use std::collections::BTreeMap;

use arrow::array::Array;
use log::{debug, info, warn};
use snafu::ensure;

use crate::config::StoreConfig;
use crate::error::{ChannelMismatchSnafu, CubbyResult};
use crate::field::{FieldData, FieldKind, FieldRecord, channels_of, classify};
use crate::handle::{GenerationCounter, VariableHandle};
use crate::loaded::LoadedWindows;
use crate::merge::{MergeStrategy, Series, merge_series, normalise_incoming};
use crate::plot_config::PlotConfig;
use crate::preserve::{RestoreReport, with_preserved_configs};
use crate::producer::LoadedBatch;
use crate::time::TimeWindow;
use crate::time_axis::TimeAxis;

/// Outcome of one [`OwningInstance::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    /// How the batch was merged; `None` when the batch was empty and the
    /// storage left untouched.
    pub strategy: Option<MergeStrategy>,
    /// Samples on the instance's axis after the merge.
    pub samples: usize,
    /// Display attributes carried over to the new handles.
    pub restore: RestoreReport,
    /// Fields of the batch classified as static.
    pub static_fields: Vec<String>,
}

/// A named collection of variables sharing one time axis.
#[derive(Debug)]
pub struct OwningInstance {
    name: String,
    time: TimeAxis,
    handles: BTreeMap<String, VariableHandle>,
    kinds: BTreeMap<String, FieldRecord>,
    loaded: LoadedWindows,
}

impl OwningInstance {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time: TimeAxis::empty(),
            handles: BTreeMap::new(),
            kinds: BTreeMap::new(),
            loaded: LoadedWindows::new(),
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared time axis.
    pub fn time(&self) -> &TimeAxis {
        &self.time
    }

    /// Handle for `variable`, if it exists.
    pub fn handle(&self, variable: &str) -> Option<&VariableHandle> {
        self.handles.get(variable)
    }

    pub(crate) fn handle_mut(&mut self, variable: &str) -> Option<&mut VariableHandle> {
        self.handles.get_mut(variable)
    }

    /// Names of every variable, in order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    /// The recorded kind of `field`, once classified.
    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        self.kinds.get(field).map(|record| record.kind)
    }

    /// Windows already handed to a producer.
    pub fn loaded(&self) -> &LoadedWindows {
        &self.loaded
    }

    /// Whether `window` was loaded before.
    pub fn is_window_covered(&self, window: &TimeWindow) -> bool {
        self.loaded.covers(window)
    }

    pub(crate) fn mark_loaded(&mut self, window: &TimeWindow) {
        self.loaded.insert(window);
    }

    /// Handle for `variable`, created empty on first access.
    pub(crate) fn get_or_create(
        &mut self,
        variable: &str,
        generations: &mut GenerationCounter,
    ) -> &VariableHandle {
        let time = &self.time;
        self.handles.entry(variable.to_string()).or_insert_with(|| {
            debug!("creating empty handle {}/{variable}", self.name);
            VariableHandle::placeholder(variable, time, generations.next_generation())
        })
    }

    /// The instance's storage as a merge-ready series.
    pub fn series(&self) -> CubbyResult<Series> {
        series_of(&self.time, &self.handles)
    }

    /// Merge a producer batch into the instance.
    ///
    /// Fields are classified (explicit kind, then recorded kind, then the
    /// length heuristic). A field only inferred as time-varying that keeps its
    /// row count while the time length changes is demoted to static and its
    /// time-varying copy replaced. The batch is sorted and de-duplicated, merged with
    /// the cached series and installed as new handles with their display
    /// attributes carried over. On error the instance is left untouched.
    pub(crate) fn ingest(
        &mut self,
        batch: LoadedBatch,
        window: Option<&TimeWindow>,
        config: &StoreConfig,
        generations: &mut GenerationCounter,
    ) -> CubbyResult<IngestReport> {
        let LoadedBatch {
            time,
            channels,
            fields,
        } = batch;

        if time.is_empty() && fields.is_empty() {
            if let Some(window) = window {
                self.loaded.insert(window);
            }
            return Ok(IngestReport {
                strategy: None,
                samples: self.time.len(),
                restore: RestoreReport::default(),
                static_fields: Vec::new(),
            });
        }

        let mut classified = BTreeMap::new();
        let mut records = Vec::with_capacity(fields.len());
        for field in fields {
            let recorded = self.kinds.get(&field.name);
            let kind = classify(
                &field.name,
                field.values.as_ref(),
                time.len(),
                field.kind,
                recorded,
                config.static_threshold,
            )?;
            if let Some(record) = recorded
                && record.kind == FieldKind::TimeVarying
                && kind == FieldKind::Static
            {
                warn!(
                    "{}/{}: {} rows unchanged while time length moved {} -> {}; now static",
                    self.name,
                    field.name,
                    record.rows,
                    record.time_len,
                    time.len()
                );
            }
            if kind == FieldKind::TimeVarying
                && let (Some(expected), Some(actual)) =
                    (channels, channels_of(field.values.as_ref()))
            {
                ensure!(
                    expected == actual,
                    ChannelMismatchSnafu {
                        context: field.name.as_str(),
                        left: Some(expected),
                        right: Some(actual),
                    }
                );
            }
            records.push((
                field.name.clone(),
                FieldRecord {
                    kind,
                    explicit: field.kind.is_some() || recorded.is_some_and(|r| r.explicit),
                    rows: field.values.len(),
                    time_len: time.len(),
                },
            ));
            classified.insert(
                field.name,
                FieldData {
                    values: field.values,
                    kind,
                },
            );
        }

        let static_fields: Vec<String> = classified
            .iter()
            .filter(|(_, f)| f.kind == FieldKind::Static)
            .map(|(name, _)| name.clone())
            .collect();
        let incoming = normalise_incoming(time, channels, classified)?;

        let mut strategy = None;
        let restore = self.install(generations, |time, handles| {
            let existing = series_of(time, handles)?;
            let (merged, used) = merge_series(&existing, &incoming)?;
            strategy = Some(used);
            Ok(merged)
        })?;

        self.kinds.extend(records);
        if let Some(window) = window {
            self.loaded.insert(window);
        }

        info!(
            "ingested {} samples into {} ({:?}); axis now holds {}",
            incoming.time.len(),
            self.name,
            strategy,
            self.time.len()
        );

        Ok(IngestReport {
            strategy,
            samples: self.time.len(),
            restore,
            static_fields,
        })
    }

    /// Rebind every handle to the current storage with fresh generations.
    ///
    /// Clip caches start empty on the new handles; display attributes are
    /// carried over.
    pub(crate) fn rebuild(
        &mut self,
        generations: &mut GenerationCounter,
    ) -> CubbyResult<RestoreReport> {
        self.install(generations, series_of)
    }

    /// Drop every sample outside `window`.
    ///
    /// Static fields are kept whole. Loaded-window bookkeeping is trimmed to
    /// `window` as well, so a later load outside it goes back to the producer.
    pub(crate) fn retain_window(
        &mut self,
        window: &TimeWindow,
        generations: &mut GenerationCounter,
    ) -> CubbyResult<RestoreReport> {
        let report = self.install(generations, |time, handles| {
            let bounds = time.window_bounds(window);
            let fields = handles
                .iter()
                .map(|(name, handle)| {
                    let values = match handle.kind() {
                        FieldKind::Static => handle.values().clone(),
                        FieldKind::TimeVarying => handle.values().slice(bounds.start, bounds.len()),
                    };
                    (
                        name.clone(),
                        FieldData {
                            values,
                            kind: handle.kind(),
                        },
                    )
                })
                .collect();
            Series::new(time.slice(bounds), fields)
        })?;
        self.loaded.retain(window);
        Ok(report)
    }

    /// Replace the storage with whatever `build` produces, through the
    /// preservation pass.
    fn install<F>(
        &mut self,
        generations: &mut GenerationCounter,
        build: F,
    ) -> CubbyResult<RestoreReport>
    where
        F: FnOnce(&TimeAxis, &BTreeMap<String, VariableHandle>) -> CubbyResult<Series>,
    {
        let mut new_time = None;
        let time = &self.time;
        let report = with_preserved_configs(&mut self.handles, |current| {
            let series = build(time, current)?;
            let handles = series
                .fields
                .into_iter()
                .map(|(name, field)| {
                    let handle = VariableHandle::new(
                        name.as_str(),
                        field.values,
                        field.kind,
                        series.time.clone(),
                        PlotConfig::default(),
                        generations.next_generation(),
                    );
                    (name, handle)
                })
                .collect();
            new_time = Some(series.time);
            Ok(handles)
        })?;

        if let Some(time) = new_time {
            self.time = time;
        }
        Ok(report)
    }
}

fn series_of(time: &TimeAxis, handles: &BTreeMap<String, VariableHandle>) -> CubbyResult<Series> {
    let fields = handles
        .iter()
        .map(|(name, handle)| {
            (
                name.clone(),
                FieldData {
                    values: handle.values().clone(),
                    kind: handle.kind(),
                },
            )
        })
        .collect();
    Series::new(time.clone(), fields)
}
