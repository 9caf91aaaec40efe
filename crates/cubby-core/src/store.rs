//! The variable store.
//!
//! A [`Store`] owns every [`OwningInstance`] and every derived variable, the
//! store-wide generation counter and a shared [`WindowTracker`]. It is the
//! single source of truth: callers borrow handles through [`Store::get`] and
//! [`Store::lookup`] instead of keeping their own copies, so the borrow
//! checker rules out holding a handle across a reallocation. Callers that need
//! to remember a variable across calls keep a [`VariableKey`] plus the
//! handle's generation and check [`Store::is_current`].
//!
//! Loading goes through [`Store::load_with`]: only windows that were never
//! loaded are requested from the [`Producer`], each batch is merged into the
//! owning instance, and display attributes survive the reallocation.

mod coverage_queries;
mod derived_ops;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use log::{debug, info};
use snafu::{OptionExt, ResultExt};

pub use coverage_queries::GapReport;

use crate::config::StoreConfig;
use crate::derived::DerivedVariable;
use crate::error::{
    BoxedProducerError, CubbyResult, ProducerSnafu, UnknownInstanceSnafu, UnknownVariableSnafu,
};
use crate::handle::{GenerationCounter, VariableHandle};
use crate::instance::{IngestReport, OwningInstance};
use crate::plot_config::PlotConfig;
use crate::preserve::RestoreReport;
use crate::producer::{LoadedBatch, Producer};
use crate::time::TimeWindow;
use crate::window::WindowTracker;

/// Names one variable of one owning instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableKey {
    /// Owning instance name.
    pub instance: String,
    /// Variable name inside the instance.
    pub variable: String,
}

impl VariableKey {
    /// Key for `instance`/`variable`.
    pub fn new(instance: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            variable: variable.into(),
        }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.variable)
    }
}

/// Outcome of one [`Store::load_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Sub-windows actually requested from the producer, in order.
    pub requested: Vec<TimeWindow>,
    /// Samples delivered across all requests, before de-duplication.
    pub delivered: usize,
    /// Display attributes carried across the merges.
    pub restore: RestoreReport,
}

impl LoadReport {
    /// Whether the window was already covered and nothing was requested.
    pub fn was_cached(&self) -> bool {
        self.requested.is_empty()
    }
}

/// In-memory, time-windowed variable store.
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    tracker: Rc<WindowTracker>,
    instances: BTreeMap<String, OwningInstance>,
    derived: BTreeMap<String, DerivedVariable>,
    generations: GenerationCounter,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Store {
    /// A store bound to the calling thread's default tracker.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_tracker(config, WindowTracker::current_thread())
    }

    /// A store bound to an explicit tracker.
    pub fn with_tracker(config: StoreConfig, tracker: Rc<WindowTracker>) -> Self {
        Self {
            config,
            tracker,
            instances: BTreeMap::new(),
            derived: BTreeMap::new(),
            generations: GenerationCounter::default(),
        }
    }

    /// The tracker handles are clipped against.
    pub fn tracker(&self) -> &Rc<WindowTracker> {
        &self.tracker
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create the owning instance `name` if it does not exist yet.
    pub fn register(&mut self, name: &str) -> &OwningInstance {
        self.instance_entry(name)
    }

    fn instance_entry(&mut self, name: &str) -> &mut OwningInstance {
        entry(&mut self.instances, name)
    }

    /// The owning instance `name`, if registered.
    pub fn instance(&self, name: &str) -> Option<&OwningInstance> {
        self.instances.get(name)
    }

    /// Names of every registered instance, in order.
    pub fn instance_names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    fn instance_mut_or_err(&mut self, name: &str) -> CubbyResult<&mut OwningInstance> {
        self.instances
            .get_mut(name)
            .context(UnknownInstanceSnafu { name })
    }

    /// Handle for `variable` in instance `name`, creating both empty on first
    /// access.
    pub fn get(&mut self, name: &str, variable: &str) -> &VariableHandle {
        let Self {
            instances,
            generations,
            ..
        } = self;
        let instance = entry(instances, name);
        instance.get_or_create(variable, generations)
    }

    /// Handle for `variable` in instance `name`, without creating anything.
    pub fn lookup(&self, name: &str, variable: &str) -> CubbyResult<&VariableHandle> {
        handle_in(&self.instances, name, variable)
    }

    /// Handle addressed by `key`.
    pub fn lookup_key(&self, key: &VariableKey) -> CubbyResult<&VariableHandle> {
        self.lookup(&key.instance, &key.variable)
    }

    /// Mutable display attributes of `variable` in instance `name`.
    pub fn config_mut(&mut self, name: &str, variable: &str) -> CubbyResult<&mut PlotConfig> {
        self.instance_mut_or_err(name)?
            .handle_mut(variable)
            .map(VariableHandle::config_mut)
            .context(UnknownVariableSnafu {
                instance: name,
                variable,
            })
    }

    /// Whether the handle behind `key` still has `generation`, i.e. was not
    /// replaced since the caller last looked.
    pub fn is_current(&self, key: &VariableKey, generation: u64) -> bool {
        self.lookup_key(key)
            .is_ok_and(|handle| handle.generation() == generation)
    }

    /// Whether `window` was already loaded for instance `name`.
    pub fn is_window_covered(&self, name: &str, window: &TimeWindow) -> bool {
        self.instances
            .get(name)
            .is_some_and(|instance| instance.is_window_covered(window))
    }

    /// Parts of `window` not loaded yet for instance `name`, split per
    /// [`StoreConfig::max_missing_window`].
    pub fn missing_windows(&self, name: &str, window: &TimeWindow) -> Vec<TimeWindow> {
        let max_len = self.config.max_missing_window;
        match self.instances.get(name) {
            Some(instance) => instance.loaded().missing(window, max_len),
            None => crate::loaded::LoadedWindows::new().missing(window, max_len),
        }
    }

    /// Merge a batch into instance `name`, registering it if needed.
    ///
    /// `window`, when given, is recorded as loaded once the merge succeeds.
    pub fn ingest(
        &mut self,
        name: &str,
        batch: LoadedBatch,
        window: Option<&TimeWindow>,
    ) -> CubbyResult<IngestReport> {
        let Self {
            config,
            instances,
            generations,
            ..
        } = self;
        let instance = entry(instances, name);
        instance.ingest(batch, window, config, generations)
    }

    /// Make `window` available for instance `name`, asking `producer` only
    /// for the parts that were never loaded.
    ///
    /// A producer failure aborts the load; sub-windows merged before the
    /// failure stay merged and recorded.
    pub fn load_with<P: Producer>(
        &mut self,
        name: &str,
        window: &TimeWindow,
        producer: &mut P,
    ) -> CubbyResult<LoadReport> {
        let mut report = LoadReport::default();
        let missing = self.missing_windows(name, window);
        if missing.is_empty() {
            debug!("{name}: {window} already loaded");
            self.register(name);
            return Ok(report);
        }

        for sub in missing {
            let batch = producer
                .load(name, &sub)
                .map_err(|e| Box::new(e) as BoxedProducerError)
                .context(ProducerSnafu {
                    name,
                    window: sub.to_string(),
                })?;
            report.delivered += batch.len();
            let ingested = self.ingest(name, batch, Some(&sub))?;
            report.restore.absorb(ingested.restore);
            report.requested.push(sub);
        }

        self.instance_entry(name).mark_loaded(window);
        info!(
            "{name}: loaded {} sub-window(s) of {window}, {} samples delivered",
            report.requested.len(),
            report.delivered
        );
        Ok(report)
    }

    /// Rebind every handle of instance `name` to its storage with fresh
    /// generations, carrying display attributes across.
    pub fn rebuild(&mut self, name: &str) -> CubbyResult<RestoreReport> {
        let Self {
            instances,
            generations,
            ..
        } = self;
        let instance = instances
            .get_mut(name)
            .context(UnknownInstanceSnafu { name })?;
        instance.rebuild(generations)
    }

    /// Drop every sample of instance `name` outside `window`.
    pub fn retain_window(&mut self, name: &str, window: &TimeWindow) -> CubbyResult<RestoreReport> {
        let Self {
            instances,
            generations,
            ..
        } = self;
        let instance = instances
            .get_mut(name)
            .context(UnknownInstanceSnafu { name })?;
        instance.retain_window(window, generations)
    }
}

fn handle_in<'a>(
    instances: &'a BTreeMap<String, OwningInstance>,
    name: &str,
    variable: &str,
) -> CubbyResult<&'a VariableHandle> {
    instances
        .get(name)
        .context(UnknownInstanceSnafu { name })?
        .handle(variable)
        .context(UnknownVariableSnafu {
            instance: name,
            variable,
        })
}

fn entry<'a>(
    instances: &'a mut BTreeMap<String, OwningInstance>,
    name: &str,
) -> &'a mut OwningInstance {
    instances.entry(name.to_string()).or_insert_with(|| {
        debug!("registering owning instance {name}");
        OwningInstance::new(name)
    })
}
