//! Derived-variable registry on the store.

use std::collections::BTreeSet;
use std::rc::Rc;

use log::{info, warn};
use snafu::OptionExt;

use crate::derived::{DerivedOp, DerivedVariable};
use crate::error::{CubbyResult, UnknownDerivedSnafu};
use crate::handle::{ClippedView, VariableHandle};
use crate::plot_config::PlotConfig;
use crate::producer::Producer;
use crate::store::{Store, VariableKey, handle_in};
use crate::time::TimeWindow;

impl Store {
    /// Create (or replace) the derived variable `name` as `op` over `sources`.
    ///
    /// Sources are clipped to the tracker's current window, or used whole
    /// when no window is set.
    pub fn derive(
        &mut self,
        name: &str,
        op: DerivedOp,
        sources: Vec<VariableKey>,
    ) -> CubbyResult<&VariableHandle> {
        let window = self.tracker.get_window();
        let operands = sources
            .iter()
            .map(|key| Ok((key, handle_in(&self.instances, &key.instance, &key.variable)?)))
            .collect::<CubbyResult<Vec<_>>>()?;
        let generation = self.generations.next_generation();
        let derived = DerivedVariable::evaluate(name, op, &operands, window, generation)?;

        info!(
            "derived {name} = {op}({}) over {} samples",
            sources
                .iter()
                .map(VariableKey::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            derived.handle().len()
        );

        self.derived.insert(name.to_string(), derived);
        let derived = self
            .derived
            .get(name)
            .context(UnknownDerivedSnafu { name })?;
        Ok(derived.handle())
    }

    /// The derived variable `name`, if any.
    pub fn derived(&self, name: &str) -> Option<&DerivedVariable> {
        self.derived.get(name)
    }

    /// Names of every derived variable, in order.
    pub fn derived_names(&self) -> impl Iterator<Item = &str> {
        self.derived.keys().map(String::as_str)
    }

    /// Mutable display attributes of the derived variable `name`.
    pub fn derived_config_mut(&mut self, name: &str) -> CubbyResult<&mut PlotConfig> {
        self.derived
            .get_mut(name)
            .map(DerivedVariable::config_mut)
            .context(UnknownDerivedSnafu { name })
    }

    /// Re-evaluate `name` if a source was replaced or the tracker's window
    /// changed since the last evaluation.
    ///
    /// Returns `true` when the result was recomputed. The derived variable's
    /// own display attributes are kept.
    pub fn refresh_derived(&mut self, name: &str) -> CubbyResult<bool> {
        let window = self.tracker.get_window();
        let derived = self
            .derived
            .get(name)
            .context(UnknownDerivedSnafu { name })?;
        if derived.window() == window && !derived.is_stale(self) {
            return Ok(false);
        }

        let generation = self.generations.next_generation();
        let derived = self
            .derived
            .get_mut(name)
            .context(UnknownDerivedSnafu { name })?;
        let operands = derived
            .sources()
            .iter()
            .map(|key| handle_in(&self.instances, &key.instance, &key.variable))
            .collect::<CubbyResult<Vec<_>>>()?;

        let report = derived.reevaluate(&operands, window, generation)?;
        for lost in &report.lost {
            warn!(
                "configuration lost: {}.{} could not be restored after re-evaluation",
                lost.variable,
                lost.attribute.as_deref().unwrap_or("*")
            );
        }
        info!("re-evaluated derived {name}");
        Ok(true)
    }

    /// Serve the derived variable `name` over `window` as one top-level
    /// request.
    ///
    /// Each source instance is loaded through `producer` inside a nested
    /// request; the outer request then re-asserts its own window before the
    /// result is recomputed and clipped. The tracker is cleared again when
    /// this returns.
    pub fn load_derived<P: Producer>(
        &mut self,
        name: &str,
        window: &TimeWindow,
        producer: &mut P,
    ) -> CubbyResult<ClippedView> {
        let tracker = Rc::clone(&self.tracker);
        let mut request = tracker.begin_request();
        request.set_window(*window);

        let instances: BTreeSet<String> = self
            .derived
            .get(name)
            .context(UnknownDerivedSnafu { name })?
            .sources()
            .iter()
            .map(|key| key.instance.clone())
            .collect();

        for instance in &instances {
            let mut nested = tracker.begin_nested();
            nested.set_window(*window);
            self.load_with(instance, window, producer)?;
        }

        request.reassert();
        self.refresh_derived(name)?;

        let derived = self
            .derived
            .get(name)
            .context(UnknownDerivedSnafu { name })?;
        Ok(derived.handle().clipped(&tracker))
    }
}
