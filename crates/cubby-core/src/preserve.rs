//! Metadata preservation across storage reallocation.
//!
//! Merging or rebuilding an owning instance produces brand-new handles bound
//! to new storage. The display attributes users set on the old handles would
//! be lost with them, so every reallocation runs through
//! [`with_preserved_configs`]:
//!
//! 1. snapshot each handle's [`PlotConfig`] into a plain attribute map;
//! 2. run the reallocation;
//! 3. reapply each snapshot to the handle of the same name.
//!
//! An attribute that cannot be reapplied (unknown name, wrong type) or a
//! snapshot whose variable vanished is a configuration loss: logged as a
//! warning, listed in the [`RestoreReport`], and the default is kept.

use std::collections::BTreeMap;

use log::warn;
use serde_json::{Map, Value};

use crate::error::CubbyResult;
use crate::handle::VariableHandle;
use crate::plot_config::PlotConfig;

/// A [`PlotConfig`] flattened into `attribute -> value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    attributes: BTreeMap<String, Value>,
}

/// One attribute that could not be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostAttribute {
    /// Variable the attribute belonged to.
    pub variable: String,
    /// Attribute name; `None` when the whole variable disappeared.
    pub attribute: Option<String>,
}

/// Outcome of a restore pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Handles whose configuration was reapplied.
    pub restored: usize,
    /// Attributes that fell back to defaults.
    pub lost: Vec<LostAttribute>,
}

impl RestoreReport {
    /// Whether nothing was lost.
    pub fn is_clean(&self) -> bool {
        self.lost.is_empty()
    }

    pub(crate) fn absorb(&mut self, other: RestoreReport) {
        self.restored += other.restored;
        self.lost.extend(other.lost);
    }
}

impl ConfigSnapshot {
    /// Snapshot every attribute of `config`.
    pub fn capture(config: &PlotConfig) -> Self {
        let attributes = match serde_json::to_value(config) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            // PlotConfig always serialises to an object.
            _ => BTreeMap::new(),
        };
        Self { attributes }
    }

    /// Rebuild a [`PlotConfig`], returning the names of attributes that could
    /// not be applied.
    pub fn restore(&self) -> (PlotConfig, Vec<String>) {
        let mut accepted: Map<String, Value> = match serde_json::to_value(PlotConfig::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let mut lost = Vec::new();

        for (name, value) in &self.attributes {
            if !accepted.contains_key(name) {
                lost.push(name.clone());
                continue;
            }
            let previous = accepted.insert(name.clone(), value.clone());
            if serde_json::from_value::<PlotConfig>(Value::Object(accepted.clone())).is_err() {
                if let Some(previous) = previous {
                    accepted.insert(name.clone(), previous);
                }
                lost.push(name.clone());
            }
        }

        let config = serde_json::from_value(Value::Object(accepted)).unwrap_or_default();
        (config, lost)
    }
}

/// Snapshot every handle's configuration, keyed by variable name.
pub fn snapshot_all(
    handles: &BTreeMap<String, VariableHandle>,
) -> BTreeMap<String, ConfigSnapshot> {
    handles
        .iter()
        .map(|(name, handle)| (name.clone(), ConfigSnapshot::capture(handle.config())))
        .collect()
}

/// Reapply snapshots onto freshly built handles.
pub fn restore_all(
    handles: &mut BTreeMap<String, VariableHandle>,
    snapshots: BTreeMap<String, ConfigSnapshot>,
) -> RestoreReport {
    let mut report = RestoreReport::default();

    for (variable, snapshot) in snapshots {
        let Some(handle) = handles.get_mut(&variable) else {
            warn!("configuration lost: variable {variable} has no handle after reallocation");
            report.lost.push(LostAttribute {
                variable,
                attribute: None,
            });
            continue;
        };

        let (config, lost) = snapshot.restore();
        handle.set_config(config);
        report.restored += 1;

        for attribute in lost {
            warn!("configuration lost: {variable}.{attribute} could not be restored, using default");
            report.lost.push(LostAttribute {
                variable: variable.clone(),
                attribute: Some(attribute),
            });
        }
    }

    report
}

/// Run a storage-reallocating operation, carrying display attributes across.
///
/// `realloc` receives the current handles and returns their replacements; the
/// replacements are installed only if it succeeds, so a failed merge leaves
/// the instance untouched.
pub fn with_preserved_configs<F>(
    handles: &mut BTreeMap<String, VariableHandle>,
    realloc: F,
) -> CubbyResult<RestoreReport>
where
    F: FnOnce(&BTreeMap<String, VariableHandle>) -> CubbyResult<BTreeMap<String, VariableHandle>>,
{
    let snapshots = snapshot_all(handles);
    let mut rebuilt = realloc(handles)?;
    let report = restore_all(&mut rebuilt, snapshots);
    *handles = rebuilt;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;
    use crate::plot_config::{AxisScale, MarkerStyle};
    use crate::time_axis::TimeAxis;
    use arrow::array::Float64Array;
    use std::sync::Arc;

    fn handle(name: &str, generation: u64) -> VariableHandle {
        VariableHandle::new(
            name,
            Arc::new(Float64Array::from(vec![1.0])),
            FieldKind::TimeVarying,
            TimeAxis::new(vec![0]).unwrap(),
            PlotConfig::default(),
            generation,
        )
    }

    #[test]
    fn snapshot_round_trips_every_attribute() {
        let mut config = PlotConfig::default().with_color("red").with_label("Bx");
        config.scale = AxisScale::Log;
        config.marker = Some(MarkerStyle::Cross);
        config.y_range = Some((-5.0, 5.0));
        config.extra.insert("panel".into(), Value::from(2));

        let (restored, lost) = ConfigSnapshot::capture(&config).restore();
        assert!(lost.is_empty());
        assert_eq!(restored, config);
    }

    #[test]
    fn unknown_and_ill_typed_attributes_are_lost() {
        let mut attrs = BTreeMap::new();
        attrs.insert("color".to_string(), Value::from("blue"));
        attrs.insert("glow".to_string(), Value::from(true));
        attrs.insert("line_width".to_string(), Value::from("thick"));

        let (config, mut lost) = ConfigSnapshot { attributes: attrs }.restore();
        lost.sort();
        assert_eq!(lost, vec!["glow".to_string(), "line_width".to_string()]);
        assert_eq!(config.color.as_deref(), Some("blue"));
        assert_eq!(config.line_width, None);
    }

    #[test]
    fn preserved_across_reallocation() {
        let mut handles = BTreeMap::new();
        let mut old = handle("v", 1);
        old.config_mut().color = Some("green".into());
        handles.insert("v".to_string(), old);

        let report = with_preserved_configs(&mut handles, |current| {
            Ok(current
                .keys()
                .map(|name| (name.clone(), handle(name, 2)))
                .collect())
        })
        .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.restored, 1);
        assert_eq!(handles["v"].generation(), 2);
        assert_eq!(handles["v"].config().color.as_deref(), Some("green"));
    }

    #[test]
    fn vanished_variable_is_reported() {
        let mut handles = BTreeMap::new();
        handles.insert("gone".to_string(), handle("gone", 1));
        let report = with_preserved_configs(&mut handles, |_| Ok(BTreeMap::new())).unwrap();
        assert_eq!(
            report.lost,
            vec![LostAttribute {
                variable: "gone".into(),
                attribute: None
            }]
        );
    }
}
