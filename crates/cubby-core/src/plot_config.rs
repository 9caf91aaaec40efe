//! Display attributes attached to a variable.
//!
//! [`PlotConfig`] is the only part of a variable handle that user code
//! mutates in place. It is a plain struct composed next to the payload, and
//! serde-serialisable so the preservation pass can snapshot it into an
//! attribute map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Axis scaling used when rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisScale {
    /// Linear axis.
    #[default]
    Linear,
    /// Base-10 logarithmic axis.
    Log,
}

/// How the consumer should draw the variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotKind {
    /// Connected line.
    #[default]
    Line,
    /// Unconnected points.
    Scatter,
    /// Colour-coded rank-2 data.
    Spectrogram,
}

/// Marker drawn at each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    /// Filled circle.
    Circle,
    /// Filled square.
    Square,
    /// Plus sign.
    Plus,
    /// Cross.
    Cross,
}

/// Mutable display attributes of one variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Legend / axis label.
    pub label: Option<String>,
    /// Line or marker colour, e.g. `"#1f77b4"` or `"red"`.
    pub color: Option<String>,
    /// Y axis scaling.
    pub scale: AxisScale,
    /// Drawing style.
    pub plot_kind: PlotKind,
    /// Per-sample marker.
    pub marker: Option<MarkerStyle>,
    /// Line width in points.
    pub line_width: Option<f64>,
    /// Fixed y range; `None` lets the consumer autoscale.
    pub y_range: Option<(f64, f64)>,
    /// Physical units shown next to the label.
    pub units: Option<String>,
    /// Consumer-specific attributes this crate does not interpret.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PlotConfig {
    /// Builder-style label setter.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder-style colour setter.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Whether every attribute still has its default value.
    pub fn is_default(&self) -> bool {
        *self == PlotConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_with_snake_case_enums() {
        let config = PlotConfig {
            scale: AxisScale::Log,
            plot_kind: PlotKind::Spectrogram,
            ..PlotConfig::default()
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["scale"], "log");
        assert_eq!(value["plot_kind"], "spectrogram");
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: PlotConfig = serde_json::from_str(r#"{"color":"red"}"#).unwrap();
        assert_eq!(config.color.as_deref(), Some("red"));
        assert_eq!(config.scale, AxisScale::Linear);
        assert!(!config.is_default());
        assert!(PlotConfig::default().is_default());
    }
}
