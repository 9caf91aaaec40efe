//! Store-wide tuning knobs.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::bucket::TimeBucket;

/// Default row count below which a field whose length differs from the time
/// axis is treated as static.
pub const DEFAULT_STATIC_THRESHOLD: usize = 1000;

/// Configuration of a [`crate::store::Store`].
///
/// Deserialises from partial documents; missing keys take their defaults:
///
/// ```
/// use cubby_core::config::StoreConfig;
/// use cubby_core::bucket::TimeBucket;
///
/// let config: StoreConfig = serde_json::from_str(r#"{"gap_bucket":{"Seconds":30}}"#).unwrap();
/// assert_eq!(config.gap_bucket, TimeBucket::Seconds(30));
/// assert_eq!(config.static_threshold, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Largest row count a field may have and still be classified static by
    /// the length heuristic.
    pub static_threshold: usize,
    /// Bucket width used by sample gap analysis.
    pub gap_bucket: TimeBucket,
    /// Split windows handed to a producer into pieces of at most this many
    /// nanoseconds. `None` requests each missing span in one call; a zero
    /// split is rejected when deserialising.
    pub max_missing_window: Option<NonZeroU64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            static_threshold: DEFAULT_STATIC_THRESHOLD,
            gap_bucket: TimeBucket::default(),
            max_missing_window: None,
        }
    }
}

impl StoreConfig {
    /// Builder-style setter for [`StoreConfig::static_threshold`].
    pub fn with_static_threshold(mut self, threshold: usize) -> Self {
        self.static_threshold = threshold;
        self
    }

    /// Builder-style setter for [`StoreConfig::gap_bucket`].
    pub fn with_gap_bucket(mut self, bucket: TimeBucket) -> Self {
        self.gap_bucket = bucket;
        self
    }

    /// Builder-style setter for [`StoreConfig::max_missing_window`].
    ///
    /// Zero means no split.
    pub fn with_max_missing_window(mut self, nanos: u64) -> Self {
        self.max_missing_window = NonZeroU64::new(nanos);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.static_threshold, DEFAULT_STATIC_THRESHOLD);
        assert_eq!(config.gap_bucket, TimeBucket::Minutes(1));
        assert_eq!(config.max_missing_window, None);
    }

    #[test]
    fn empty_document_is_default() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn zero_split_is_never_stored() {
        let config = StoreConfig::default().with_max_missing_window(0);
        assert_eq!(config.max_missing_window, None);

        let err = serde_json::from_str::<StoreConfig>(r#"{"max_missing_window":0}"#);
        assert!(err.is_err());

        let config: StoreConfig = serde_json::from_str(r#"{"max_missing_window":60}"#).unwrap();
        assert_eq!(config.max_missing_window, NonZeroU64::new(60));
    }

    #[test]
    fn serialises_round_trip() {
        let config = StoreConfig::default()
            .with_static_threshold(16)
            .with_gap_bucket(TimeBucket::Hours(1))
            .with_max_missing_window(3_600_000_000_000);
        let json = serde_json::to_string(&config).unwrap();
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
