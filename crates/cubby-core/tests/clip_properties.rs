#![allow(missing_docs)]

use std::rc::Rc;

use arrow::array::{Array, Float64Array};
use cubby_core::{
    config::StoreConfig, handle::ClippedView, producer::LoadedBatch, store::Store,
    time::TimeWindow, window::WindowTracker,
};
use proptest::prelude::*;

fn f64s(view: &ClippedView) -> Vec<f64> {
    view.values
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap()
        .values()
        .to_vec()
}

fn window() -> impl Strategy<Value = TimeWindow> {
    (-10i64..60, 1i64..30, any::<bool>()).prop_map(|(start, len, closed)| {
        if closed {
            TimeWindow::closed(start, start + len - 1).unwrap()
        } else {
            TimeWindow::half_open(start, start + len).unwrap()
        }
    })
}

fn samples() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(0i64..50, 1..20).prop_map(|set| set.into_iter().collect())
}

proptest! {
    #[test]
    fn clip_matches_filtering_by_window(instants in samples(), w in window()) {
        let tracker = Rc::new(WindowTracker::new());
        let mut store = Store::with_tracker(StoreConfig::default(), Rc::clone(&tracker));
        let values: Vec<f64> = instants.iter().map(|&t| t as f64 * 0.5).collect();
        store
            .ingest("x", LoadedBatch::new(instants.clone()).with_f64("v", values), None)
            .unwrap();
        let handle = store.lookup("x", "v").unwrap();

        let (expected_time, expected_values): (Vec<i64>, Vec<f64>) = instants
            .iter()
            .filter(|&&t| w.contains(t))
            .map(|&t| (t, t as f64 * 0.5))
            .unzip();

        let view = handle.clip_to(Some(&w));
        prop_assert_eq!(view.time.instants(), expected_time.as_slice());
        prop_assert_eq!(f64s(&view), expected_values.clone());

        tracker.set_window(w);
        let cached = handle.clipped(&tracker);
        prop_assert_eq!(cached.time.instants(), expected_time.as_slice());
        prop_assert_eq!(f64s(&cached), expected_values);
    }

    #[test]
    fn half_open_and_closed_forms_select_the_same_rows(
        instants in samples(),
        start in -10i64..60,
        len in 1i64..30,
    ) {
        let mut store = Store::with_tracker(StoreConfig::default(), Rc::new(WindowTracker::new()));
        let values: Vec<f64> = instants.iter().map(|&t| t as f64).collect();
        store
            .ingest("x", LoadedBatch::new(instants).with_f64("v", values), None)
            .unwrap();
        let handle = store.lookup("x", "v").unwrap();

        let half_open = TimeWindow::half_open(start, start + len).unwrap();
        let closed = TimeWindow::closed(start, start + len - 1).unwrap();
        prop_assert_eq!(half_open, closed);
        let clipped_half_open = handle.clip_to(Some(&half_open));
        let clipped_closed = handle.clip_to(Some(&closed));
        prop_assert_eq!(
            clipped_half_open.time.instants(),
            clipped_closed.time.instants()
        );
    }
}
