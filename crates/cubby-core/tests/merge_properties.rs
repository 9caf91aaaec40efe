#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use arrow::array::{Array, Float64Array};
use cubby_core::{
    config::StoreConfig, field::FieldKind, producer::LoadedBatch, store::Store,
    window::WindowTracker,
};
use proptest::prelude::*;

type Samples = Vec<(i64, i32)>;

fn new_store() -> Store {
    Store::with_tracker(StoreConfig::default(), Rc::new(WindowTracker::new()))
}

fn batch(samples: &[(i64, i32)]) -> LoadedBatch {
    LoadedBatch::new(samples.iter().map(|s| s.0).collect())
        .with_f64("v", samples.iter().map(|s| f64::from(s.1)).collect())
}

fn contents(store: &Store) -> (Vec<i64>, Vec<f64>) {
    let handle = store.lookup("x", "v").unwrap();
    let values = handle
        .values()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    (handle.time().instants().to_vec(), values.values().to_vec())
}

/// Latest delivery wins, both across and within batches.
fn model(batches: &[&Samples]) -> (Vec<i64>, Vec<f64>) {
    let mut merged = BTreeMap::new();
    for batch in batches {
        for &(t, v) in batch.iter() {
            merged.insert(t, f64::from(v));
        }
    }
    merged.into_iter().unzip()
}

fn samples() -> impl Strategy<Value = Samples> {
    prop::collection::vec((0i64..40, -100i32..100), 1..12)
}

proptest! {
    #[test]
    fn merging_same_batch_twice_is_idempotent(a in samples()) {
        let mut store = new_store();
        store.ingest("x", batch(&a), None).unwrap();
        let once = contents(&store);
        store.ingest("x", batch(&a), None).unwrap();
        prop_assert_eq!(contents(&store), once);
    }

    #[test]
    fn merge_order_only_decides_collisions(a in samples(), b in samples(), c in samples()) {
        let orders: [[&Samples; 3]; 3] = [[&a, &b, &c], [&c, &a, &b], [&b, &c, &a]];
        let mut axes = Vec::new();

        for order in orders {
            let mut store = new_store();
            for batch_samples in order {
                store.ingest("x", batch(batch_samples), None).unwrap();
            }
            let (time, values) = contents(&store);
            let (expected_time, expected_values) = model(&order);
            prop_assert_eq!(&time, &expected_time);
            prop_assert_eq!(values, expected_values);
            axes.push(time);
        }

        prop_assert_eq!(&axes[0], &axes[1]);
        prop_assert_eq!(&axes[1], &axes[2]);
    }

    #[test]
    fn static_field_is_stable_across_merges(
        batches in prop::collection::vec(samples(), 1..6),
        bins in prop::collection::vec(-10.0f64..10.0, 1..5),
    ) {
        let mut store = new_store();
        store
            .ingest(
                "x",
                LoadedBatch::new(vec![]).with_kind(
                    "energy",
                    Arc::new(Float64Array::from(bins.clone())),
                    FieldKind::Static,
                ),
                None,
            )
            .unwrap();

        for samples in &batches {
            store.ingest("x", batch(samples), None).unwrap();
            let energy = store.lookup("x", "energy").unwrap();
            prop_assert_eq!(energy.kind(), FieldKind::Static);
            let values = energy.values().as_any().downcast_ref::<Float64Array>().unwrap();
            prop_assert_eq!(values.values().to_vec(), bins.clone());
        }

        let time_len = store.instance("x").unwrap().time().len();
        prop_assert_eq!(store.lookup("x", "v").unwrap().values().len(), time_len);
    }
}
