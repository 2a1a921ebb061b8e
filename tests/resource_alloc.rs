use stats_alloc::{Region, StatsAlloc, INSTRUMENTED_SYSTEM};
use std::alloc::System;
use std::sync::Mutex;

use drunkard::{WalkRecord, WalkStore};

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

// Regions count every thread's allocations; tests in this file must not overlap.
static SERIAL: Mutex<()> = Mutex::new(());

fn store_with_walks(sources: u32, walks: u32) -> WalkStore {
    let mut store = WalkStore::new();
    for v in 0..sources {
        store.add_walk_batch(v * 10, walks).unwrap();
    }
    store.initialize_walks().unwrap();
    store
}

#[test]
fn absent_vertices_cost_no_allocations() {
    let _serial = SERIAL.lock().unwrap();
    let mut store = store_with_walks(4, 16);
    let mut snap = store.grab_snapshot(0, 100);

    let region = Region::new(&GLOBAL);
    for v in (1..100).filter(|v| v % 10 != 0) {
        assert!(snap.take(v).is_none());
        assert!(snap.peek(v).is_none());
        assert!(snap.walks_at(v, false).is_none());
        assert!(snap.walks_at(v, true).is_none());
        assert_eq!(snap.clear(v), 0);
    }
    let stats = region.change();
    assert_eq!(stats.allocations, 0, "lookups of empty vertices allocated: {stats:?}");

    snap.restore_ungrabbed(&mut store);
    assert_eq!(store.resident_walks(), 64);
}

#[test]
fn moving_walks_allocates_per_bucket_not_per_walk() {
    let _serial = SERIAL.lock().unwrap();
    let walks = 20_000u32;
    let mut store = store_with_walks(1, walks);
    let mut snap = store.grab_snapshot(0, 0);
    let bucket = snap.take(0).unwrap();

    // Spread every walk over a handful of destinations, as one vertex expansion would.
    let region = Region::new(&GLOBAL);
    for (i, w) in bucket.iter().enumerate() {
        store.update_walk(w.source, 1 + (i % 4) as u32, !w.parity);
    }
    let stats = region.change();
    snap.restore_ungrabbed(&mut store);

    assert_eq!(store.resident_walks(), u64::from(walks));
    assert_eq!(store.occupied_vertices(), 4);
    assert_eq!(store.bucket(3).and_then(|b| b.get(0)), Some(WalkRecord::new(0, true)));

    // Amortized growth: a few dozen reallocations per bucket at most.
    let per_walk = stats.allocations + stats.reallocations;
    assert!(
        per_walk * 50 < walks as usize,
        "expected allocation count far below walk count (allocs={}, reallocs={}, walks={walks})",
        stats.allocations,
        stats.reallocations
    );
}
