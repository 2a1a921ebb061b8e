//! Walk state, keyed by the vertex each walk currently sits on.
//!
//! The store is driven by a windowed traversal:
//!
//! 1. [`WalkStore::grab_snapshot`] moves the buckets of one vertex window into a
//!    [`WindowSnapshot`] owned by the caller.
//! 2. For each visited vertex the caller takes its walks from the snapshot and writes each
//!    advanced walk back with [`WalkStore::update_walk`].
//! 3. [`WindowSnapshot::restore_ungrabbed`] puts back every bucket the traversal did not visit.
//!
//! Invariant: a walk is in exactly one store bucket or exactly one snapshot bucket, except
//! while the caller holds it between a take and the matching `update_walk`.

use std::collections::BTreeMap;

use tracing::debug;

use crate::scheduler::Scheduler;
use crate::sources::SourceRegistry;
use crate::{Error, Result, SourceIndex, VertexId};

/// One walk: the source it belongs to and its step parity.
///
/// The parity flips on every transition, so after `i` transitions it equals `i % 2 == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WalkRecord {
    pub source: SourceIndex,
    pub parity: bool,
}

impl WalkRecord {
    pub fn new(source: SourceIndex, parity: bool) -> Self {
        Self { source, parity }
    }
}

/// Walks resident at one vertex, stored as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    sources: Vec<SourceIndex>,
    parities: Vec<bool>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, walk: WalkRecord) {
        self.sources.push(walk.source);
        self.parities.push(walk.parity);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<WalkRecord> {
        Some(WalkRecord::new(*self.sources.get(i)?, self.parities[i]))
    }

    pub fn sources(&self) -> &[SourceIndex] {
        &self.sources
    }

    pub fn iter(&self) -> impl Iterator<Item = WalkRecord> + '_ {
        self.sources
            .iter()
            .zip(self.parities.iter())
            .map(|(&source, &parity)| WalkRecord { source, parity })
    }

    /// Moves every walk of `other` into `self`.
    pub fn append(&mut self, other: &mut Bucket) {
        self.sources.append(&mut other.sources);
        self.parities.append(&mut other.parities);
    }
}

impl FromIterator<WalkRecord> for Bucket {
    fn from_iter<I: IntoIterator<Item = WalkRecord>>(iter: I) -> Self {
        let mut b = Bucket::new();
        for w in iter {
            b.push(w);
        }
        b
    }
}

#[derive(Debug, Default)]
pub struct WalkStore {
    sources: SourceRegistry,
    buckets: BTreeMap<VertexId, Bucket>,
    total_walks: u64,
    initialized: bool,
    open_window: Option<(VertexId, VertexId)>,
}

impl WalkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `count` walks starting at `source_vertex` under a new source index.
    pub fn add_walk_batch(&mut self, source_vertex: VertexId, count: u32) -> Result<SourceIndex> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }
        let idx = self.sources.register(source_vertex, count)?;
        self.total_walks += u64::from(count);
        Ok(idx)
    }

    /// Seal registration and place every walk on its own source vertex.
    pub fn initialize_walks(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }
        for (idx, vertex, count) in self.sources.iter() {
            let bucket = self.buckets.entry(vertex).or_default();
            bucket.sources.reserve(count as usize);
            bucket.parities.reserve(count as usize);
            for _ in 0..count {
                bucket.push(WalkRecord::new(idx, false));
            }
        }
        self.initialized = true;
        debug!(
            sources = self.sources.len(),
            walks = self.total_walks,
            "initialized walks"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Move the buckets of vertices `first..=last` into a snapshot.
    ///
    /// Cost is proportional to the number of occupied vertices in the window.
    ///
    /// # Panics
    ///
    /// If walks are not initialized, if `first > last`, or if the previous window's snapshot
    /// has not been restored yet.
    pub fn grab_snapshot(&mut self, first: VertexId, last: VertexId) -> WindowSnapshot {
        assert!(self.initialized, "grab_snapshot before initialize_walks");
        assert!(first <= last, "empty window {first}..={last}");
        if let Some((f, l)) = self.open_window {
            panic!("window {f}..={l} is still grabbed; restore it before grabbing {first}..={last}");
        }

        let occupied: Vec<VertexId> = self.buckets.range(first..=last).map(|(&v, _)| v).collect();
        let mut slots = BTreeMap::new();
        for v in occupied {
            if let Some(bucket) = self.buckets.remove(&v) {
                slots.insert(
                    v,
                    Slot {
                        bucket,
                        grabbed: false,
                    },
                );
            }
        }
        self.open_window = Some((first, last));
        WindowSnapshot { first, last, slots }
    }

    /// Place one walk on `destination` with the given parity.
    pub fn update_walk(&mut self, source: SourceIndex, destination: VertexId, parity: bool) {
        debug_assert!(
            (source as usize) < self.sources.len(),
            "unknown source index {source}"
        );
        self.buckets
            .entry(destination)
            .or_default()
            .push(WalkRecord::new(source, parity));
    }

    pub fn is_source(&self, vertex: VertexId) -> bool {
        self.sources.is_source(vertex)
    }

    pub fn source_index_of(&self, vertex: VertexId) -> Option<SourceIndex> {
        self.sources.index_of(vertex)
    }

    /// # Panics
    ///
    /// If `idx` is not a registered source index.
    pub fn source_vertex_of(&self, idx: SourceIndex) -> VertexId {
        self.sources.vertex_of(idx)
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Mark every source vertex on the work list.
    pub fn schedule_sources<S: Scheduler + ?Sized>(&self, scheduler: &mut S) {
        for &v in self.sources.vertices() {
            scheduler.add_task(v);
        }
    }

    /// Mark every vertex in `first..=last` that currently holds walks.
    pub fn schedule_for_window<S: Scheduler + ?Sized>(
        &self,
        scheduler: &mut S,
        first: VertexId,
        last: VertexId,
    ) {
        for (&v, bucket) in self.buckets.range(first..=last) {
            if !bucket.is_empty() {
                scheduler.add_task(v);
            }
        }
    }

    /// Walks ever created.
    pub fn total_walks(&self) -> u64 {
        self.total_walks
    }

    /// Walks currently in store buckets (not in a snapshot).
    pub fn resident_walks(&self) -> u64 {
        self.buckets.values().map(|b| b.len() as u64).sum()
    }

    pub fn occupied_vertices(&self) -> usize {
        self.buckets.len()
    }

    /// Read-only view of the bucket at `vertex`.
    pub fn bucket(&self, vertex: VertexId) -> Option<&Bucket> {
        self.buckets.get(&vertex)
    }

    pub fn has_open_window(&self) -> bool {
        self.open_window.is_some()
    }
}

#[derive(Debug)]
struct Slot {
    bucket: Bucket,
    grabbed: bool,
}

/// Exclusive view over the buckets of one vertex window.
///
/// Must be handed back with [`WindowSnapshot::restore_ungrabbed`]; the store refuses to grab
/// another window until then.
#[derive(Debug)]
pub struct WindowSnapshot {
    first: VertexId,
    last: VertexId,
    slots: BTreeMap<VertexId, Slot>,
}

impl WindowSnapshot {
    pub fn first(&self) -> VertexId {
        self.first
    }

    pub fn last(&self) -> VertexId {
        self.last
    }

    /// Walks at `vertex`.
    ///
    /// With `remove` the bucket leaves the snapshot and is returned by value. Without it the
    /// bucket is copied and stays until [`WindowSnapshot::clear`] or restore, but is marked read
    /// so restore will not reinsert it.
    pub fn walks_at(&mut self, vertex: VertexId, remove: bool) -> Option<Bucket> {
        if remove {
            self.take(vertex)
        } else {
            self.peek(vertex).cloned()
        }
    }

    /// Remove and return the bucket at `vertex`. `None` without allocating if there is none.
    pub fn take(&mut self, vertex: VertexId) -> Option<Bucket> {
        self.slots.remove(&vertex).map(|slot| slot.bucket)
    }

    /// Borrow the bucket at `vertex` and mark it read.
    pub fn peek(&mut self, vertex: VertexId) -> Option<&Bucket> {
        let slot = self.slots.get_mut(&vertex)?;
        slot.grabbed = true;
        Some(&slot.bucket)
    }

    /// Release the bucket at `vertex` early. Returns how many walks it held.
    pub fn clear(&mut self, vertex: VertexId) -> usize {
        self.slots
            .remove(&vertex)
            .map_or(0, |slot| slot.bucket.len())
    }

    /// Walks still held by the snapshot, read or not.
    pub fn resident_walks(&self) -> u64 {
        self.slots.values().map(|s| s.bucket.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Treat every unread walk with `parity == due` as having stayed on its vertex for this
    /// iteration, flipping its parity. Walks already moved this iteration are left alone.
    ///
    /// Call before [`WindowSnapshot::restore_ungrabbed`] when the engine skipped vertices, so
    /// the skipped walks are due again next iteration. Returns the number of walks flipped.
    pub fn stay_unvisited(&mut self, due: bool) -> u64 {
        let mut flipped = 0u64;
        for slot in self.slots.values_mut().filter(|s| !s.grabbed) {
            for p in slot.bucket.parities.iter_mut().filter(|p| **p == due) {
                *p = !due;
                flipped += 1;
            }
        }
        flipped
    }

    /// Give every never-read bucket back to `store` and close the window.
    ///
    /// Restored walks are appended after any walks that arrived on the same vertex while the
    /// window was open. Returns the number of walks restored.
    ///
    /// # Panics
    ///
    /// If `store` did not hand out this window.
    pub fn restore_ungrabbed(self, store: &mut WalkStore) -> u64 {
        assert_eq!(
            store.open_window,
            Some((self.first, self.last)),
            "snapshot {}..={} does not belong to this store's open window",
            self.first,
            self.last
        );
        let mut restored = 0u64;
        for (v, mut slot) in self.slots {
            if slot.grabbed {
                continue;
            }
            restored += slot.bucket.len() as u64;
            store.buckets.entry(v).or_default().append(&mut slot.bucket);
        }
        store.open_window = None;
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::VertexScheduler;

    fn store_with(sources: &[(VertexId, u32)]) -> WalkStore {
        let mut s = WalkStore::new();
        for &(v, c) in sources {
            s.add_walk_batch(v, c).unwrap();
        }
        s.initialize_walks().unwrap();
        s
    }

    #[test]
    fn initialize_places_walks_at_sources() {
        let s = store_with(&[(3, 2), (8, 1)]);
        assert_eq!(s.total_walks(), 3);
        assert_eq!(s.resident_walks(), 3);
        let b = s.bucket(3).unwrap();
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![WalkRecord::new(0, false); 2]);
        assert_eq!(s.bucket(8).unwrap().sources(), &[1]);
    }

    #[test]
    fn registration_after_seal_fails() {
        let mut s = store_with(&[(1, 1)]);
        assert!(matches!(s.add_walk_batch(2, 1), Err(Error::AlreadyInitialized)));
        assert!(matches!(s.initialize_walks(), Err(Error::AlreadyInitialized)));
        assert_eq!(s.total_walks(), 1);
    }

    #[test]
    fn duplicate_source_leaves_total_unchanged() {
        let mut s = WalkStore::new();
        s.add_walk_batch(4, 10).unwrap();
        assert!(matches!(s.add_walk_batch(4, 3), Err(Error::DuplicateSource(4))));
        assert_eq!(s.total_walks(), 10);
    }

    #[test]
    fn grab_then_restore_is_identity() {
        let mut s = store_with(&[(1, 2), (5, 3), (9, 1)]);
        s.update_walk(0, 5, true);
        let before: Vec<Bucket> = [1, 5, 9].iter().map(|v| s.bucket(*v).unwrap().clone()).collect();

        let snap = s.grab_snapshot(0, 6);
        assert!(s.bucket(1).is_none());
        assert!(s.bucket(5).is_none());
        assert_eq!(s.bucket(9).unwrap().len(), 1);

        assert_eq!(snap.restore_ungrabbed(&mut s), 6);
        let after: Vec<Bucket> = [1, 5, 9].iter().map(|v| s.bucket(*v).unwrap().clone()).collect();
        assert_eq!(before, after);
        assert!(!s.has_open_window());
    }

    #[test]
    fn taken_buckets_are_not_restored() {
        let mut s = store_with(&[(1, 2), (2, 2)]);
        let mut snap = s.grab_snapshot(1, 2);

        let taken = snap.walks_at(1, true).unwrap();
        assert_eq!(taken.len(), 2);
        assert!(snap.walks_at(1, true).is_none(), "second take must see nothing");

        for w in taken.iter() {
            s.update_walk(w.source, 7, !w.parity);
        }
        assert_eq!(s.resident_walks() + snap.resident_walks(), s.total_walks());

        assert_eq!(snap.restore_ungrabbed(&mut s), 2);
        assert_eq!(s.bucket(7).unwrap().len(), 2);
        assert_eq!(s.bucket(2).unwrap().len(), 2);
        assert!(s.bucket(1).is_none());
    }

    #[test]
    fn peeked_buckets_are_released_not_restored() {
        let mut s = store_with(&[(4, 3)]);
        let mut snap = s.grab_snapshot(4, 4);
        assert_eq!(snap.walks_at(4, false).unwrap().len(), 3);
        // still held until cleared
        assert_eq!(snap.resident_walks(), 3);
        for _ in 0..3 {
            s.update_walk(0, 4, true);
        }
        assert_eq!(snap.clear(4), 3);
        assert_eq!(snap.restore_ungrabbed(&mut s), 0);
        assert_eq!(s.resident_walks(), 3);
    }

    #[test]
    fn restore_appends_after_new_arrivals() {
        let mut s = store_with(&[(1, 1), (2, 1)]);
        let mut snap = s.grab_snapshot(1, 2);
        let b = snap.take(1).unwrap();
        s.update_walk(b.sources()[0], 2, true);
        snap.restore_ungrabbed(&mut s);

        let at2: Vec<WalkRecord> = s.bucket(2).unwrap().iter().collect();
        assert_eq!(at2, vec![WalkRecord::new(0, true), WalkRecord::new(1, false)]);
    }

    #[test]
    fn unvisited_walks_due_now_are_due_next_iteration() {
        let mut s = store_with(&[(1, 2), (2, 1)]);
        // one walk that already moved this iteration
        s.update_walk(0, 2, true);
        let mut snap = s.grab_snapshot(1, 2);
        assert!(snap.peek(1).is_some());

        // vertex 1 was read, so only the unmoved walk at 2 flips
        assert_eq!(snap.stay_unvisited(false), 1);
        assert_eq!(snap.clear(1), 2);
        snap.restore_ungrabbed(&mut s);

        let at2: Vec<WalkRecord> = s.bucket(2).unwrap().iter().collect();
        assert_eq!(at2, vec![WalkRecord::new(1, true), WalkRecord::new(0, true)]);
    }

    #[test]
    fn absent_vertex_yields_none() {
        let mut s = store_with(&[(1, 1)]);
        let mut snap = s.grab_snapshot(0, 10);
        assert!(snap.walks_at(3, true).is_none());
        assert!(snap.walks_at(3, false).is_none());
        assert_eq!(snap.clear(3), 0);
        snap.restore_ungrabbed(&mut s);
    }

    #[test]
    #[should_panic(expected = "still grabbed")]
    fn double_grab_panics() {
        let mut s = store_with(&[(1, 1)]);
        let _a = s.grab_snapshot(0, 1);
        let _b = s.grab_snapshot(2, 3);
    }

    #[test]
    #[should_panic(expected = "before initialize_walks")]
    fn grab_before_initialize_panics() {
        let mut s = WalkStore::new();
        s.add_walk_batch(1, 1).unwrap();
        let _ = s.grab_snapshot(0, 1);
    }

    #[test]
    fn scheduling_marks_occupied_vertices_and_sources() {
        let mut s = store_with(&[(2, 1), (70, 1)]);
        let mut snap = s.grab_snapshot(0, 3);
        let b = snap.take(2).unwrap();
        s.update_walk(b.sources()[0], 40, true);
        snap.restore_ungrabbed(&mut s);

        let mut sched = VertexScheduler::new(100);
        s.schedule_for_window(&mut sched, 0, 63);
        assert!(sched.is_scheduled(40));
        assert!(!sched.is_scheduled(2));
        assert!(!sched.is_scheduled(70));

        s.schedule_sources(&mut sched);
        assert!(sched.is_scheduled(2));
        assert!(sched.is_scheduled(70));
    }

    #[test]
    fn source_lookups_delegate_to_registry() {
        let s = store_with(&[(11, 1), (22, 1)]);
        assert!(s.is_source(22));
        assert_eq!(s.source_index_of(22), Some(1));
        assert_eq!(s.source_vertex_of(0), 11);
        assert_eq!(s.source_index_of(5), None);
    }
}
