//! Vertex work lists.
//!
//! The traversal driver owns the work list; the walk store only marks vertices on it.

use crate::VertexId;

pub trait Scheduler {
    fn add_task(&mut self, vertex: VertexId);
    fn remove_all_tasks(&mut self);
}

/// Dense bitset work list over `0..n`.
#[derive(Debug, Clone, Default)]
pub struct VertexScheduler {
    bits: Vec<u64>,
    n: usize,
}

impl VertexScheduler {
    pub fn new(n: usize) -> Self {
        Self {
            bits: vec![0; n.div_ceil(64)],
            n,
        }
    }

    pub fn is_scheduled(&self, vertex: VertexId) -> bool {
        let v = vertex as usize;
        v < self.n && self.bits[v / 64] & (1u64 << (v % 64)) != 0
    }

    /// Clears `vertex` and reports whether it was scheduled.
    pub fn take(&mut self, vertex: VertexId) -> bool {
        let was = self.is_scheduled(vertex);
        if was {
            let v = vertex as usize;
            self.bits[v / 64] &= !(1u64 << (v % 64));
        }
        was
    }

    pub fn scheduled_count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Scheduler for VertexScheduler {
    fn add_task(&mut self, vertex: VertexId) {
        let v = vertex as usize;
        // Out-of-range tasks can't be visited by any window.
        if v < self.n {
            self.bits[v / 64] |= 1u64 << (v % 64);
        }
    }

    fn remove_all_tasks(&mut self) {
        self.bits.fill(0);
    }
}
