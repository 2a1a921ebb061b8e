//! Sparse frequency distributions over vertex ids.
//!
//! A [`Distribution`] is a sorted array of unique ids with a parallel array of counts.
//! A count of [`AVOID`] (`-1`) marks an id as explicitly excluded; it is not the same as
//! a count of `0`, which is what [`Distribution::count`] reports for absent ids.
//!
//! Invariants:
//! - ids are strictly increasing
//! - `ids.len() == counts.len()`
//! - no stored count is `0`

use crate::topk::top_k_counts;
use crate::VertexId;

/// Count sentinel for avoided ids.
pub const AVOID: i32 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Distribution {
    ids: Vec<VertexId>,
    counts: Vec<i32>,
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run-length encode a sorted id sequence in one pass.
    ///
    /// `sorted_ids` must be non-decreasing; this is checked in debug builds only.
    pub fn from_sorted(sorted_ids: &[VertexId]) -> Self {
        debug_assert!(
            sorted_ids.windows(2).all(|w| w[0] <= w[1]),
            "ids must be sorted"
        );
        let mut ids: Vec<VertexId> = Vec::new();
        let mut counts: Vec<i32> = Vec::new();
        for &id in sorted_ids {
            match ids.last() {
                Some(&last) if last == id => {
                    if let Some(c) = counts.last_mut() {
                        *c = c.saturating_add(1);
                    }
                }
                _ => {
                    ids.push(id);
                    counts.push(1);
                }
            }
        }
        Self { ids, counts }
    }

    /// Sorts a copy of `ids` and builds from it.
    pub fn from_unsorted(ids: &[VertexId]) -> Self {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        Self::from_sorted(&sorted)
    }

    /// A distribution where every id in `sorted_ids` is avoided.
    pub fn avoidance(sorted_ids: &[VertexId]) -> Self {
        let mut d = Self::from_sorted(sorted_ids);
        d.counts.fill(AVOID);
        d
    }

    pub fn singleton(id: VertexId) -> Self {
        Self {
            ids: vec![id],
            counts: vec![1],
        }
    }

    /// Stored count for `id`: `0` when absent, [`AVOID`] when avoided.
    pub fn count(&self, id: VertexId) -> i32 {
        match self.ids.binary_search(&id) {
            Ok(i) => self.counts[i],
            Err(_) => 0,
        }
    }

    pub fn is_avoided(&self, id: VertexId) -> bool {
        self.count(id) == AVOID
    }

    /// Number of unique ids (avoided ones included).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[VertexId] {
        &self.ids
    }

    pub fn counts(&self) -> &[i32] {
        &self.counts
    }

    pub fn iter(&self) -> impl Iterator<Item = (VertexId, i32)> + '_ {
        self.ids.iter().copied().zip(self.counts.iter().copied())
    }

    /// Sum of the positive counts.
    pub fn total_count(&self) -> u64 {
        self.counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| c as u64)
            .sum()
    }

    /// Two-pointer merge of two distributions.
    ///
    /// Ids present on one side carry through unchanged. Ids present on both sides get the sum
    /// of their counts, saturating at `i32::MAX`, unless either side is [`AVOID`], in which
    /// case the result is [`AVOID`].
    pub fn merge(a: &Distribution, b: &Distribution) -> Distribution {
        let cap = a.len() + b.len();
        let mut ids = Vec::with_capacity(cap);
        let mut counts = Vec::with_capacity(cap);

        let (mut i, mut j) = (0usize, 0usize);
        while i < a.len() && j < b.len() {
            let (ia, ib) = (a.ids[i], b.ids[j]);
            if ia == ib {
                let (ca, cb) = (a.counts[i], b.counts[j]);
                ids.push(ia);
                counts.push(if ca < 0 || cb < 0 { AVOID } else { ca.saturating_add(cb) });
                i += 1;
                j += 1;
            } else if ia < ib {
                ids.push(ia);
                counts.push(a.counts[i]);
                i += 1;
            } else {
                ids.push(ib);
                counts.push(b.counts[j]);
                j += 1;
            }
        }
        ids.extend_from_slice(&a.ids[i..]);
        counts.extend_from_slice(&a.counts[i..]);
        ids.extend_from_slice(&b.ids[j..]);
        counts.extend_from_slice(&b.counts[j..]);

        Distribution { ids, counts }
    }

    /// In-place variant of [`Distribution::merge`].
    pub fn merge_from(&mut self, other: &Distribution) {
        if other.is_empty() {
            return;
        }
        *self = Distribution::merge(self, other);
    }

    /// The `k` ids with the largest counts, largest first.
    ///
    /// Avoided ids are never returned, so the result can be shorter than `k` even when
    /// `self.len() >= k`.
    pub fn top(&self, k: usize) -> Vec<(VertexId, i32)> {
        top_k_counts(self.iter(), k)
    }
}
