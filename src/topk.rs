//! Ranking utilities.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// The `k` entries with the largest counts, largest first.
///
/// Keeps a min-heap of at most `k` entries and replaces the current minimum whenever a larger
/// count shows up, so this is \(O(n \log k)\). Non-positive counts (absent or avoided ids)
/// never rank, so the result holds fewer than `k` entries whenever fewer than `k` counts are
/// positive, however many entries went in. Ties keep the entry seen first.
pub fn top_k_counts<I>(entries: I, k: usize) -> Vec<(u32, i32)>
where
    I: IntoIterator<Item = (u32, i32)>,
{
    if k == 0 {
        return Vec::new();
    }
    // (count, Reverse(seq)) orders equal counts so the earliest entry is the largest.
    let mut heap: BinaryHeap<Reverse<(i32, Reverse<usize>, u32)>> = BinaryHeap::with_capacity(k + 1);
    for (seq, (id, count)) in entries.into_iter().enumerate() {
        if count <= 0 {
            continue;
        }
        if heap.len() < k {
            heap.push(Reverse((count, Reverse(seq), id)));
        } else if let Some(&Reverse((min_count, _, _))) = heap.peek() {
            if count > min_count {
                heap.pop();
                heap.push(Reverse((count, Reverse(seq), id)));
            }
        }
    }
    let mut ranked: Vec<(i32, Reverse<usize>, u32)> = heap.into_iter().map(|Reverse(e)| e).collect();
    ranked.sort_unstable_by(|a, b| b.cmp(a));
    ranked.into_iter().map(|(count, _, id)| (id, count)).collect()
}
