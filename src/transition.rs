//! One step of a walk with restarts.

use rand::prelude::*;

use crate::VertexId;

/// Probability that a walk jumps back to its source instead of hopping.
pub const DEFAULT_RESET_PROBABILITY: f64 = 0.15;

/// Where a walk sitting on a vertex with `neighbors` goes next.
///
/// Hops to a uniformly random out-neighbor with probability `1 - reset_probability`, and
/// always hops on the first iteration. With no out-neighbors, or when the reset draw fires,
/// it goes back to `source_vertex`.
pub fn choose_destination<R: Rng>(
    rng: &mut R,
    neighbors: &[VertexId],
    source_vertex: VertexId,
    reset_probability: f64,
    first_iteration: bool,
) -> VertexId {
    if neighbors.is_empty() {
        return source_vertex;
    }
    if first_iteration || rng.random::<f64>() >= reset_probability {
        *neighbors.choose(rng).unwrap_or(&source_vertex)
    } else {
        source_vertex
    }
}
