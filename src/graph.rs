//! Minimal graph adapter for the traversal side.
//!
//! The walk core never owns a graph: the traversal driver hands it the out-neighbors of the
//! vertex being visited. This module only provides the adapter the bundled in-memory driver
//! streams from.

use crate::{Error, Result, VertexId};

/// A graph view that can return **borrowed** out-neighbor slices.
///
/// Avoids allocating a new `Vec` for every visited vertex.
pub trait GraphRef {
    fn vertex_count(&self) -> usize;
    fn neighbors_ref(&self, vertex: VertexId) -> &[VertexId];
    fn out_degree(&self, vertex: VertexId) -> usize {
        self.neighbors_ref(vertex).len()
    }
}

/// Compressed (CSR-style) directed adjacency.
///
/// `targets[offsets[v]..offsets[v + 1]]` are the out-neighbors of `v`, sorted.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyList {
    offsets: Vec<usize>,
    targets: Vec<VertexId>,
}

impl AdjacencyList {
    /// Build from directed `u -> v` edges over vertices `0..n`.
    ///
    /// Edges with an endpoint outside `0..n` are rejected.
    pub fn from_edges(n: usize, edges: &[(VertexId, VertexId)]) -> Result<Self> {
        let mut degree = vec![0usize; n];
        for &(u, v) in edges {
            if u as usize >= n {
                return Err(Error::VertexOutOfRange(u));
            }
            if v as usize >= n {
                return Err(Error::VertexOutOfRange(v));
            }
            degree[u as usize] += 1;
        }

        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0);
        for d in &degree {
            let last = offsets[offsets.len() - 1];
            offsets.push(last + d);
        }

        let mut cursor = offsets[..n].to_vec();
        let mut targets = vec![0; edges.len()];
        for &(u, v) in edges {
            let slot = &mut cursor[u as usize];
            targets[*slot] = v;
            *slot += 1;
        }
        for v in 0..n {
            targets[offsets[v]..offsets[v + 1]].sort_unstable();
        }

        Ok(Self { offsets, targets })
    }

    /// Build from per-vertex neighbor lists (`adj[v]` = out-neighbors of `v`).
    pub fn from_lists(adj: &[Vec<VertexId>]) -> Result<Self> {
        let edges: Vec<(VertexId, VertexId)> = adj
            .iter()
            .enumerate()
            .flat_map(|(u, nbrs)| nbrs.iter().map(move |&v| (u as VertexId, v)))
            .collect();
        Self::from_edges(adj.len(), &edges)
    }

    pub fn edge_count(&self) -> usize {
        self.targets.len()
    }

    /// Convert a `petgraph` graph, using `NodeIndex::index()` as the vertex id.
    #[cfg(feature = "petgraph")]
    pub fn from_petgraph<N, E, Ty, Ix>(graph: &petgraph::Graph<N, E, Ty, Ix>) -> Result<Self>
    where
        Ty: petgraph::EdgeType,
        Ix: petgraph::graph::IndexType,
    {
        use petgraph::visit::EdgeRef;

        let mut edges = Vec::with_capacity(graph.edge_count());
        for e in graph.edge_references() {
            let (u, v) = (e.source().index(), e.target().index());
            edges.push((u as VertexId, v as VertexId));
            if !graph.is_directed() && u != v {
                edges.push((v as VertexId, u as VertexId));
            }
        }
        Self::from_edges(graph.node_count(), &edges)
    }
}

impl GraphRef for AdjacencyList {
    fn vertex_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    fn neighbors_ref(&self, vertex: VertexId) -> &[VertexId] {
        let v = vertex as usize;
        if v + 1 >= self.offsets.len() {
            return &[];
        }
        &self.targets[self.offsets[v]..self.offsets[v + 1]]
    }
}
