//! Walk sources: vertex ↔ source index lookup.

use std::collections::HashMap;

use crate::{Error, Result, SourceIndex, VertexId};

/// Registered sources in index order, with their initial walk counts.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    vertices: Vec<VertexId>,
    walk_counts: Vec<u32>,
    index_of: HashMap<VertexId, SourceIndex>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `vertex` as the next source. Returns its index.
    pub fn register(&mut self, vertex: VertexId, walk_count: u32) -> Result<SourceIndex> {
        if self.index_of.contains_key(&vertex) {
            return Err(Error::DuplicateSource(vertex));
        }
        let idx = SourceIndex::try_from(self.vertices.len()).map_err(|_| {
            Error::InvalidParameter("too many sources for a 32-bit source index".to_string())
        })?;
        self.vertices.push(vertex);
        self.walk_counts.push(walk_count);
        self.index_of.insert(vertex, idx);
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn is_source(&self, vertex: VertexId) -> bool {
        self.index_of.contains_key(&vertex)
    }

    pub fn index_of(&self, vertex: VertexId) -> Option<SourceIndex> {
        self.index_of.get(&vertex).copied()
    }

    /// Panics if `idx` was never registered.
    pub fn vertex_of(&self, idx: SourceIndex) -> VertexId {
        self.vertices[idx as usize]
    }

    pub fn get_vertex(&self, idx: SourceIndex) -> Option<VertexId> {
        self.vertices.get(idx as usize).copied()
    }

    pub fn walk_count(&self, idx: SourceIndex) -> u32 {
        self.walk_counts[idx as usize]
    }

    /// Source vertices in index order.
    pub fn vertices(&self) -> &[VertexId] {
        &self.vertices
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceIndex, VertexId, u32)> + '_ {
        self.vertices
            .iter()
            .zip(self.walk_counts.iter())
            .enumerate()
            .map(|(i, (&v, &c))| (i as SourceIndex, v, c))
    }
}
