//! Link graph over record ids
//!
//! Nodes live in an arena; edges are index pairs in per-node adjacency
//! lists, so cycles never turn into ownership cycles. Edges are untyped.

use std::collections::HashMap;

use serde::Serialize;

use crate::node::{MemoryId, MemoryRecord};

/// A directed edge between two records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub from: MemoryId,
    pub to: MemoryId,
}

impl Edge {
    pub fn new(from: MemoryId, to: MemoryId) -> Self {
        Self { from, to }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    ids: Vec<MemoryId>,
    index: HashMap<MemoryId, usize>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    /// Links whose target is not a node
    dangling: Vec<Edge>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records. An id seen twice (same id in two scopes) is one
    /// node carrying the links of every copy.
    pub fn build<'a>(records: impl IntoIterator<Item = &'a MemoryRecord> + Clone) -> Self {
        let mut graph = Self::new();
        for record in records.clone() {
            graph.add_node(&record.id);
        }
        for record in records {
            for target in &record.links {
                if graph.contains(target) {
                    graph.add_edge(&record.id, target);
                } else {
                    graph
                        .dangling
                        .push(Edge::new(record.id.clone(), target.clone()));
                }
            }
        }
        graph
    }

    /// Insert a node if absent, returning its arena index
    pub fn add_node(&mut self, id: &MemoryId) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id.clone());
        self.index.insert(id.clone(), idx);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        idx
    }

    /// Add `from -> to`. Self-edges, duplicates and unknown endpoints are
    /// refused with `false`.
    pub fn add_edge(&mut self, from: &MemoryId, to: &MemoryId) -> bool {
        let (Some(&f), Some(&t)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if f == t || self.outgoing[f].contains(&t) {
            return false;
        }
        self.outgoing[f].push(t);
        self.incoming[t].push(f);
        true
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.index.contains_key(id)
    }

    pub fn has_edge(&self, from: &MemoryId, to: &MemoryId) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&f), Some(&t)) => self.outgoing[f].contains(&t),
            _ => false,
        }
    }

    pub fn outgoing(&self, id: &MemoryId) -> Vec<&MemoryId> {
        self.neighbours(id, &self.outgoing)
    }

    pub fn incoming(&self, id: &MemoryId) -> Vec<&MemoryId> {
        self.neighbours(id, &self.incoming)
    }

    fn neighbours<'a>(&'a self, id: &MemoryId, lists: &'a [Vec<usize>]) -> Vec<&'a MemoryId> {
        self.index
            .get(id)
            .map(|&idx| lists[idx].iter().map(|&n| &self.ids[n]).collect())
            .unwrap_or_default()
    }

    /// Ids with no incoming and no outgoing edges, sorted
    pub fn orphans(&self) -> Vec<MemoryId> {
        let mut orphans: Vec<MemoryId> = (0..self.ids.len())
            .filter(|&i| self.outgoing[i].is_empty() && self.incoming[i].is_empty())
            .map(|i| self.ids[i].clone())
            .collect();
        orphans.sort();
        orphans
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.iter().map(Vec::len).sum()
    }

    pub fn dangling(&self) -> &[Edge] {
        &self.dangling
    }
}
