//! Weighted, symmetric switch-link adjacency map used as the common currency between
//! the metric closure, the expanded tree, and the final fixed-up tree (§3, §4.6).

use std::collections::{HashMap, HashSet};

use crate::types::{Port, SwitchId};
use crate::weight::CompositeWeight;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub src_port: Port,
    pub dst_port: Port,
    pub weight: CompositeWeight,
}

/// `map<SwitchId, map<SwitchId, Link>>`, kept symmetric: an edge `u -> v` always has a
/// matching `v -> u` entry (ports swapped, weight equal).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjList(pub HashMap<SwitchId, HashMap<SwitchId, Link>>);

impl AdjList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = SwitchId> + '_ {
        self.0.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.0.len()
    }

    pub fn ensure_node(&mut self, sw: SwitchId) {
        self.0.entry(sw).or_default();
    }

    pub fn neighbors(&self, sw: SwitchId) -> impl Iterator<Item = (SwitchId, &Link)> {
        self.0.get(&sw).into_iter().flat_map(|m| m.iter().map(|(k, v)| (*k, v)))
    }

    pub fn degree(&self, sw: SwitchId) -> usize {
        self.0.get(&sw).map(|m| m.len()).unwrap_or(0)
    }

    pub fn edge(&self, a: SwitchId, b: SwitchId) -> Option<&Link> {
        self.0.get(&a).and_then(|m| m.get(&b))
    }

    /// Insert a symmetric edge, keeping the lighter weight if one already exists
    /// (duplicate edges arise when two expanded paths share an underlying link).
    pub fn insert_edge(&mut self, a: SwitchId, b: SwitchId, link: Link) {
        self.ensure_node(a);
        self.ensure_node(b);
        let keep_a = match self.0.get(&a).and_then(|m| m.get(&b)) {
            Some(existing) => link.weight < existing.weight,
            None => true,
        };
        if keep_a {
            self.0.get_mut(&a).unwrap().insert(
                b,
                link,
            );
            self.0.get_mut(&b).unwrap().insert(
                a,
                Link {
                    src_port: link.dst_port,
                    dst_port: link.src_port,
                    weight: link.weight,
                },
            );
        }
    }

    pub fn remove_node(&mut self, sw: SwitchId) {
        if let Some(neighbors) = self.0.remove(&sw) {
            for n in neighbors.keys() {
                if let Some(m) = self.0.get_mut(n) {
                    m.remove(&sw);
                }
            }
        }
    }

    /// Repeatedly strip degree-1 nodes that are not in `keep`, per the fix-up step.
    pub fn strip_non_dest_leaves(&mut self, keep: &HashSet<SwitchId>) {
        loop {
            let leaf = self
                .0
                .iter()
                .find(|(n, edges)| edges.len() <= 1 && !keep.contains(n))
                .map(|(n, _)| *n);
            match leaf {
                Some(n) => self.remove_node(n),
                None => break,
            }
        }
    }
}
