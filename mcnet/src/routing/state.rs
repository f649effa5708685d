//! Per-group routing state (§3): shared and per-source destination sets and the trees
//! computed over them.

use std::collections::{HashMap, HashSet};

use crate::routing::graph::AdjList;
use crate::types::{Port, SwitchId};

#[derive(Debug, Clone, Default)]
pub struct SourceTree {
    pub extra_dests: HashMap<SwitchId, HashSet<Port>>,
    pub tree: Option<AdjList>,
}

impl SourceTree {
    pub fn is_empty(&self) -> bool {
        self.extra_dests.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MulticastGroup {
    pub per_source: HashMap<crate::types::IpV4, SourceTree>,
    pub shared_dests: HashMap<SwitchId, HashSet<Port>>,
    pub shared_tree: Option<AdjList>,
}

impl MulticastGroup {
    /// A group with no destinations and no sources is destroyed (§3).
    pub fn is_empty(&self) -> bool {
        self.shared_dests.is_empty() && self.per_source.values().all(SourceTree::is_empty)
    }

    pub fn all_dest_switches(&self) -> HashSet<SwitchId> {
        let mut out: HashSet<SwitchId> = self.shared_dests.keys().copied().collect();
        for st in self.per_source.values() {
            out.extend(st.extra_dests.keys().copied());
        }
        out
    }
}
