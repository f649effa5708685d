//! Multicast routing engine (component C6): maintains per-(group[, source]) membership
//! and computes KMB approximate Steiner trees, reacting to `GroupEvent`s and
//! `LinkWeightChanged`s (§4.6).

use std::collections::{HashMap, HashSet};

use log::debug;
use thiserror::Error;

use crate::event::{GroupAction, GroupEvent, LinkWeightChanged};
use crate::interfaces::UnicastRouting;
use crate::routing::graph::AdjList;
use crate::routing::kmb::{attach_source, steiner_tree};
use crate::routing::state::MulticastGroup;
use crate::types::{IpV4, Port, SwitchId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("group {0} referenced by event has no record")]
    UnknownGroup(IpV4),
}

/// Looks up the switch a given source IP is currently attached to (the host-IP tracker,
/// consumed read-only here: C6 owns no host-location state of its own, §3).
pub trait SourceLocator {
    fn locate(&self, src: IpV4) -> Option<SwitchId>;
}

#[derive(Default)]
pub struct RoutingEngine {
    groups: HashMap<IpV4, MulticastGroup>,
    /// Source -> groups reverse index, for O(1) lookup on host-location changes (§3).
    src_groups: HashMap<IpV4, HashSet<IpV4>>,
}

impl RoutingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, group: IpV4) -> Option<&MulticastGroup> {
        self.groups.get(&group)
    }

    /// Groups a source IP currently has membership interest in.
    pub fn groups_for_source(&self, src: IpV4) -> impl Iterator<Item = IpV4> + '_ {
        self.src_groups.get(&src).into_iter().flat_map(|s| s.iter().copied())
    }

    /// Apply a `GroupEvent` emitted by the group manager, recomputing trees as needed.
    /// Returns the set of `(group, src)` pairs whose deliverable tree may have changed.
    pub fn handle_group_event<U: UnicastRouting>(
        &mut self,
        ev: GroupEvent,
        unicast: &U,
    ) -> Vec<(IpV4, Option<IpV4>)> {
        let mut touched = Vec::new();
        match (ev.action, ev.src) {
            (GroupAction::Add, None) => {
                self.groups.entry(ev.group).or_default();
                touched.push((ev.group, None));
            }
            (GroupAction::Add, Some(src)) => {
                let g = self.groups.entry(ev.group).or_default();
                let st = g.per_source.entry(src).or_default();
                let changed = st
                    .extra_dests
                    .entry(ev.switch)
                    .or_default()
                    .insert(ev.port);
                self.src_groups.entry(src).or_default().insert(ev.group);
                if changed {
                    self.recompute_source(ev.group, src, unicast);
                }
                touched.push((ev.group, Some(src)));
            }
            (GroupAction::Remove, None) => {
                if let Some(g) = self.groups.get_mut(&ev.group) {
                    if let Some(ports) = g.shared_dests.get_mut(&ev.switch) {
                        ports.remove(&ev.port);
                        if ports.is_empty() {
                            g.shared_dests.remove(&ev.switch);
                        }
                    }
                    self.recompute_shared(ev.group, unicast);
                    self.drop_if_empty(ev.group);
                } else {
                    debug!("group {} remove event with no shared record", ev.group);
                }
                touched.push((ev.group, None));
            }
            (GroupAction::Remove, Some(src)) => {
                if let Some(g) = self.groups.get_mut(&ev.group) {
                    if let Some(st) = g.per_source.get_mut(&src) {
                        if let Some(ports) = st.extra_dests.get_mut(&ev.switch) {
                            ports.remove(&ev.port);
                            if ports.is_empty() {
                                st.extra_dests.remove(&ev.switch);
                            }
                        }
                    }
                    self.recompute_source(ev.group, src, unicast);
                    if let Some(st) = g.per_source.get(&src) {
                        if st.is_empty() {
                            g.per_source.remove(&src);
                        }
                    }
                    if let Some(groups) = self.src_groups.get_mut(&src) {
                        if g.per_source.get(&src).is_none() {
                            groups.remove(&ev.group);
                        }
                    }
                    self.drop_if_empty(ev.group);
                }
                touched.push((ev.group, Some(src)));
            }
            (GroupAction::ToExclude, None) => {
                let g = self.groups.entry(ev.group).or_default();
                g.shared_dests.entry(ev.switch).or_default().insert(ev.port);
                self.recompute_shared(ev.group, unicast);
                let sources: Vec<IpV4> = self
                    .groups
                    .get(&ev.group)
                    .map(|g| g.per_source.keys().copied().collect())
                    .unwrap_or_default();
                for src in sources {
                    let already = self
                        .groups
                        .get(&ev.group)
                        .and_then(|g| g.per_source.get(&src))
                        .map(|st| st.extra_dests.contains_key(&ev.switch))
                        .unwrap_or(false);
                    if !already {
                        self.recompute_source(ev.group, src, unicast);
                    }
                    touched.push((ev.group, Some(src)));
                }
                touched.push((ev.group, None));
            }
            (GroupAction::ToInclude, None) => {
                if let Some(g) = self.groups.get_mut(&ev.group) {
                    if let Some(ports) = g.shared_dests.get_mut(&ev.switch) {
                        ports.remove(&ev.port);
                        if ports.is_empty() {
                            g.shared_dests.remove(&ev.switch);
                        }
                    }
                }
                self.recompute_shared(ev.group, unicast);
                let sources: Vec<IpV4> = self
                    .groups
                    .get(&ev.group)
                    .map(|g| g.per_source.keys().copied().collect())
                    .unwrap_or_default();
                for src in sources {
                    self.recompute_source(ev.group, src, unicast);
                    touched.push((ev.group, Some(src)));
                }
                self.drop_if_empty(ev.group);
                touched.push((ev.group, None));
            }
            (GroupAction::ToExclude | GroupAction::ToInclude, Some(_)) => {
                // filter-mode transitions are always reported for the (*, G) shared
                // state; a per-source filter transition has no routing effect of its
                // own, the membership add/remove events drive source-tree changes.
            }
        }
        touched
    }

    /// React to a link weight change: recompute every tree using the oriented edge.
    /// Returns the `(group, src)` pairs recomputed.
    pub fn handle_link_weight_changed<U: UnicastRouting>(
        &mut self,
        ev: &LinkWeightChanged,
        unicast: &U,
    ) -> Vec<(IpV4, Option<IpV4>)> {
        let mut affected = Vec::new();
        let groups: Vec<IpV4> = self.groups.keys().copied().collect();
        for group in groups {
            let uses_shared = self
                .groups
                .get(&group)
                .and_then(|g| g.shared_tree.as_ref())
                .map(|t| t.edge(ev.src, ev.dst).is_some())
                .unwrap_or(false);
            if uses_shared {
                self.recompute_shared(group, unicast);
                affected.push((group, None));
            }
            let sources: Vec<IpV4> = self
                .groups
                .get(&group)
                .map(|g| g.per_source.keys().copied().collect())
                .unwrap_or_default();
            for src in sources {
                let uses_source = self
                    .groups
                    .get(&group)
                    .and_then(|g| g.per_source.get(&src))
                    .and_then(|st| st.tree.as_ref())
                    .map(|t| t.edge(ev.src, ev.dst).is_some())
                    .unwrap_or(false);
                if uses_source {
                    self.recompute_source(group, src, unicast);
                    affected.push((group, Some(src)));
                }
            }
        }
        affected
    }

    /// `true` if `(src, group)` has anything to deliver to: a fresh source tree, or any
    /// shared destination at all (§4.7 packet-in handler: "the routing engine has a tree
    /// for (g,s) or any shared destination for g exists").
    pub fn has_tree(&self, group: IpV4, src: IpV4) -> bool {
        let Some(g) = self.groups.get(&group) else {
            return false;
        };
        g.per_source.get(&src).map(|st| st.tree.is_some()).unwrap_or(false) || !g.shared_dests.is_empty()
    }

    /// Every destination port the installer must deliver to for `(src, group)`: the
    /// union of the shared destinations and, when a source-specific tree exists, that
    /// source's extra destinations (§4.6: "the delivered tree must include all shared
    /// destinations plus the source-specific destinations").
    pub fn dest_ports(&self, group: IpV4, src: IpV4) -> HashMap<SwitchId, HashSet<Port>> {
        let Some(g) = self.groups.get(&group) else {
            return HashMap::new();
        };
        let mut out = g.shared_dests.clone();
        if let Some(st) = g.per_source.get(&src) {
            if st.tree.is_some() {
                for (sw, ports) in &st.extra_dests {
                    out.entry(*sw).or_default().extend(ports.iter().copied());
                }
            }
        }
        out
    }

    /// Tree selection (§4.6): prefer a fresh source-specific tree, else the shared tree.
    /// The returned tree is a clone the caller owns outright (§5: handoff by value).
    pub fn get_tree_path<U: UnicastRouting, L: SourceLocator>(
        &self,
        src: IpV4,
        group: IpV4,
        unicast: &U,
        locator: &L,
    ) -> Option<AdjList> {
        let g = self.groups.get(&group)?;
        let base = g
            .per_source
            .get(&src)
            .and_then(|st| st.tree.clone())
            .or_else(|| g.shared_tree.clone())?;
        let source_switch = locator.locate(src)?;
        let mut tree = base;
        if attach_source(&mut tree, source_switch, unicast) {
            Some(tree)
        } else {
            None
        }
    }

    fn recompute_shared<U: UnicastRouting>(&mut self, group: IpV4, unicast: &U) {
        let Some(g) = self.groups.get_mut(&group) else {
            return;
        };
        if g.shared_dests.is_empty() {
            g.shared_tree = None;
            return;
        }
        let dests: HashSet<SwitchId> = g.shared_dests.keys().copied().collect();
        g.shared_tree = steiner_tree(&dests, unicast);
    }

    fn recompute_source<U: UnicastRouting>(&mut self, group: IpV4, src: IpV4, unicast: &U) {
        let Some(g) = self.groups.get_mut(&group) else {
            return;
        };
        let shared_dests: HashSet<SwitchId> = g.shared_dests.keys().copied().collect();
        let Some(st) = g.per_source.get_mut(&src) else {
            return;
        };
        if st.extra_dests.is_empty() && shared_dests.is_empty() {
            st.tree = None;
            return;
        }
        let mut dests: HashSet<SwitchId> = st.extra_dests.keys().copied().collect();
        dests.extend(shared_dests);
        st.tree = steiner_tree(&dests, unicast);
    }

    fn drop_if_empty(&mut self, group: IpV4) {
        if let Some(g) = self.groups.get(&group) {
            if g.is_empty() {
                self.groups.remove(&group);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{Hop, UnicastPath};
    use crate::types::Port;
    use std::collections::HashMap as StdHashMap;

    struct FakeUnicast(StdHashMap<(SwitchId, SwitchId), UnicastPath>);

    impl UnicastRouting for FakeUnicast {
        fn route(&self, src: SwitchId, dst: SwitchId) -> Option<UnicastPath> {
            self.0.get(&(src, dst)).cloned()
        }
    }

    struct FakeLocator(StdHashMap<IpV4, SwitchId>);

    impl SourceLocator for FakeLocator {
        fn locate(&self, src: IpV4) -> Option<SwitchId> {
            self.0.get(&src).copied()
        }
    }

    fn direct(a: SwitchId, b: SwitchId, w: u64) -> UnicastPath {
        UnicastPath {
            path: vec![Hop {
                dst: b,
                in_port: Port(2),
                out_port: Port(1),
                weight: CompositeWeight::new(w),
            }],
            weight: CompositeWeight::new(w),
        }
    }

    use crate::weight::CompositeWeight;

    fn symmetric_pair(a: SwitchId, b: SwitchId, w: u64) -> StdHashMap<(SwitchId, SwitchId), UnicastPath> {
        let mut m = StdHashMap::new();
        m.insert((a, b), direct(a, b, w));
        m.insert((b, a), direct(b, a, w));
        m
    }

    #[test]
    fn add_shared_destination_builds_tree() {
        let mut engine = RoutingEngine::new();
        let fake = FakeUnicast(symmetric_pair(SwitchId(1), SwitchId(2), 5));
        let ev = GroupEvent::new(IpV4::new(224, 1, 1, 1), SwitchId(1), Port(3), GroupAction::ToExclude);
        engine.handle_group_event(ev, &fake);
        let ev2 = GroupEvent::new(IpV4::new(224, 1, 1, 1), SwitchId(2), Port(4), GroupAction::ToExclude);
        engine.handle_group_event(ev2, &fake);
        let g = engine.group(IpV4::new(224, 1, 1, 1)).unwrap();
        assert!(g.shared_tree.is_some());
        assert_eq!(g.shared_tree.as_ref().unwrap().node_count(), 2);
    }

    #[test]
    fn removing_all_destinations_drops_group() {
        let mut engine = RoutingEngine::new();
        let fake = FakeUnicast(StdHashMap::new());
        let group = IpV4::new(224, 1, 1, 1);
        let ev = GroupEvent::new(group, SwitchId(1), Port(3), GroupAction::ToExclude);
        engine.handle_group_event(ev, &fake);
        assert!(engine.group(group).is_some());
        let ev = GroupEvent::new(group, SwitchId(1), Port(3), GroupAction::ToInclude);
        engine.handle_group_event(ev, &fake);
        assert!(engine.group(group).is_none());
    }

    #[test]
    fn source_specific_join_builds_source_tree_and_reverse_index() {
        let mut engine = RoutingEngine::new();
        let fake = FakeUnicast(symmetric_pair(SwitchId(1), SwitchId(2), 2));
        let group = IpV4::new(224, 1, 1, 1);
        let src = IpV4::new(10, 0, 0, 1);
        let ev = GroupEvent::with_src(group, SwitchId(2), Port(9), src, GroupAction::Add);
        engine.handle_group_event(ev, &fake);
        let g = engine.group(group).unwrap();
        assert!(g.per_source.get(&src).unwrap().tree.is_some());
        assert_eq!(engine.groups_for_source(src).collect::<Vec<_>>(), vec![group]);
    }

    #[test]
    fn link_weight_change_recomputes_only_affected_trees() {
        let mut engine = RoutingEngine::new();
        let fake = FakeUnicast(symmetric_pair(SwitchId(1), SwitchId(2), 5));
        let group = IpV4::new(224, 1, 1, 1);
        engine.handle_group_event(
            GroupEvent::new(group, SwitchId(1), Port(1), GroupAction::ToExclude),
            &fake,
        );
        engine.handle_group_event(
            GroupEvent::new(group, SwitchId(2), Port(1), GroupAction::ToExclude),
            &fake,
        );
        let change = LinkWeightChanged {
            src: SwitchId(1),
            dst: SwitchId(2),
            src_port: Port(1),
            dst_port: Port(2),
            old: CompositeWeight::new(5),
            new: CompositeWeight::new(9),
        };
        let affected = engine.handle_link_weight_changed(&change, &fake);
        assert_eq!(affected, vec![(group, None)]);
    }

    #[test]
    fn get_tree_path_attaches_source_to_shared_tree() {
        let mut engine = RoutingEngine::new();
        let mut table = symmetric_pair(SwitchId(1), SwitchId(2), 5);
        table.extend(symmetric_pair(SwitchId(3), SwitchId(2), 1));
        let fake = FakeUnicast(table);
        let group = IpV4::new(224, 1, 1, 1);
        engine.handle_group_event(
            GroupEvent::new(group, SwitchId(1), Port(1), GroupAction::ToExclude),
            &fake,
        );
        engine.handle_group_event(
            GroupEvent::new(group, SwitchId(2), Port(1), GroupAction::ToExclude),
            &fake,
        );
        let src = IpV4::new(10, 0, 0, 5);
        let mut locations = StdHashMap::new();
        locations.insert(src, SwitchId(3));
        let locator = FakeLocator(locations);
        let tree = engine.get_tree_path(src, group, &fake, &locator).unwrap();
        assert!(tree.0.contains_key(&SwitchId(3)));
    }

    #[test]
    fn dest_ports_unions_shared_and_source_specific() {
        let mut engine = RoutingEngine::new();
        let fake = FakeUnicast(symmetric_pair(SwitchId(1), SwitchId(2), 5));
        let group = IpV4::new(224, 1, 1, 1);
        let src = IpV4::new(10, 0, 0, 9);
        engine.handle_group_event(
            GroupEvent::new(group, SwitchId(1), Port(1), GroupAction::ToExclude),
            &fake,
        );
        engine.handle_group_event(
            GroupEvent::with_src(group, SwitchId(2), Port(9), src, GroupAction::Add),
            &fake,
        );
        let ports = engine.dest_ports(group, src);
        assert_eq!(ports.get(&SwitchId(1)).unwrap(), &HashSet::from([Port(1)]));
        assert_eq!(ports.get(&SwitchId(2)).unwrap(), &HashSet::from([Port(9)]));
    }

    #[test]
    fn has_tree_true_for_shared_destination_without_source_tree() {
        let mut engine = RoutingEngine::new();
        let fake = FakeUnicast(StdHashMap::new());
        let group = IpV4::new(224, 1, 1, 1);
        engine.handle_group_event(
            GroupEvent::new(group, SwitchId(1), Port(1), GroupAction::ToExclude),
            &fake,
        );
        assert!(engine.has_tree(group, IpV4::new(10, 0, 0, 1)));
    }
}
