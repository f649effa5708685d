// mcast-controller: SDN multicast control core
// Copyright (C) 2024 mcast-controller contributors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Flow-mod construction (§4.7, §6 "Flow-mod match template").
//!
//! `plan_install` walks a tree depth-first from its root, computing for each switch the
//! union of output actions implied by its tree children plus the switch's own
//! destination ports, and returns the plan in leaves-before-root order — installing in
//! that order is what minimises duplicate packet-ins while the tree is still going up
//! (§4.7, §8 scenario 5).

use std::collections::{HashMap, HashSet, VecDeque};

use mcnet::interfaces::{Action, FlowMatch};
use mcnet::routing::AdjList;
use mcnet::types::{IpV4, Port, SwitchId};

/// One switch's worth of a tree install: the rule to match, the actions to take, and
/// whether this switch is the tree root (only the root gets `SEND_FLOW_REM`, §4.7).
#[derive(Debug, Clone)]
pub struct FlowPlanStep {
    pub switch: SwitchId,
    pub in_port: Port,
    pub actions: Vec<Action>,
    pub is_root: bool,
}

/// Walk `tree` from `root` (entering on `root_in_port`, the port the source host is
/// attached to), returning one [`FlowPlanStep`] per switch in leaves-first order.
/// `dest_ports` supplies the destination-host output ports for each switch, which are
/// unioned with the tree-child output ports per switch (§4.7).
pub fn plan_install(
    tree: &AdjList,
    root: SwitchId,
    root_in_port: Port,
    dest_ports: &HashMap<SwitchId, HashSet<Port>>,
) -> Vec<FlowPlanStep> {
    let mut visited: HashSet<SwitchId> = HashSet::new();
    visited.insert(root);
    // (switch, in_port, parent) in discovery order; parent is `None` only for root.
    let mut order: Vec<(SwitchId, Port, Option<SwitchId>)> = vec![(root, root_in_port, None)];
    let mut queue = VecDeque::new();
    queue.push_back(root);

    while let Some(sw) = queue.pop_front() {
        let mut children: Vec<(SwitchId, Port)> = tree
            .neighbors(sw)
            .filter(|(n, _)| !visited.contains(n))
            .map(|(n, link)| (n, link.dst_port))
            .collect();
        children.sort_by_key(|(n, _)| *n);
        for (child, child_in_port) in children {
            visited.insert(child);
            order.push((child, child_in_port, Some(sw)));
            queue.push_back(child);
        }
    }

    order
        .into_iter()
        .rev()
        .map(|(sw, in_port, parent)| {
            let mut actions: Vec<Action> = tree
                .neighbors(sw)
                .filter(|(n, _)| Some(*n) != parent)
                .map(|(_, link)| Action::Output(link.src_port))
                .collect();
            actions.sort_by_key(|Action::Output(p)| p.0);
            actions.dedup();
            for p in dest_ports.get(&sw).into_iter().flatten() {
                let a = Action::Output(*p);
                if !actions.contains(&a) {
                    actions.push(a);
                }
            }
            FlowPlanStep {
                switch: sw,
                in_port,
                actions,
                is_root: parent.is_none(),
            }
        })
        .collect()
}

/// Exact-match template for a multicast data flow (§6): `in_port`, `dl_type=IP`,
/// `nw_proto=UDP`, exact `nw_src`/`nw_dst`, everything else wildcarded. The deletion
/// variant omits `in_port`.
pub fn flow_match(in_port: Port, nw_src: IpV4, nw_dst: IpV4) -> FlowMatch {
    FlowMatch::new(in_port, nw_src, nw_dst)
}

pub fn flow_match_for_delete(nw_src: IpV4, nw_dst: IpV4) -> FlowMatch {
    FlowMatch::for_delete(nw_src, nw_dst)
}

/// Parse `(nw_src, nw_dst)` out of a raw Ethernet/IPv4/UDP frame, returning `None` if the
/// frame is not IPv4-over-Ethernet, not UDP, or too short. Used by the packet-in handler
/// to recognise multicast data traffic (§4.7).
pub fn parse_ipv4_udp(frame: &[u8]) -> Option<(IpV4, IpV4)> {
    const ETHERTYPE_IPV4: u16 = 0x0800;
    const IP_PROTO_UDP: u8 = 17;

    if frame.len() < 14 + 20 {
        return None;
    }
    if u16::from_be_bytes([frame[12], frame[13]]) != ETHERTYPE_IPV4 {
        return None;
    }
    let ip = &frame[14..];
    let ihl = (ip[0] & 0x0F) as usize * 4;
    if ip.len() < ihl || ip[9] != IP_PROTO_UDP {
        return None;
    }
    let src = IpV4(u32::from_be_bytes([ip[12], ip[13], ip[14], ip[15]]));
    let dst = IpV4(u32::from_be_bytes([ip[16], ip[17], ip[18], ip[19]]));
    Some((src, dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcnet::routing::Link;
    use mcnet::weight::CompositeWeight;

    fn link(src_port: u16, dst_port: u16) -> mcnet::routing::Link {
        Link {
            src_port: Port(src_port),
            dst_port: Port(dst_port),
            weight: CompositeWeight::new(1),
        }
    }

    #[test]
    fn leaf_order_puts_root_last() {
        let mut tree = AdjList::new();
        tree.insert_edge(SwitchId(1), SwitchId(2), link(10, 20));
        tree.insert_edge(SwitchId(2), SwitchId(3), link(11, 21));
        let mut dests = HashMap::new();
        dests.insert(SwitchId(2), HashSet::from([Port(99)]));
        dests.insert(SwitchId(3), HashSet::from([Port(98)]));
        let plan = plan_install(&tree, SwitchId(1), Port(5), &dests);
        assert_eq!(plan.last().unwrap().switch, SwitchId(1));
        assert!(plan.last().unwrap().is_root);
        assert!(plan[..plan.len() - 1].iter().all(|s| !s.is_root));
    }

    #[test]
    fn root_action_includes_output_towards_child() {
        let mut tree = AdjList::new();
        tree.insert_edge(SwitchId(1), SwitchId(2), link(10, 20));
        let dests = HashMap::new();
        let plan = plan_install(&tree, SwitchId(1), Port(5), &dests);
        let root = plan.iter().find(|s| s.is_root).unwrap();
        assert_eq!(root.actions, vec![Action::Output(Port(10))]);
    }

    #[test]
    fn udp_ipv4_parsed() {
        let mut frame = vec![0u8; 14 + 20];
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        frame[14] = 0x45;
        frame[14 + 9] = 17;
        frame[14 + 12..14 + 16].copy_from_slice(&10u32.to_be_bytes());
        frame[14 + 16..14 + 20].copy_from_slice(&IpV4::new(224, 1, 1, 1).0.to_be_bytes());
        let (src, dst) = parse_ipv4_udp(&frame).unwrap();
        assert_eq!(dst, IpV4::new(224, 1, 1, 1));
        assert_eq!(src, IpV4(10));
    }
}
