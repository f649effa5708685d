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

//! In-memory implementations of the four external-interface traits, used to drive the
//! controller without a real fabric. This is the simulated runtime the binary's demo
//! scenario runs against; it is not part of the controller's own state (§1 Non-goals:
//! topology discovery, unicast routing and the OpenFlow wire transport are all out of
//! scope to *implement*, only to *consume*).

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use log::{debug, info};

use mcnet::igmp::{build_v2, igmp_checksum, TYPE_V2_REPORT};
use mcnet::interfaces::{
    Action, FlowCommand, FlowFlags, FlowMatch, FlowTransport, Hop, LinkPorts, TimerCallback, TimerHandle,
    TimerService, Topology, UnicastPath, UnicastRouting,
};
use mcnet::types::{EthAddr, IpV4, Port, SwitchId};
use mcnet::weight::CompositeWeight;

const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_IGMP: u8 = 2;

/// Assemble a full Ethernet/IPv4 frame carrying an IGMPv2 membership report, as a host
/// would send it. Mirrors `group_manager::packet::build_query_frame`'s framing, but for
/// the host -> controller direction instead of controller -> host.
pub fn build_v2_report_frame(host: IpV4, group: IpV4) -> Vec<u8> {
    let igmp = build_v2(TYPE_V2_REPORT, group);

    let ip_total_len = 20 + igmp.len();
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&(ip_total_len as u16).to_be_bytes());
    ip[8] = 1; // TTL
    ip[9] = IP_PROTO_IGMP;
    ip[12..16].copy_from_slice(&host.0.to_be_bytes());
    ip[16..20].copy_from_slice(&group.0.to_be_bytes());
    let csum = igmp_checksum(&ip);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());

    let dst_mac = EthAddr::multicast_for(group);
    let mut frame = Vec::with_capacity(14 + ip.len() + igmp.len());
    frame.extend_from_slice(&dst_mac.0);
    frame.extend_from_slice(&EthAddr::ZERO.0);
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&igmp);
    frame
}

/// Assemble a bare IPv4/UDP frame (no IGMP involved) used to drive a data packet-in.
pub fn build_udp_frame(src: IpV4, dst: IpV4) -> Vec<u8> {
    const IP_PROTO_UDP: u8 = 17;
    let udp_len = 8;
    let ip_total_len = 20 + udp_len;
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&(ip_total_len as u16).to_be_bytes());
    ip[8] = 1;
    ip[9] = IP_PROTO_UDP;
    ip[12..16].copy_from_slice(&src.0.to_be_bytes());
    ip[16..20].copy_from_slice(&dst.0.to_be_bytes());

    let dst_mac = EthAddr::multicast_for(dst);
    let mut frame = Vec::with_capacity(14 + ip.len() + udp_len);
    frame.extend_from_slice(&dst_mac.0);
    frame.extend_from_slice(&EthAddr::ZERO.0);
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&[0u8; 8]);
    frame
}

/// A small, fixed switch-link graph plus per-switch host-facing ports.
#[derive(Debug, Default)]
pub struct SimTopology {
    links: HashMap<SwitchId, HashMap<SwitchId, LinkPorts>>,
    host_ports: HashMap<SwitchId, Vec<Port>>,
}

impl SimTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bidirectional link between `a` and `b`.
    pub fn add_link(&mut self, a: SwitchId, a_port: Port, b: SwitchId, b_port: Port) {
        self.links.entry(a).or_default().insert(
            b,
            LinkPorts {
                src_port: a_port,
                dst_port: b_port,
            },
        );
        self.links.entry(b).or_default().insert(
            a,
            LinkPorts {
                src_port: b_port,
                dst_port: a_port,
            },
        );
    }

    /// Mark `port` on `sw` as host-facing (external).
    pub fn add_host_port(&mut self, sw: SwitchId, port: Port) {
        self.host_ports.entry(sw).or_default().push(port);
        self.links.entry(sw).or_default();
    }
}

impl Topology for SimTopology {
    fn ports_of(&self, sw: SwitchId) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .links
            .get(&sw)
            .map(|links| links.values().map(|l| l.src_port).collect())
            .unwrap_or_default();
        ports.extend(self.host_ports.get(&sw).into_iter().flatten().copied());
        ports
    }

    fn is_internal(&self, sw: SwitchId, port: Port) -> bool {
        self.links
            .get(&sw)
            .map(|links| links.values().any(|l| l.src_port == port))
            .unwrap_or(false)
    }

    fn datapaths(&self) -> Vec<SwitchId> {
        self.links.keys().copied().collect()
    }

    fn out_links(&self, sw: SwitchId) -> Vec<(SwitchId, LinkPorts)> {
        self.links
            .get(&sw)
            .map(|links| links.iter().map(|(dst, ports)| (*dst, *ports)).collect())
            .unwrap_or_default()
    }
}

/// Precomputed all-pairs shortest paths over a [`SimTopology`], one hop of
/// [`CompositeWeight::UNIT`] apiece. Good enough for a demo fabric; a production
/// `UnicastRouting` would consult a live link-state database instead (§1 Non-goals).
#[derive(Debug, Default)]
pub struct SimUnicast {
    paths: HashMap<(SwitchId, SwitchId), UnicastPath>,
}

impl SimUnicast {
    pub fn from_topology(topo: &SimTopology) -> Self {
        let mut paths = HashMap::new();
        let nodes = topo.datapaths();
        for &src in &nodes {
            for &dst in &nodes {
                if src == dst {
                    continue;
                }
                if let Some(path) = bfs_path(topo, src, dst) {
                    paths.insert((src, dst), path);
                }
            }
        }
        Self { paths }
    }
}

impl UnicastRouting for SimUnicast {
    fn route(&self, src: SwitchId, dst: SwitchId) -> Option<UnicastPath> {
        self.paths.get(&(src, dst)).cloned()
    }
}

fn bfs_path(topo: &SimTopology, src: SwitchId, dst: SwitchId) -> Option<UnicastPath> {
    let mut prev: HashMap<SwitchId, (SwitchId, LinkPorts)> = HashMap::new();
    let mut visited: HashSet<SwitchId> = HashSet::from([src]);
    let mut queue = VecDeque::from([src]);

    while let Some(cur) = queue.pop_front() {
        if cur == dst {
            break;
        }
        for (next, ports) in topo.out_links(cur) {
            if visited.insert(next) {
                prev.insert(next, (cur, ports));
                queue.push_back(next);
            }
        }
    }
    if !visited.contains(&dst) || src == dst {
        return None;
    }

    let mut hops_rev = Vec::new();
    let mut cur = dst;
    while cur != src {
        let (parent, ports) = prev[&cur];
        hops_rev.push(Hop {
            dst: cur,
            in_port: ports.dst_port,
            out_port: ports.src_port,
            weight: CompositeWeight::UNIT,
        });
        cur = parent;
    }
    hops_rev.reverse();
    let weight = hops_rev.iter().fold(CompositeWeight::ZERO, |acc, h| acc + h.weight);
    Some(UnicastPath { path: hops_rev, weight })
}

/// One flow-mod the fabric received, retained for inspection after a demo run.
#[derive(Debug, Clone)]
pub struct FlowInstall {
    pub switch: SwitchId,
    pub matching: FlowMatch,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub command: FlowCommand,
}

/// Logs every flow-mod and packet-out as simulated network activity, and keeps the
/// flow-mods around for a demo summary.
#[derive(Debug, Default)]
pub struct SimTransport {
    pub installed: Vec<FlowInstall>,
}

impl FlowTransport for SimTransport {
    fn install_flow(
        &mut self,
        sw: SwitchId,
        m: FlowMatch,
        actions: Vec<Action>,
        cookie: u64,
        command: FlowCommand,
        idle: Duration,
        hard: Duration,
        flags: FlowFlags,
    ) {
        info!(
            "flow-mod {command:?} on {sw} cookie={cookie} match={m:?} actions={actions:?} \
             idle={idle:?} hard={hard:?} flags={flags:?}"
        );
        self.installed.push(FlowInstall {
            switch: sw,
            matching: m,
            actions,
            cookie,
            command,
        });
    }

    fn send_packet(&mut self, sw: SwitchId, payload: Vec<u8>, in_port: Port, out_port: Port) {
        debug!("packet-out on {sw}: {in_port} -> {out_port} ({} bytes)", payload.len());
    }

    fn send_buffered(&mut self, sw: SwitchId, buffer_id: u32, out_port: Port) {
        debug!("buffered packet-out on {sw}: buffer {buffer_id} -> {out_port}");
    }
}

/// A minimal discrete-event timer wheel: a binary heap ordered by fire time, callbacks
/// held separately so cancellation is a plain map removal (§5 "cancel is idempotent").
#[derive(Default)]
pub struct SimTimers {
    now: Duration,
    next_seq: u64,
    next_handle: u64,
    queue: BinaryHeap<std::cmp::Reverse<(Duration, u64, TimerHandle)>>,
    callbacks: HashMap<TimerHandle, TimerCallback>,
}

impl SimTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Run every callback scheduled at or before `deadline`, advancing the virtual clock
    /// as each one fires. Bounds the demo run: general queries keep re-arming
    /// themselves forever, so without a deadline this would never return.
    pub fn run_until(&mut self, deadline: Duration) -> u32 {
        let mut fired = 0;
        while let Some(std::cmp::Reverse((at, _, _))) = self.queue.peek() {
            if *at > deadline {
                break;
            }
            if self.fire_next() {
                fired += 1;
            }
        }
        fired
    }

    fn fire_next(&mut self) -> bool {
        while let Some(std::cmp::Reverse((at, _, handle))) = self.queue.pop() {
            if let Some(cb) = self.callbacks.remove(&handle) {
                self.now = at;
                cb();
                return true;
            }
        }
        false
    }
}

impl TimerService for SimTimers {
    fn post_at(&mut self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(std::cmp::Reverse((self.now + delay, seq, handle)));
        self.callbacks.insert(handle, callback);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.callbacks.remove(&handle);
    }
}

impl std::fmt::Debug for SimTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimTimers")
            .field("now", &self.now)
            .field("pending", &self.callbacks.len())
            .finish()
    }
}

/// Builds the demo fabric: `sw1 -- sw2 -- sw3` with `sw2` also reaching `sw4`, a source
/// host on `sw1` and two receivers on `sw3`/`sw4`.
pub fn demo_topology() -> SimTopology {
    let mut topo = SimTopology::new();
    topo.add_link(SwitchId(1), Port(1), SwitchId(2), Port(1));
    topo.add_link(SwitchId(2), Port(2), SwitchId(3), Port(1));
    topo.add_link(SwitchId(2), Port(3), SwitchId(4), Port(1));
    topo.add_host_port(SwitchId(1), Port(10));
    topo.add_host_port(SwitchId(3), Port(10));
    topo.add_host_port(SwitchId(4), Port(10));
    topo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bfs_finds_multi_hop_path() {
        let topo = demo_topology();
        let unicast = SimUnicast::from_topology(&topo);
        let path = unicast.route(SwitchId(1), SwitchId(4)).unwrap();
        assert_eq!(path.path.len(), 2);
        assert_eq!(path.path.last().unwrap().dst, SwitchId(4));
    }

    #[test]
    fn unreachable_pair_has_no_path() {
        let topo = SimTopology::new();
        let unicast = SimUnicast::from_topology(&topo);
        assert!(unicast.route(SwitchId(1), SwitchId(2)).is_none());
    }

    #[test]
    fn timers_fire_in_time_order() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut timers = SimTimers::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = order.clone();
        timers.post_at(Duration::from_secs(5), Box::new(move || o1.borrow_mut().push(5)));
        let o2 = order.clone();
        timers.post_at(Duration::from_secs(1), Box::new(move || o2.borrow_mut().push(1)));
        timers.run_until(Duration::from_secs(10));
        assert_eq!(*order.borrow(), vec![1, 5]);
    }

    #[test]
    fn canceled_timer_does_not_fire() {
        let mut timers = SimTimers::new();
        let handle = timers.post_at(Duration::from_secs(1), Box::new(|| panic!("should not fire")));
        timers.cancel(handle);
        assert_eq!(timers.run_until(Duration::from_secs(10)), 0);
    }

    #[test]
    fn report_frame_roundtrips_through_group_manager_parsing() {
        use crate::group_manager::packet::igmp_payload;
        use mcnet::igmp::{parse, IgmpMessage};

        let frame = build_v2_report_frame(IpV4::new(10, 0, 0, 5), IpV4::new(224, 1, 1, 1));
        let payload = igmp_payload(&frame).unwrap();
        match parse(payload).unwrap() {
            IgmpMessage::V2Report { group } => assert_eq!(group, IpV4::new(224, 1, 1, 1)),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
