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

//! Route installer (component C7, §4.7): reconciles the routing engine's computed trees
//! into the fabric, reacting to data packet-ins, `GroupEvent`s and `FlowRemoved`s.
//!
//! `InstallerError::Unroutable` is the only error this module returns (§7 class 3,
//! transient unavailability): the caller's only recovery is to fall through to a
//! blocking install, never a retry.

pub mod flowmod;
pub mod shadow;

use std::collections::HashMap;
use std::time::Duration;

use log::warn;
use thiserror::Error;

use mcnet::interfaces::{
    Action, FlowCommand, FlowFlags, FlowRemoved, FlowRemovedReason, FlowTransport, PacketIn,
    UnicastRouting,
};
use mcnet::routing::{RoutingEngine, SourceLocator};
use mcnet::types::{IpV4, Port, SwitchId};

use crate::config::Config;
use crate::installer::flowmod::{flow_match, flow_match_for_delete, parse_ipv4_udp, plan_install};
use crate::installer::shadow::{FlowKey, RoutedEntry, ShadowTables};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstallerError {
    /// The routing engine reported a tree for `(group, src)` but either the metric
    /// closure could not be completed, or the source's switch/port is unknown to the
    /// host tracker (§4.6 "no tree" / §7 class 3).
    #[error("no route available for group {group} from source {src}")]
    Unroutable { group: IpV4, src: IpV4 },
}

/// Locates where a host IP is currently attached, switch *and* port (§3 `HostLocation`).
/// A supertrait of [`SourceLocator`] so the same implementation satisfies both the
/// routing engine (which only needs the switch, to attach the source to a tree) and the
/// installer (which additionally needs the port, to build the ingress rule's `in_port`
/// match).
pub trait HostLocator: SourceLocator {
    fn locate_port(&self, src: IpV4) -> Option<Port>;
}

/// Route installer (§3, §4.7): owns the flow-table shadow and turns routing-engine trees
/// into `FlowMod`s.
#[derive(Debug, Default)]
pub struct Installer {
    shadow: ShadowTables,
}

impl Installer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shadow(&self) -> &ShadowTables {
        &self.shadow
    }

    /// Data packet-in handler (§4.7): IPv4/UDP traffic with a multicast destination and
    /// unicast source. IGMP control traffic never reaches here — it is fed to
    /// `GroupManager::on_report` directly by the caller.
    pub fn on_packet_in<U, L, F>(
        &mut self,
        pkt: &PacketIn,
        engine: &RoutingEngine,
        unicast: &U,
        locator: &L,
        cfg: &Config,
        transport: &mut F,
    ) -> Result<(), InstallerError>
    where
        U: UnicastRouting,
        L: HostLocator,
        F: FlowTransport,
    {
        let Some((nw_src, nw_dst)) = parse_ipv4_udp(&pkt.payload) else {
            warn!("packet-in on {} is not an IPv4/UDP frame", pkt.switch);
            return Ok(());
        };
        if !nw_dst.is_multicast() || nw_src.is_multicast() {
            warn!(
                "dropping packet-in on {}: {} -> {} is not unicast-src/multicast-dst",
                pkt.switch, nw_src, nw_dst
            );
            return Ok(());
        }

        let key: FlowKey = (nw_dst, Some(nw_src));
        if let Some(entry) = self.shadow.routed(key) {
            if let Some(actions) = entry.per_switch_actions.get(&pkt.switch).cloned() {
                self.forward(pkt, &actions, transport);
                return Ok(());
            }
        }

        if engine.has_tree(nw_dst, nw_src) {
            self.install_route(nw_dst, nw_src, engine, unicast, locator, cfg, transport)
        } else {
            self.install_block(nw_dst, nw_src, pkt.switch, pkt.in_port, cfg, transport);
            Ok(())
        }
    }

    /// Forward a packet the fabric already has pre-computed actions for, consuming the
    /// switch's buffer if the packet-in carried one (§4.7, §9 "buffer-aware variant").
    fn forward<F: FlowTransport>(&self, pkt: &PacketIn, actions: &[Action], transport: &mut F) {
        for Action::Output(port) in actions {
            match pkt.buffer_id {
                Some(buffer_id) => transport.send_buffered(pkt.switch, buffer_id, *port),
                None => transport.send_packet(pkt.switch, pkt.payload.clone(), pkt.in_port, *port),
            }
        }
    }

    /// Group-event handler (§4.6, §4.7): `touched` is the `(group, src)` set the routing
    /// engine reports as possibly affected. A `src=None` entry means the shared `(*, G)`
    /// tree changed; that has no shadow entry of its own; it is fanned out to every
    /// source currently routed or blocked for that group, since shared-destination
    /// changes affect their delivered tree too.
    pub fn on_group_event<U, L, F>(
        &mut self,
        touched: &[(IpV4, Option<IpV4>)],
        engine: &RoutingEngine,
        unicast: &U,
        locator: &L,
        cfg: &Config,
        transport: &mut F,
    ) where
        U: UnicastRouting,
        L: HostLocator,
        F: FlowTransport,
    {
        let mut pairs: Vec<(IpV4, IpV4)> = Vec::new();
        for &(group, src) in touched {
            match src {
                Some(s) => pairs.push((group, s)),
                None => {
                    pairs.extend(self.shadow.routed_sources(group).into_iter().map(|s| (group, s)));
                    pairs.extend(self.shadow.blocked_sources(group).into_iter().map(|s| (group, s)));
                }
            }
        }
        pairs.sort_by_key(|&(g, s)| (g.0, s.0));
        pairs.dedup();

        for (group, src) in pairs {
            if engine.has_tree(group, src) {
                if self
                    .install_route(group, src, engine, unicast, locator, cfg, transport)
                    .is_err()
                {
                    // the engine thought a tree existed but the metric closure could not
                    // be completed by the time we replanned (§7 class 3): fall back to
                    // "no route", i.e. drop the stale routed entry if any.
                    self.remove_route(group, src, transport);
                }
            } else {
                self.remove_route(group, src, transport);
            }
        }
    }

    /// `FlowRemoved` handler (§4.7): a blocking rule's hard-timeout, or a routing rule's
    /// idle-timeout/delete, are the only legal reasons; anything else is logged but the
    /// shadow entry is still reconciled since the rule really did leave the datapath.
    pub fn on_flow_removed(&mut self, ev: &FlowRemoved) {
        if let Some(key) = self.shadow.find_blocked_by_cookie(ev.switch, ev.cookie) {
            if ev.reason != FlowRemovedReason::HardTimeout {
                warn!(
                    "blocking rule at {} cookie {} removed for unexpected reason {:?}",
                    ev.switch, ev.cookie, ev.reason
                );
            }
            self.shadow.remove_blocked(key);
            return;
        }
        if let Some(key) = self.shadow.find_routed_by_cookie(ev.switch, ev.cookie) {
            if !matches!(ev.reason, FlowRemovedReason::IdleTimeout | FlowRemovedReason::Delete) {
                warn!(
                    "routed rule at {} cookie {} removed for unexpected reason {:?}",
                    ev.switch, ev.cookie, ev.reason
                );
            }
            self.shadow.remove_routed(key);
            return;
        }
        warn!("flow-removed at {} cookie {} matches no shadow entry", ev.switch, ev.cookie);
    }

    /// (Re-)plan and install a tree for `(group, src)`, diffing against the previous
    /// shadow entry so only switches whose action set actually changed get a fresh
    /// `FLOW_MOD` (§8 scenario 6).
    fn install_route<U, L, F>(
        &mut self,
        group: IpV4,
        src: IpV4,
        engine: &RoutingEngine,
        unicast: &U,
        locator: &L,
        cfg: &Config,
        transport: &mut F,
    ) -> Result<(), InstallerError>
    where
        U: UnicastRouting,
        L: HostLocator,
        F: FlowTransport,
    {
        let key: FlowKey = (group, Some(src));
        let tree = engine
            .get_tree_path(src, group, unicast, locator)
            .ok_or(InstallerError::Unroutable { group, src })?;
        let root = locator.locate(src).ok_or(InstallerError::Unroutable { group, src })?;
        let root_port = locator
            .locate_port(src)
            .ok_or(InstallerError::Unroutable { group, src })?;

        let dest_ports = engine.dest_ports(group, src);
        let plan = plan_install(&tree, root, root_port, &dest_ports);

        self.shadow.remove_blocked(key);

        let (cookie, is_add) = self.shadow.next_cookie(key, root);
        let old_actions: HashMap<SwitchId, Vec<Action>> = if is_add {
            HashMap::new()
        } else {
            self.shadow
                .routed(key)
                .map(|e| e.per_switch_actions.clone())
                .unwrap_or_default()
        };

        let mut new_actions: HashMap<SwitchId, Vec<Action>> = HashMap::new();
        for step in &plan {
            new_actions.insert(step.switch, step.actions.clone());
        }

        for &sw in old_actions.keys() {
            if !new_actions.contains_key(&sw) {
                transport.install_flow(
                    sw,
                    flow_match_for_delete(src, group),
                    Vec::new(),
                    cookie,
                    FlowCommand::Delete,
                    Duration::ZERO,
                    Duration::ZERO,
                    FlowFlags::NONE,
                );
            }
        }

        for step in &plan {
            let command = if is_add {
                FlowCommand::Add
            } else if old_actions.get(&step.switch) == Some(&step.actions) {
                continue;
            } else if old_actions.contains_key(&step.switch) {
                FlowCommand::Modify
            } else {
                FlowCommand::Add
            };
            let flags = if step.is_root {
                FlowFlags::SEND_FLOW_REM
            } else {
                FlowFlags::NONE
            };
            transport.install_flow(
                step.switch,
                flow_match(step.in_port, src, group),
                step.actions.clone(),
                cookie,
                command,
                cfg.default_flow_idle,
                cfg.default_flow_hard,
                flags,
            );
        }

        self.shadow.insert_routed(
            key,
            RoutedEntry {
                root_switch: root,
                cookie,
                per_switch_actions: new_actions,
            },
        );
        Ok(())
    }

    /// Install a blocking drop rule on the ingress switch (§4.7): cookie from the
    /// block-cookie space (distinct from routed cookies, §9 design note — several
    /// blocked `(group, src)` pairs can share an ingress switch and must stay
    /// distinguishable by cookie alone when their `FlowRemoved` arrives), hard-timeout
    /// only so repeated data frames stop punting to the controller without ever being
    /// idled out early by the very traffic it exists to suppress.
    fn install_block<F: FlowTransport>(
        &mut self,
        group: IpV4,
        src: IpV4,
        switch: SwitchId,
        in_port: Port,
        cfg: &Config,
        transport: &mut F,
    ) {
        let key: FlowKey = (group, Some(src));
        if self.shadow.is_blocked(key) {
            return;
        }
        let cookie = self.shadow.next_block_cookie();
        transport.install_flow(
            switch,
            flow_match(in_port, src, group),
            Vec::new(),
            cookie,
            FlowCommand::Add,
            Duration::ZERO,
            cfg.default_flow_hard,
            FlowFlags::SEND_FLOW_REM,
        );
        self.shadow.insert_blocked(key, switch, cookie);
    }

    /// Tear down a routed `(group, src)` that the engine no longer has any destination
    /// for: delete every switch's flow-mod and drop the shadow entry.
    fn remove_route<F: FlowTransport>(&mut self, group: IpV4, src: IpV4, transport: &mut F) {
        let key: FlowKey = (group, Some(src));
        let Some(entry) = self.shadow.remove_routed(key) else {
            return;
        };
        for &sw in entry.per_switch_actions.keys() {
            transport.install_flow(
                sw,
                flow_match_for_delete(src, group),
                Vec::new(),
                entry.cookie,
                FlowCommand::Delete,
                Duration::ZERO,
                Duration::ZERO,
                FlowFlags::NONE,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcnet::interfaces::{FlowMatch, Hop, UnicastPath};
    use mcnet::weight::CompositeWeight;
    use std::collections::HashMap as StdHashMap;

    #[derive(Default)]
    struct FakeTransport {
        installs: Vec<(SwitchId, FlowMatch, Vec<Action>, u64, FlowCommand, FlowFlags)>,
        sent: Vec<(SwitchId, Port)>,
    }
    impl FlowTransport for FakeTransport {
        fn install_flow(
            &mut self,
            sw: SwitchId,
            m: FlowMatch,
            actions: Vec<Action>,
            cookie: u64,
            command: FlowCommand,
            _idle: Duration,
            _hard: Duration,
            flags: FlowFlags,
        ) {
            self.installs.push((sw, m, actions, cookie, command, flags));
        }
        fn send_packet(&mut self, sw: SwitchId, _payload: Vec<u8>, _in_port: Port, out_port: Port) {
            self.sent.push((sw, out_port));
        }
        fn send_buffered(&mut self, sw: SwitchId, _buffer_id: u32, out_port: Port) {
            self.sent.push((sw, out_port));
        }
    }

    struct FakeUnicast(StdHashMap<(SwitchId, SwitchId), UnicastPath>);
    impl UnicastRouting for FakeUnicast {
        fn route(&self, src: SwitchId, dst: SwitchId) -> Option<UnicastPath> {
            self.0.get(&(src, dst)).cloned()
        }
    }

    struct FakeLocator {
        switch: SwitchId,
        port: Port,
    }
    impl SourceLocator for FakeLocator {
        fn locate(&self, _src: IpV4) -> Option<SwitchId> {
            Some(self.switch)
        }
    }
    impl HostLocator for FakeLocator {
        fn locate_port(&self, _src: IpV4) -> Option<Port> {
            Some(self.port)
        }
    }

    fn direct(a: SwitchId, b: SwitchId, w: u64, out: u16, inp: u16) -> UnicastPath {
        UnicastPath {
            path: vec![Hop {
                dst: b,
                in_port: Port(inp),
                out_port: Port(out),
                weight: CompositeWeight::new(w),
            }],
            weight: CompositeWeight::new(w),
        }
    }

    fn frame(src: IpV4, dst: IpV4) -> Vec<u8> {
        let mut f = vec![0u8; 14 + 20 + 8];
        f[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        f[14] = 0x45;
        f[14 + 9] = 17;
        f[14 + 12..14 + 16].copy_from_slice(&src.0.to_be_bytes());
        f[14 + 16..14 + 20].copy_from_slice(&dst.0.to_be_bytes());
        f
    }

    fn two_switch_group() -> (RoutingEngine, FakeUnicast, IpV4) {
        use mcnet::event::{GroupAction, GroupEvent};
        let mut engine = RoutingEngine::new();
        let mut table = StdHashMap::new();
        table.insert((SwitchId(1), SwitchId(2)), direct(SwitchId(1), SwitchId(2), 2, 10, 20));
        table.insert((SwitchId(2), SwitchId(1)), direct(SwitchId(2), SwitchId(1), 2, 20, 10));
        let fake = FakeUnicast(table);
        let group = IpV4::new(224, 1, 1, 1);
        engine.handle_group_event(
            GroupEvent::new(group, SwitchId(2), Port(99), GroupAction::ToExclude),
            &fake,
        );
        (engine, fake, group)
    }

    #[test]
    fn packet_in_with_no_tree_installs_block() {
        let mut installer = Installer::new();
        let engine = RoutingEngine::new();
        let fake = FakeUnicast(StdHashMap::new());
        let locator = FakeLocator {
            switch: SwitchId(1),
            port: Port(5),
        };
        let cfg = Config::default();
        let mut transport = FakeTransport::default();
        let src = IpV4::new(10, 0, 0, 1);
        let group = IpV4::new(224, 1, 1, 1);
        let pkt = PacketIn {
            switch: SwitchId(1),
            in_port: Port(5),
            buffer_id: None,
            payload: frame(src, group),
        };
        installer
            .on_packet_in(&pkt, &engine, &fake, &locator, &cfg, &mut transport)
            .unwrap();
        assert_eq!(transport.installs.len(), 1);
        assert_eq!(transport.installs[0].4, FlowCommand::Add);
        assert!(installer.shadow().is_blocked((group, Some(src))));
    }

    #[test]
    fn packet_in_with_tree_installs_route_leaves_first() {
        let mut installer = Installer::new();
        let (engine, fake, group) = two_switch_group();
        let locator = FakeLocator {
            switch: SwitchId(1),
            port: Port(5),
        };
        let cfg = Config::default();
        let mut transport = FakeTransport::default();
        let src = IpV4::new(10, 0, 0, 1);
        let pkt = PacketIn {
            switch: SwitchId(1),
            in_port: Port(5),
            buffer_id: None,
            payload: frame(src, group),
        };
        installer
            .on_packet_in(&pkt, &engine, &fake, &locator, &cfg, &mut transport)
            .unwrap();
        // root (switch 1, the source's switch) installs last.
        assert_eq!(transport.installs.last().unwrap().0, SwitchId(1));
        assert!(transport.installs.last().unwrap().5.contains(FlowFlags::SEND_FLOW_REM));
        assert!(installer.shadow().routed((group, Some(src))).is_some());
    }

    #[test]
    fn second_packet_uses_cached_actions_without_reinstall() {
        let mut installer = Installer::new();
        let (engine, fake, group) = two_switch_group();
        let locator = FakeLocator {
            switch: SwitchId(1),
            port: Port(5),
        };
        let cfg = Config::default();
        let mut transport = FakeTransport::default();
        let src = IpV4::new(10, 0, 0, 1);
        let pkt = PacketIn {
            switch: SwitchId(1),
            in_port: Port(5),
            buffer_id: Some(7),
            payload: frame(src, group),
        };
        installer
            .on_packet_in(&pkt, &engine, &fake, &locator, &cfg, &mut transport)
            .unwrap();
        let installs_after_first = transport.installs.len();
        installer
            .on_packet_in(&pkt, &engine, &fake, &locator, &cfg, &mut transport)
            .unwrap();
        assert_eq!(transport.installs.len(), installs_after_first);
        assert!(!transport.sent.is_empty());
    }

    #[test]
    fn flow_removed_idle_timeout_drops_routed_entry() {
        let mut installer = Installer::new();
        let (engine, fake, group) = two_switch_group();
        let locator = FakeLocator {
            switch: SwitchId(1),
            port: Port(5),
        };
        let cfg = Config::default();
        let mut transport = FakeTransport::default();
        let src = IpV4::new(10, 0, 0, 1);
        let pkt = PacketIn {
            switch: SwitchId(1),
            in_port: Port(5),
            buffer_id: None,
            payload: frame(src, group),
        };
        installer
            .on_packet_in(&pkt, &engine, &fake, &locator, &cfg, &mut transport)
            .unwrap();
        let cookie = installer.shadow().routed((group, Some(src))).unwrap().cookie;
        installer.on_flow_removed(&FlowRemoved {
            switch: SwitchId(1),
            cookie,
            reason: FlowRemovedReason::IdleTimeout,
        });
        assert!(installer.shadow().routed((group, Some(src))).is_none());
    }

    #[test]
    fn flow_removed_hard_timeout_drops_blocked_entry() {
        let mut installer = Installer::new();
        let engine = RoutingEngine::new();
        let fake = FakeUnicast(StdHashMap::new());
        let locator = FakeLocator {
            switch: SwitchId(1),
            port: Port(5),
        };
        let cfg = Config::default();
        let mut transport = FakeTransport::default();
        let src = IpV4::new(10, 0, 0, 9);
        let group = IpV4::new(224, 1, 1, 9);
        let pkt = PacketIn {
            switch: SwitchId(1),
            in_port: Port(5),
            buffer_id: None,
            payload: frame(src, group),
        };
        installer
            .on_packet_in(&pkt, &engine, &fake, &locator, &cfg, &mut transport)
            .unwrap();
        let cookie = transport.installs[0].3;
        installer.on_flow_removed(&FlowRemoved {
            switch: SwitchId(1),
            cookie,
            reason: FlowRemovedReason::HardTimeout,
        });
        assert!(!installer.shadow().is_blocked((group, Some(src))));
    }

    #[test]
    fn group_event_with_shared_only_touch_reconciles_routed_sources() {
        let mut installer = Installer::new();
        let (mut engine, fake, group) = two_switch_group();
        let locator = FakeLocator {
            switch: SwitchId(1),
            port: Port(5),
        };
        let cfg = Config::default();
        let mut transport = FakeTransport::default();
        let src = IpV4::new(10, 0, 0, 1);
        let pkt = PacketIn {
            switch: SwitchId(1),
            in_port: Port(5),
            buffer_id: None,
            payload: frame(src, group),
        };
        installer
            .on_packet_in(&pkt, &engine, &fake, &locator, &cfg, &mut transport)
            .unwrap();
        assert!(installer.shadow().routed((group, Some(src))).is_some());

        use mcnet::event::{GroupAction, GroupEvent};
        let touched = engine.handle_group_event(
            GroupEvent::new(group, SwitchId(2), Port(99), GroupAction::ToInclude),
            &fake,
        );
        installer.on_group_event(&touched, &engine, &fake, &locator, &cfg, &mut transport);
        assert!(installer.shadow().routed((group, Some(src))).is_none());
    }
}
