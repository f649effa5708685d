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

//! Runtime wiring (§5): owns the three stateful components (group manager, routing
//! engine, installer) plus the host-location tracker, and threads one external event at
//! a time through all of them in the order §4 describes report processing — group
//! manager first, then the routing engine, then the installer.
//!
//! `Topology`/`UnicastRouting`/`FlowTransport`/`TimerService` are never stored here: per
//! §1's scope note they are the surrounding plug-in container's job, so every entry
//! point takes them as generic parameters rather than owning a concrete implementation.
//! [`sim`] supplies in-memory implementations for demonstration and the binary's smoke
//! run.

pub mod sim;

use mcnet::event::{GroupEvent, LinkWeightChanged};
use mcnet::interfaces::{FlowRemoved, FlowTransport, LinkPorts, PacketIn, TimerService, Topology, UnicastRouting};
use mcnet::linkweight::{ByteCounters, LinkWeightConfig, LinkWeightSampler};
use mcnet::routing::RoutingEngine;
use mcnet::types::{IpV4, Port, SwitchId};

use crate::config::Config;
use crate::error::NetworkError;
use crate::group_manager::GroupManager;
use crate::host_locator::TrackedHosts;
use crate::installer::Installer;

/// The wired-together controller: component C5 + C6 + C7 + C3, behind one API.
#[derive(Debug)]
pub struct Controller {
    cfg: Config,
    pub group_manager: GroupManager,
    pub routing: RoutingEngine,
    pub installer: Installer,
    pub hosts: TrackedHosts,
    pub link_weights: LinkWeightSampler,
}

impl Controller {
    pub fn new(cfg: Config) -> Self {
        let hosts = TrackedHosts::new(cfg.host_binding_default, cfg.host_timeout);
        let link_cfg = LinkWeightConfig {
            interval: cfg.link_weight_interval,
            alpha: cfg.link_weight_alpha,
            parts: cfg.link_weight_parts,
            ..LinkWeightConfig::default()
        };
        Self {
            cfg,
            group_manager: GroupManager::new(cfg),
            routing: RoutingEngine::new(),
            installer: Installer::new(),
            hosts,
            link_weights: LinkWeightSampler::new(link_cfg),
        }
    }

    /// `DatapathJoined` (§4.5): arm general-query timers for every external port.
    pub fn on_datapath_joined<T: Topology, S: TimerService>(&mut self, sw: SwitchId, topo: &T, timers: &mut S) {
        self.group_manager.on_datapath_joined(sw, topo, timers);
    }

    /// A host sighting, typically from a data packet-in's source address (§3, §4.6).
    pub fn on_host_seen<S: TimerService>(&mut self, ip: IpV4, sw: SwitchId, port: Port, timers: &mut S) {
        self.hosts.record_seen(ip, sw, port, timers);
    }

    /// An IGMP control frame arrived: feed it through the group manager and fan any
    /// resulting `GroupEvent`s out through the routing engine and installer.
    pub fn on_igmp_frame<U, S, F>(
        &mut self,
        sw: SwitchId,
        port: Port,
        frame: &[u8],
        unicast: &U,
        timers: &mut S,
        transport: &mut F,
    ) where
        U: UnicastRouting,
        S: TimerService,
        F: FlowTransport,
    {
        let events = self.group_manager.on_report(sw, port, frame, timers, transport);
        self.apply_group_events(events, unicast, transport);
    }

    /// A data packet-in (§4.7): forward on an existing route, install a fresh one, or
    /// fall back to a blocking rule.
    pub fn on_packet_in<U: UnicastRouting, F: FlowTransport>(
        &mut self,
        pkt: &PacketIn,
        unicast: &U,
        transport: &mut F,
    ) -> Result<(), NetworkError> {
        self.installer
            .on_packet_in(pkt, &self.routing, unicast, &self.hosts, &self.cfg, transport)
            .map_err(NetworkError::from)
    }

    pub fn on_flow_removed(&mut self, ev: &FlowRemoved) {
        self.installer.on_flow_removed(ev);
    }

    /// `LinkAdded` (§4.2): seed the sampler's stored ratio and reconcile as if the
    /// resulting `LinkWeightChanged` (`old=ZERO`) had fired.
    pub fn on_link_added<U: UnicastRouting, F: FlowTransport>(
        &mut self,
        src: SwitchId,
        dst: SwitchId,
        ports: LinkPorts,
        unicast: &U,
        transport: &mut F,
    ) {
        let ev = self.link_weights.link_added(src, dst, ports);
        self.apply_link_weight_changed(&ev, unicast, transport);
    }

    /// `LinkRemoved` (§4.2): drop the sampler's stored ratio and reconcile as if the
    /// resulting `LinkWeightChanged` (`new=ZERO`) had fired.
    pub fn on_link_removed<U: UnicastRouting, F: FlowTransport>(
        &mut self,
        src: SwitchId,
        dst: SwitchId,
        ports: LinkPorts,
        unicast: &U,
        transport: &mut F,
    ) {
        if let Some(ev) = self.link_weights.link_removed(src, dst, ports) {
            self.apply_link_weight_changed(&ev, unicast, transport);
        }
    }

    /// One round-robin sampling tick (§4.2): `sample` reads the transport's per-port
    /// byte counters for whichever link the sampler is about to visit.
    pub fn on_link_sample<U: UnicastRouting, F: FlowTransport>(
        &mut self,
        sample: impl FnOnce(SwitchId, SwitchId, LinkPorts) -> (ByteCounters, ByteCounters),
        unicast: &U,
        transport: &mut F,
    ) {
        if let Some(ev) = self.link_weights.tick(sample) {
            self.apply_link_weight_changed(&ev, unicast, transport);
        }
    }

    fn apply_link_weight_changed<U: UnicastRouting, F: FlowTransport>(
        &mut self,
        ev: &LinkWeightChanged,
        unicast: &U,
        transport: &mut F,
    ) {
        let touched = self.routing.handle_link_weight_changed(ev, unicast);
        self.installer
            .on_group_event(&touched, &self.routing, unicast, &self.hosts, &self.cfg, transport);
    }

    /// Drain every timer fired since the last call (general queries, group/source
    /// timers, non-querier suppression, host-location expiry) and fan the resulting
    /// events out exactly as [`Controller::on_igmp_frame`] does.
    pub fn dispatch_timers<T, U, S, F>(&mut self, topo: &T, unicast: &U, timers: &mut S, transport: &mut F)
    where
        T: Topology,
        U: UnicastRouting,
        S: TimerService,
        F: FlowTransport,
    {
        let events = self.group_manager.dispatch_timers(topo, timers, transport);
        self.apply_group_events(events, unicast, transport);
        // host-location expiry has no routing/installer counterpart to reconcile: a
        // moved/departed host's stale shadow entry self-heals on its next packet-in
        // (§4.6/§4.7 "the delivered tree ... looked up from the host-IP tracker" is
        // always consulted fresh at install time, never cached across a host move).
        self.hosts.dispatch_expiry(timers);
    }

    fn apply_group_events<U: UnicastRouting, F: FlowTransport>(
        &mut self,
        events: Vec<GroupEvent>,
        unicast: &U,
        transport: &mut F,
    ) {
        for ev in events {
            let touched = self.routing.handle_group_event(ev, unicast);
            self.installer
                .on_group_event(&touched, &self.routing, unicast, &self.hosts, &self.cfg, transport);
        }
    }
}
