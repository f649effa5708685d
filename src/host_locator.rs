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

//! Adapts the bounded host-IP location tracker (component C3, `mcnet::host_tracker`) to
//! the two read-only locator seams the routing engine (C6) and the route installer (C7)
//! each consume (§3, §4.6, §4.7): the engine only needs the switch a source is attached
//! to, the installer additionally needs the port for the ingress match.

use std::time::{Duration, Instant};

use mcnet::event::HostLocationChanged;
use mcnet::host_tracker::{FlatBindingLimit, HostIpTracker};
use mcnet::interfaces::TimerService;
use mcnet::routing::SourceLocator;
use mcnet::types::{IpV4, Port, SwitchId};

use crate::installer::HostLocator;

/// Owns the host-location tracker and exposes it to the routing engine and installer
/// without either needing to know it is backed by a bounded, timer-expiring structure.
#[derive(Debug)]
pub struct TrackedHosts {
    tracker: HostIpTracker<FlatBindingLimit>,
}

impl TrackedHosts {
    pub fn new(binding_limit: u8, timeout: Duration) -> Self {
        Self {
            tracker: HostIpTracker::new(FlatBindingLimit(binding_limit as usize), timeout),
        }
    }

    /// Record a sighting of `ip` at `(switch, port)`, stamped with the current time.
    pub fn record_seen(
        &mut self,
        ip: IpV4,
        switch: SwitchId,
        port: Port,
        timers: &mut impl TimerService,
    ) -> Option<HostLocationChanged> {
        self.tracker.record_location(ip, switch, port, Instant::now(), timers)
    }

    pub fn remove_seen(&mut self, ip: IpV4, switch: SwitchId, port: Port) -> Option<HostLocationChanged> {
        self.tracker.remove_location(ip, switch, port)
    }

    /// Evict whatever has aged out, if the tracker's expiry timer fired since the last
    /// call (§4.6 "host timeout"). Called once per tick alongside the group manager's
    /// own timer dispatch.
    pub fn dispatch_expiry(&mut self, timers: &mut impl TimerService) -> Vec<HostLocationChanged> {
        self.tracker.dispatch_expiry(Instant::now(), timers)
    }
}

impl SourceLocator for TrackedHosts {
    fn locate(&self, src: IpV4) -> Option<SwitchId> {
        self.tracker.latest_location(src).map(|l| l.switch)
    }
}

impl HostLocator for TrackedHosts {
    fn locate_port(&self, src: IpV4) -> Option<Port> {
        self.tracker.latest_location(src).map(|l| l.port)
    }
}
