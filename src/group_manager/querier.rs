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

//! Non-querier election (RFC 3376 §6.6.1), supplementing the distilled spec per
//! `SPEC_FULL.md` §4 C5: a query seen from a router with a lower IP than us on the same
//! port means we are not the querier for that segment, and we suppress our own general
//! queries for `other_querier_present_interval` (`ROBUSTNESS * QUERY + QUERY_RESP / 2`,
//! the RFC 3376 default).

use std::collections::HashMap;
use std::time::Duration;

use mcnet::interfaces::TimerHandle;
use mcnet::types::{IpV4, Port, SwitchId};

/// Per-port record of a competing querier, if any is currently suppressing us.
#[derive(Debug, Default)]
pub struct QuerierState {
    suppressed: HashMap<(SwitchId, Port), (IpV4, TimerHandle)>,
}

impl QuerierState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `other_querier_present_interval`: RFC 3376 §8.5 default.
    pub fn other_querier_present_interval(robustness: u8, query_interval: Duration, query_resp: Duration) -> Duration {
        query_interval * robustness as u32 + query_resp / 2
    }

    /// `true` if our own general-query timer should be suppressed on this port.
    pub fn is_suppressed(&self, switch: SwitchId, port: Port) -> bool {
        self.suppressed.contains_key(&(switch, port))
    }

    /// Record that a query was seen from `from`, a lower IP than ours, suppressing our
    /// own queries until `timer` fires. Replaces (and the caller must cancel) any
    /// previously pending suppression timer for this port.
    pub fn suppress(&mut self, switch: SwitchId, port: Port, from: IpV4, timer: TimerHandle) -> Option<TimerHandle> {
        self.suppressed
            .insert((switch, port), (from, timer))
            .map(|(_, old)| old)
    }

    /// The suppression timer fired (or the port went away): clear the suppression.
    pub fn clear(&mut self, switch: SwitchId, port: Port) -> Option<TimerHandle> {
        self.suppressed.remove(&(switch, port)).map(|(_, t)| t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_interval_matches_rfc_default() {
        let d = QuerierState::other_querier_present_interval(2, Duration::from_secs(125), Duration::from_secs(10));
        assert_eq!(d, Duration::from_secs(255));
    }

    #[test]
    fn suppress_then_clear_round_trips() {
        let mut qs = QuerierState::new();
        let sw = SwitchId(1);
        let port = Port(3);
        assert!(!qs.is_suppressed(sw, port));
        qs.suppress(sw, port, IpV4::new(10, 0, 0, 1), TimerHandle(1));
        assert!(qs.is_suppressed(sw, port));
        qs.clear(sw, port);
        assert!(!qs.is_suppressed(sw, port));
    }
}
