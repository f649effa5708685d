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

//! Per-`(switch, port, group)` IGMP router state (§3, §4.5).

use std::collections::{HashMap, HashSet};

use mcnet::interfaces::TimerHandle;
use mcnet::types::{IpV4, Port, SwitchId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterMode {
    Include,
    Exclude,
}

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::Include
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompatMode {
    V1,
    V2,
    V3,
}

impl Default for CompatMode {
    /// A freshly created record starts at the newest compatibility mode; it is only ever
    /// lowered by a legacy report (§4.5).
    fn default() -> Self {
        CompatMode::V3
    }
}

/// `(switch, port, group)` — one record per edge port the group has activity on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub switch: SwitchId,
    pub port: Port,
    pub group: IpV4,
}

/// A running burst of up to `LAST_MEMBER_QUERY_COUNT` queries spaced `LAST_MEMBER_QUERY`
/// apart (§4.5). `sources` is empty for a pure group-specific query (`Q(G)`); for a
/// group-and-source-specific query (`Q(G, S)`) it snapshots each queried source's
/// per-source timer handle at arm time, so the final tick can tell a source that was
/// refreshed by a fresh report (its timer handle changed) from one that was not.
#[derive(Debug, Default)]
pub struct QueryBurst {
    pub timer: Option<TimerHandle>,
    pub remaining: u32,
    pub sources: HashMap<IpV4, TimerHandle>,
}

impl QueryBurst {
    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }
}

/// IGMP router state for one `(switch, port, group)` (§3).
#[derive(Debug, Default)]
pub struct GroupRecord {
    pub filter: FilterMode,
    pub compat: CompatMode,
    /// Filter-mode revert timer (the data model's three `groupMemberTimers` collapsed
    /// into one: at most one is ever active regardless of `compat`, since they drive the
    /// same EXCLUDE-\>INCLUDE transition and differ only in which legacy report lowered
    /// `compat`).
    pub gm_timer: Option<TimerHandle>,
    /// `v1→v2→v3` auto-upgrade timer (§4.5): re-armed each time a legacy report lowers
    /// `compat`, distinct from `gm_timer`.
    pub compat_upgrade_timer: Option<TimerHandle>,
    /// Group-specific query burst (`Q(G)`).
    pub gs_query: QueryBurst,
    /// Group-and-source-specific query burst (`Q(G, S)`).
    pub gss_query: QueryBurst,
    /// Active sources, each with its own per-source timer.
    pub st_map: HashMap<IpV4, TimerHandle>,
    /// Timed-out sources; valid only while `filter = Exclude`.
    pub st_set: HashSet<IpV4>,
}

impl GroupRecord {
    /// A freshly created record: `filter=Include`, `compat=V3`, everything else empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// §8 invariant: `stMap ∩ stSet = ∅`, `stSet=∅` whenever `filter=Include`.
    pub fn check_invariants(&self) {
        debug_assert!(
            self.st_map.keys().all(|s| !self.st_set.contains(s)),
            "st_map and st_set must be disjoint"
        );
        debug_assert!(
            !(self.filter == FilterMode::Include && !self.st_set.is_empty()),
            "st_set must be empty while filter=INCLUDE"
        );
    }

    /// `filter=INCLUDE ∧ st_map=∅ ⇒ record destroyed` (§3).
    pub fn is_abandoned(&self) -> bool {
        self.filter == FilterMode::Include && self.st_map.is_empty()
    }
}
