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

//! Flow-table shadow (§3, §4.7): the controller-side mirror of what is actually
//! installed on the fabric for each `(group, src)`, keyed exactly as the routing engine
//! keys its trees (`src = None` for the shared `(*, G)` tree).

use std::collections::HashMap;

use mcnet::interfaces::Action;
use mcnet::types::{IpV4, SwitchId};

pub type FlowKey = (IpV4, Option<IpV4>);

/// A `(group, src)` with a live route installed on the fabric.
#[derive(Debug, Clone)]
pub struct RoutedEntry {
    pub root_switch: SwitchId,
    pub cookie: u64,
    pub per_switch_actions: HashMap<SwitchId, Vec<Action>>,
}

/// A `(group, src)` with a single drop rule installed at one switch. Blocking rules get
/// their own cookie (distinct from the routed cookie space) so a `FlowRemoved` — which
/// carries only `(switch, cookie)`, no match fields — can identify which blocked pair
/// expired even when several are blocked at the same switch at once.
#[derive(Debug, Clone, Copy)]
pub struct BlockedEntry {
    pub switch: SwitchId,
    pub cookie: u64,
}

/// Two disjoint tables: `(group, src)` is in at most one of `routed`/`blocked` at a time
/// (§3, §8 invariant).
#[derive(Debug, Default)]
pub struct ShadowTables {
    routed: HashMap<FlowKey, RoutedEntry>,
    blocked: HashMap<FlowKey, BlockedEntry>,
    next_block_cookie: u64,
}

impl ShadowTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routed(&self, key: FlowKey) -> Option<&RoutedEntry> {
        self.routed.get(&key)
    }

    pub fn is_blocked(&self, key: FlowKey) -> bool {
        self.blocked.contains_key(&key)
    }

    /// A fresh cookie for the next blocking rule, distinct from every routed cookie and
    /// every other blocked cookie.
    pub fn next_block_cookie(&mut self) -> u64 {
        self.next_block_cookie += 1;
        self.next_block_cookie
    }

    /// Every source currently routed for `group`, used to fan a shared-destination
    /// change out to the per-source flows that depend on it (§4.6, §4.7).
    pub fn routed_sources(&self, group: IpV4) -> Vec<IpV4> {
        self.routed
            .keys()
            .filter(|(g, s)| *g == group && s.is_some())
            .filter_map(|(_, s)| *s)
            .collect()
    }

    /// Every source currently blocked for `group`, for the same fan-out (§4.6, §4.7): a
    /// shared-destination change can turn a blocked `(group, src)` into a routable one.
    pub fn blocked_sources(&self, group: IpV4) -> Vec<IpV4> {
        self.blocked
            .keys()
            .filter(|(g, s)| *g == group && s.is_some())
            .filter_map(|(_, s)| *s)
            .collect()
    }

    /// The cookie and `FlowCommand` to use for a (re-)install of `key` rooted at
    /// `new_root`. A root change resets the cookie to 1 and forces `ADD`; otherwise the
    /// existing cookie increments and the command is `MODIFY` (§4.7).
    pub fn next_cookie(&self, key: FlowKey, new_root: SwitchId) -> (u64, bool) {
        match self.routed.get(&key) {
            Some(existing) if existing.root_switch == new_root => (existing.cookie + 1, false),
            _ => (1, true),
        }
    }

    /// Record a newly (re-)installed route. Invariant: `key` must not already be
    /// blocked (§7 class 4 — programmer error if it is).
    pub fn insert_routed(&mut self, key: FlowKey, entry: RoutedEntry) {
        assert!(
            !self.blocked.contains_key(&key),
            "{:?} cannot be both routed and blocked",
            key
        );
        self.routed.insert(key, entry);
    }

    pub fn remove_routed(&mut self, key: FlowKey) -> Option<RoutedEntry> {
        self.routed.remove(&key)
    }

    /// Record a newly-installed blocking rule, evicting any stale blocked entry first.
    pub fn insert_blocked(&mut self, key: FlowKey, switch: SwitchId, cookie: u64) {
        assert!(
            !self.routed.contains_key(&key),
            "{:?} cannot be both routed and blocked",
            key
        );
        self.blocked.insert(key, BlockedEntry { switch, cookie });
    }

    pub fn remove_blocked(&mut self, key: FlowKey) -> Option<BlockedEntry> {
        self.blocked.remove(&key)
    }

    pub fn find_routed_by_cookie(&self, root: SwitchId, cookie: u64) -> Option<FlowKey> {
        self.routed
            .iter()
            .find(|(_, e)| e.root_switch == root && e.cookie == cookie)
            .map(|(k, _)| *k)
    }

    pub fn find_blocked_by_cookie(&self, switch: SwitchId, cookie: u64) -> Option<FlowKey> {
        self.blocked
            .iter()
            .find(|(_, e)| e.switch == switch && e.cookie == cookie)
            .map(|(k, _)| *k)
    }
}
