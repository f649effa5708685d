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

//! RFC 3376 §6.4 `processRecord`, the core of the IGMPv3 state machine (§4.5).
//!
//! Every row reads `stMap`/`stSet` as they stood when the record arrived unless the same
//! row already reassigned them earlier in its own transformation — e.g. the `EXCLUDE
//! IS_EX/TO_EX` row's `for s∈A∖(X∪Y)` reads the *old* `X`/`Y`, but its `Q(G,X)` query
//! reads the `X` the same row just assigned. `A` below is always the incoming record's
//! source list, `X0`/`Y0` are the pre-row snapshots.
//!
//! A source entering `stMap` always means "maintain a dedicated per-source tree for this
//! destination" (§4.6), independent of filter mode; a source dropping out of `stMap`
//! without entering `stSet` simply stops demanding that dedicated tree; in EXCLUDE mode
//! it is still delivered via the shared tree regardless, since only `stSet` membership
//! blocks delivery.

use std::collections::HashSet;
use std::time::Duration;

use mcnet::event::{GroupAction, GroupEvent};
use mcnet::igmp::RecordType;
use mcnet::interfaces::{FlowTransport, TimerService};
use mcnet::types::{IpV4, Port};

use crate::config::Config;
use crate::group_manager::packet;
use crate::group_manager::record::{FilterMode, GroupKey, GroupRecord};
use crate::group_manager::timer::{PendingTimers, TimerKind};

fn cancel_source_timer<S: TimerService>(record: &mut GroupRecord, src: IpV4, timers: &mut S) {
    if let Some(h) = record.st_map.remove(&src) {
        timers.cancel(h);
    }
}

/// Start a fresh per-source timer at `gmi`, canceling and replacing any existing one —
/// the "start/refresh" transformation used whenever a row reconfirms the whole source set.
fn restart_source_timer<S: TimerService>(record: &mut GroupRecord, key: GroupKey, src: IpV4, gmi: Duration, timers: &mut S, pending: &PendingTimers) {
    cancel_source_timer(record, src, timers);
    let handle = timers.post_at(gmi, pending.callback(TimerKind::SourceTimer { key, src }));
    record.st_map.insert(src, handle);
}

/// Start a per-source timer only if `src` has no timer yet — the "brand new source" rows
/// that leave an already-running timer alone.
fn start_source_timer_if_new<S: TimerService>(record: &mut GroupRecord, key: GroupKey, src: IpV4, gmi: Duration, timers: &mut S, pending: &PendingTimers) {
    if record.st_map.contains_key(&src) {
        return;
    }
    let handle = timers.post_at(gmi, pending.callback(TimerKind::SourceTimer { key, src }));
    record.st_map.insert(src, handle);
}

fn restart_gm_timer<S: TimerService>(record: &mut GroupRecord, key: GroupKey, gmi: Duration, timers: &mut S, pending: &PendingTimers) {
    if let Some(h) = record.gm_timer.take() {
        timers.cancel(h);
    }
    record.gm_timer = Some(timers.post_at(gmi, pending.callback(TimerKind::GroupMember { key })));
}

pub(crate) fn send_query<F: FlowTransport>(transport: &mut F, cfg: &Config, key: GroupKey, group_addr: IpV4, sources: &[IpV4]) {
    let frame = packet::build_query_frame(group_addr, cfg.last_member_query_interval, cfg.robustness, cfg.query_interval, sources);
    transport.send_packet(key.switch, frame, Port::NONE, key.port);
}

/// Arm (or, per the original's robustness re-send behaviour, extend) the group-and-source-
/// specific query burst covering `newly_queried`. A burst already in flight is merged
/// into rather than shadowed by a second, independently ticking one; sends the first query
/// of the burst immediately.
fn arm_gss_query<S: TimerService, F: FlowTransport>(record: &mut GroupRecord, key: GroupKey, cfg: &Config, newly_queried: &HashSet<IpV4>, timers: &mut S, transport: &mut F, pending: &PendingTimers) {
    if newly_queried.is_empty() {
        return;
    }
    for &src in newly_queried {
        if let Some(h) = record.st_map.get(&src).copied() {
            record.gss_query.sources.insert(src, h);
        }
    }
    if let Some(old) = record.gss_query.timer.take() {
        timers.cancel(old);
    }
    let all: Vec<IpV4> = record.gss_query.sources.keys().copied().collect();
    send_query(transport, cfg, key, key.group, &all);
    record.gss_query.remaining = cfg.last_member_query_count().saturating_sub(1);
    record.gss_query.timer = Some(timers.post_at(cfg.last_member_query_interval, pending.callback(TimerKind::GroupSourceSpecificQuery { key })));
}

/// Arm (or restart) the pure group-specific query burst (`Q(G)`), used only to detect
/// whether anyone on the port still wants the group at all (§4.5 EXCLUDE/TO_IN row).
fn arm_gs_query<S: TimerService, F: FlowTransport>(record: &mut GroupRecord, key: GroupKey, cfg: &Config, timers: &mut S, transport: &mut F, pending: &PendingTimers) {
    send_query(transport, cfg, key, key.group, &[]);
    record.gs_query.remaining = cfg.last_member_query_count().saturating_sub(1);
    record.gs_query.timer = Some(timers.post_at(cfg.last_member_query_interval, pending.callback(TimerKind::GroupSpecificQuery { key })));
}

/// Apply one RFC 3376 §6.4 group record to `record`, returning the membership events this
/// produced. Per-source `ADD`/`REMOVE` events are derived as a diff of `stMap`'s keys
/// before and after, uniformly across every row of the table.
#[allow(clippy::too_many_arguments)]
pub fn process_record<S: TimerService, F: FlowTransport>(
    record: &mut GroupRecord,
    key: GroupKey,
    sources: &HashSet<IpV4>,
    record_type: RecordType,
    cfg: &Config,
    timers: &mut S,
    transport: &mut F,
    pending: &PendingTimers,
) -> Vec<GroupEvent> {
    let gmi = cfg.group_membership_interval;
    let a = sources;
    let x0: HashSet<IpV4> = record.st_map.keys().copied().collect();
    let y0 = record.st_set.clone();

    // Any report is evidence the port is still active; a pending leave-detection burst
    // started by an earlier TO_IN is superseded. The EXCLUDE/TO_IN row below re-arms a
    // fresh one if it is still applicable.
    if let Some(h) = record.gs_query.timer.take() {
        timers.cancel(h);
    }

    let mut filter_event = None;

    match (record.filter, record_type) {
        (FilterMode::Include, RecordType::IsIn) | (FilterMode::Include, RecordType::Allow) => {
            for &s in a {
                restart_source_timer(record, key, s, gmi, timers, pending);
            }
        }
        (FilterMode::Include, RecordType::IsEx) | (FilterMode::Include, RecordType::ToEx) => {
            // INCLUDE(A) + IS_EX(B) -> EXCLUDE(A*B, B-A): stMap keeps only sources we
            // were already tracking that the new record still allows (A*B); everything
            // else in the old stMap is simply dropped (neither tracked nor excluded).
            let x_new: HashSet<IpV4> = x0.intersection(a).copied().collect();
            let y_new: HashSet<IpV4> = a.difference(&x0).copied().collect();
            for s in x0.difference(&x_new) {
                cancel_source_timer(record, *s, timers);
            }
            record.st_set = y_new;
            for &s in &x_new {
                restart_source_timer(record, key, s, gmi, timers, pending);
            }
            record.filter = FilterMode::Exclude;
            restart_gm_timer(record, key, gmi, timers, pending);
            filter_event = Some(GroupAction::ToExclude);
            if record_type == RecordType::ToEx {
                let x_new: Vec<IpV4> = record.st_map.keys().copied().collect();
                send_query(transport, cfg, key, key.group, &x_new);
            }
        }
        (FilterMode::Exclude, RecordType::IsIn) | (FilterMode::Exclude, RecordType::Allow) => {
            let known: HashSet<IpV4> = x0.union(&y0).copied().collect();
            for &s in a.difference(&known) {
                start_source_timer_if_new(record, key, s, gmi, timers, pending);
            }
            for s in y0.intersection(a) {
                record.st_set.remove(s);
            }
        }
        (FilterMode::Exclude, RecordType::IsEx) | (FilterMode::Exclude, RecordType::ToEx) => {
            let x_new: HashSet<IpV4> = a.difference(&y0).copied().collect();
            let y_new: HashSet<IpV4> = y0.intersection(a).copied().collect();
            for s in x0.difference(&x_new) {
                cancel_source_timer(record, *s, timers);
            }
            record.st_set = y_new;
            let known: HashSet<IpV4> = x0.union(&y0).copied().collect();
            for &s in a.difference(&known) {
                start_source_timer_if_new(record, key, s, gmi, timers, pending);
            }
            restart_gm_timer(record, key, gmi, timers, pending);
            if record_type == RecordType::ToEx {
                let x_q: Vec<IpV4> = x_new.into_iter().collect();
                send_query(transport, cfg, key, key.group, &x_q);
            }
        }
        (FilterMode::Include, RecordType::ToIn) => {
            for &s in a {
                restart_source_timer(record, key, s, gmi, timers, pending);
            }
            let stale: HashSet<IpV4> = x0.difference(a).copied().collect();
            arm_gss_query(record, key, cfg, &stale, timers, transport, pending);
        }
        (FilterMode::Exclude, RecordType::ToIn) => {
            for &s in a {
                restart_source_timer(record, key, s, gmi, timers, pending);
            }
            for s in y0.intersection(a) {
                record.st_set.remove(s);
            }
            let stale: HashSet<IpV4> = x0.difference(a).copied().collect();
            arm_gss_query(record, key, cfg, &stale, timers, transport, pending);
            arm_gs_query(record, key, cfg, timers, transport, pending);
        }
        (FilterMode::Include, RecordType::Block) => {
            let queried: Vec<IpV4> = a.intersection(&x0).copied().collect();
            if !queried.is_empty() {
                send_query(transport, cfg, key, key.group, &queried);
            }
        }
        (FilterMode::Exclude, RecordType::Block) => {
            let known_active: HashSet<IpV4> = x0.clone();
            for &s in a.difference(&y0) {
                if !known_active.contains(&s) {
                    start_source_timer_if_new(record, key, s, gmi, timers, pending);
                }
            }
            let queried: HashSet<IpV4> = a.difference(&y0).copied().collect();
            arm_gss_query(record, key, cfg, &queried, timers, transport, pending);
        }
    }

    record.check_invariants();

    let mut events = Vec::new();
    if let Some(action) = filter_event {
        events.push(GroupEvent::new(key.group, key.switch, key.port, action));
    }
    let x_after: HashSet<IpV4> = record.st_map.keys().copied().collect();
    for &s in x_after.difference(&x0) {
        events.push(GroupEvent::with_src(key.group, key.switch, key.port, s, GroupAction::Add));
    }
    for &s in x0.difference(&x_after) {
        events.push(GroupEvent::with_src(key.group, key.switch, key.port, s, GroupAction::Remove));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashset;
    use mcnet::interfaces::{Action, FlowCommand, FlowFlags, FlowMatch, TimerCallback, TimerHandle};
    use mcnet::types::SwitchId;

    struct FakeTimers {
        next: u64,
    }
    impl FakeTimers {
        fn new() -> Self {
            Self { next: 1 }
        }
    }
    impl TimerService for FakeTimers {
        fn post_at(&mut self, _delay: Duration, callback: TimerCallback) -> TimerHandle {
            let h = TimerHandle(self.next);
            self.next += 1;
            // Tests assert on resulting `record`/transport state, not on redelivery, so the
            // callback (which would only enqueue a `TimerKind`) is simply dropped here.
            drop(callback);
            h
        }
        fn cancel(&mut self, _handle: TimerHandle) {}
    }

    #[derive(Default)]
    struct FakeTransport {
        sent: Vec<Vec<u8>>,
    }
    impl FlowTransport for FakeTransport {
        fn install_flow(&mut self, _sw: SwitchId, _m: FlowMatch, _actions: Vec<Action>, _cookie: u64, _command: FlowCommand, _idle: Duration, _hard: Duration, _flags: FlowFlags) {}
        fn send_packet(&mut self, _sw: SwitchId, payload: Vec<u8>, _in_port: Port, _out_port: Port) {
            self.sent.push(payload);
        }
        fn send_buffered(&mut self, _sw: SwitchId, _buffer_id: u32, _out_port: Port) {}
    }

    fn key() -> GroupKey {
        GroupKey {
            switch: SwitchId(1),
            port: Port(3),
            group: IpV4::new(224, 1, 2, 3),
        }
    }

    #[test]
    fn include_is_ex_moves_to_exclude_and_excludes_new_source() {
        // INCLUDE(A) + IS_EX(B) -> EXCLUDE(A*B, B-A): a fresh record (A=∅) receiving
        // IS_EX({s1}) ends up with stMap=∅ and stSet={s1}, not the other way round.
        let mut record = GroupRecord::new();
        let cfg = Config::default();
        let mut timers = FakeTimers::new();
        let mut transport = FakeTransport::default();
        let pending = PendingTimers::new();
        let s1 = IpV4::new(10, 0, 0, 1);
        let a = hashset! { s1 };
        let events = process_record(&mut record, key(), &a, RecordType::IsEx, &cfg, &mut timers, &mut transport, &pending);
        assert_eq!(record.filter, FilterMode::Exclude);
        assert!(!record.st_map.contains_key(&s1));
        assert!(record.st_set.contains(&s1));
        assert!(events.iter().any(|e| e.action == GroupAction::ToExclude));
        assert!(!events.iter().any(|e| e.action == GroupAction::Add && e.src == Some(s1)));
    }

    #[test]
    fn include_is_ex_keeps_previously_tracked_source_that_is_still_allowed() {
        // Worked example from RFC 3376 §6.4: stMap={s1} (prior INCLUDE join), then
        // IS_EX({s2}) arrives. Result: stMap=∅ (s1 untracked, not excluded), stSet={s2}.
        let mut record = GroupRecord::new();
        let cfg = Config::default();
        let mut timers = FakeTimers::new();
        let mut transport = FakeTransport::default();
        let pending = PendingTimers::new();
        let s1 = IpV4::new(10, 0, 0, 1);
        let s2 = IpV4::new(10, 0, 0, 2);
        let h = timers.post_at(Duration::ZERO, Box::new(|| {}));
        record.st_map.insert(s1, h);
        let a = hashset! { s2 };
        let events = process_record(&mut record, key(), &a, RecordType::IsEx, &cfg, &mut timers, &mut transport, &pending);
        assert_eq!(record.filter, FilterMode::Exclude);
        assert!(!record.st_map.contains_key(&s1));
        assert!(!record.st_map.contains_key(&s2));
        assert_eq!(record.st_set, hashset! { s2 });
        assert!(events.iter().any(|e| e.action == GroupAction::Remove && e.src == Some(s1)));
    }

    #[test]
    fn include_allow_adds_without_filter_change() {
        let mut record = GroupRecord::new();
        let cfg = Config::default();
        let mut timers = FakeTimers::new();
        let mut transport = FakeTransport::default();
        let pending = PendingTimers::new();
        let a = hashset! { IpV4::new(10, 0, 0, 1) };
        let events = process_record(&mut record, key(), &a, RecordType::Allow, &cfg, &mut timers, &mut transport, &pending);
        assert_eq!(record.filter, FilterMode::Include);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, GroupAction::Add);
    }

    #[test]
    fn include_block_sends_query_without_state_change() {
        let mut record = GroupRecord::new();
        let cfg = Config::default();
        let mut timers = FakeTimers::new();
        let mut transport = FakeTransport::default();
        let pending = PendingTimers::new();
        let h = timers.post_at(Duration::ZERO, Box::new(|| {}));
        record.st_map.insert(IpV4::new(10, 0, 0, 1), h);
        let a = hashset! { IpV4::new(10, 0, 0, 1) };
        let events = process_record(&mut record, key(), &a, RecordType::Block, &cfg, &mut timers, &mut transport, &pending);
        assert!(events.is_empty());
        assert_eq!(transport.sent.len(), 1);
    }

    #[test]
    fn exclude_to_in_arms_group_specific_query() {
        let mut record = GroupRecord::new();
        record.filter = FilterMode::Exclude;
        let cfg = Config::default();
        let mut timers = FakeTimers::new();
        let mut transport = FakeTransport::default();
        let pending = PendingTimers::new();
        let a: HashSet<IpV4> = HashSet::new();
        process_record(&mut record, key(), &a, RecordType::ToIn, &cfg, &mut timers, &mut transport, &pending);
        assert!(record.gs_query.is_active());
    }

    #[test]
    fn exclude_block_arms_source_specific_query_for_brand_new_source() {
        let mut record = GroupRecord::new();
        record.filter = FilterMode::Exclude;
        let cfg = Config::default();
        let mut timers = FakeTimers::new();
        let mut transport = FakeTransport::default();
        let pending = PendingTimers::new();
        let a = hashset! { IpV4::new(10, 0, 0, 1) };
        process_record(&mut record, key(), &a, RecordType::Block, &cfg, &mut timers, &mut transport, &pending);
        assert!(record.st_map.contains_key(&IpV4::new(10, 0, 0, 1)));
        assert!(record.gss_query.is_active());
    }
}
