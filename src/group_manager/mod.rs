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

//! The IGMP router state machine (component C5, §4.5): owns one [`GroupRecord`] per
//! `(switch, port, group)`, one general-query timer per non-internal `(switch, port)`,
//! and dispatches fired timer notifications back into record-level handlers.

pub mod packet;
mod process_record;
mod querier;
mod record;
mod timer;

pub use process_record::process_record as process_group_record;
pub use querier::QuerierState;
pub use record::{CompatMode, FilterMode, GroupKey, GroupRecord};
pub use timer::{PendingTimers, TimerKind};

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use mcnet::event::{GroupAction, GroupEvent};
use mcnet::igmp::{self, IgmpMessage, RecordType};
use mcnet::interfaces::{FlowTransport, TimerService, Topology};
use mcnet::types::{IpV4, Port, SwitchId};

use crate::config::Config;
use crate::group_manager::process_record::{process_record, send_query};

/// Source address our own queries carry (§6): `0.0.0.0`, the lowest possible IGMP
/// source address. In the current single-controller deployment (§1 Non-goals exclude
/// multi-controller multicast routing) no peer query can ever have a lower address, so
/// `on_received_query` always keeps us the querier; the suppression machinery in
/// [`querier`] is kept correct and unit-tested for that excluded scenario regardless.
const OUR_QUERY_SOURCE: IpV4 = IpV4::ZERO;

#[derive(Debug, Default)]
struct GeneralQueryState {
    ticks_sent: u32,
}

/// Per-port IGMP router state (component C5).
pub struct GroupManager {
    cfg: Config,
    pending: PendingTimers,
    records: HashMap<GroupKey, GroupRecord>,
    general_query: HashMap<(SwitchId, Port), GeneralQueryState>,
    querier: QuerierState,
}

impl GroupManager {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            pending: PendingTimers::new(),
            records: HashMap::new(),
            general_query: HashMap::new(),
            querier: QuerierState::new(),
        }
    }

    pub fn record(&self, key: GroupKey) -> Option<&GroupRecord> {
        self.records.get(&key)
    }

    pub fn is_querier_suppressed(&self, sw: SwitchId, port: Port) -> bool {
        self.querier.is_suppressed(sw, port)
    }

    // ---- querier lifecycle (§4.5 "Querier behaviour") ----------------------------

    /// `DatapathJoined`: arm a general-query timer for every non-internal physical port.
    pub fn on_datapath_joined<T: Topology, S: TimerService>(&mut self, sw: SwitchId, topo: &T, timers: &mut S) {
        for port in topo.ports_of(sw) {
            if port.is_physical() && !topo.is_internal(sw, port) {
                self.arm_general_query(sw, port, timers);
            }
        }
    }

    pub fn on_port_added<S: TimerService>(&mut self, sw: SwitchId, port: Port, topo: &impl Topology, timers: &mut S) {
        if port.is_physical() && !topo.is_internal(sw, port) {
            self.arm_general_query(sw, port, timers);
        }
    }

    /// `LinkChanged(REMOVE)` involving either endpoint: both may have become external.
    pub fn on_link_removed<S: TimerService>(
        &mut self,
        a: (SwitchId, Port),
        b: (SwitchId, Port),
        topo: &impl Topology,
        timers: &mut S,
    ) {
        for (sw, port) in [a, b] {
            if topo.has_port(sw, port) && port.is_physical() && !topo.is_internal(sw, port) {
                self.arm_general_query(sw, port, timers);
            }
        }
    }

    fn arm_general_query<S: TimerService>(&mut self, sw: SwitchId, port: Port, timers: &mut S) {
        if self.general_query.contains_key(&(sw, port)) {
            return;
        }
        self.general_query.insert((sw, port), GeneralQueryState::default());
        let cb = self.pending.callback(TimerKind::GeneralQuery { switch: sw, port });
        timers.post_immediate(cb);
    }

    /// The general-query timer fired: re-verify the port is still present and
    /// non-internal before sending (§4.5), then schedule the next tick at
    /// `STARTUP_QUERY` for the first `STARTUP_QUERY_COUNT` ticks, `QUERY` forever after.
    fn fire_general_query<T: Topology, S: TimerService, F: FlowTransport>(
        &mut self,
        sw: SwitchId,
        port: Port,
        topo: &T,
        timers: &mut S,
        transport: &mut F,
    ) {
        if !topo.has_port(sw, port) || topo.is_internal(sw, port) {
            self.general_query.remove(&(sw, port));
            return;
        }
        let Some(state) = self.general_query.get_mut(&(sw, port)) else {
            return;
        };
        if !self.querier.is_suppressed(sw, port) {
            send_query(
                transport,
                &self.cfg,
                GroupKey {
                    switch: sw,
                    port,
                    group: IpV4::ZERO,
                },
                IpV4::ZERO,
                &[],
            );
        }
        state.ticks_sent += 1;
        let interval = if state.ticks_sent < self.cfg.startup_query_count() {
            self.cfg.startup_query_interval
        } else {
            self.cfg.query_interval
        };
        let cb = self.pending.callback(TimerKind::GeneralQuery { switch: sw, port });
        timers.post_at(interval, cb);
    }

    /// A query arrived from `from` on `(sw, port)` (§4.5, §9 non-querier election). We
    /// are always the lowest possible address so this is a no-op under the current
    /// deployment; kept generic for completeness.
    fn on_received_query<S: TimerService>(&mut self, sw: SwitchId, port: Port, from: IpV4, timers: &mut S) {
        if from >= OUR_QUERY_SOURCE {
            debug!("dropping IGMP query on {sw}:{port} from non-querier {from}");
            return;
        }
        let suppress_for = QuerierState::other_querier_present_interval(
            self.cfg.robustness,
            self.cfg.query_interval,
            self.cfg.query_response_interval,
        );
        let cb = self.pending.callback(TimerKind::OtherQuerierPresent { switch: sw, port });
        let handle = timers.post_at(suppress_for, cb);
        if let Some(old) = self.querier.suppress(sw, port, from, handle) {
            timers.cancel(old);
        }
    }

    // ---- report processing (§4.5 "Report processing") -----------------------------

    /// Feed one received IGMP frame into the router state machine, returning the
    /// `GroupEvent`s it produced. Malformed frames are logged and dropped (§7 class 1),
    /// never propagated as an error.
    pub fn on_report<S: TimerService, F: FlowTransport>(
        &mut self,
        sw: SwitchId,
        port: Port,
        frame: &[u8],
        timers: &mut S,
        transport: &mut F,
    ) -> Vec<GroupEvent> {
        let Some(payload) = packet::igmp_payload(frame) else {
            warn!("dropping non-IGMP frame on {sw}:{port}");
            return Vec::new();
        };
        let msg = match igmp::parse(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("malformed IGMP frame on {sw}:{port}: {e}");
                return Vec::new();
            }
        };

        match msg {
            IgmpMessage::V1Report { group } => {
                self.legacy_report(sw, port, group, CompatMode::V1, RecordType::IsEx, timers, transport)
            }
            IgmpMessage::V2Report { group } => {
                self.legacy_report(sw, port, group, CompatMode::V2, RecordType::IsEx, timers, transport)
            }
            IgmpMessage::V2Leave { group } => {
                let (_, dst) = packet::ip_addrs(frame).unwrap_or((IpV4::ZERO, IpV4::ZERO));
                if dst != IpV4::ALL_ROUTERS {
                    debug!("ignoring v2 leave on {sw}:{port} not addressed to 224.0.0.2");
                    return Vec::new();
                }
                self.legacy_report(sw, port, group, CompatMode::V2, RecordType::ToIn, timers, transport)
            }
            IgmpMessage::V3Query(_) => {
                let (src, _) = packet::ip_addrs(frame).unwrap_or((IpV4::ZERO, IpV4::ZERO));
                self.on_received_query(sw, port, src, timers);
                Vec::new()
            }
            IgmpMessage::V3Report(report) => {
                let mut events = Vec::new();
                for rec in report.records {
                    let key = GroupKey {
                        switch: sw,
                        port,
                        group: rec.group,
                    };
                    self.ensure_record(key, &mut events);
                    let mut sources: HashSet<IpV4> = rec.sources.into_iter().collect();
                    let record = self.records.get_mut(&key).unwrap();
                    // §4.5: while compat is downgraded to V1/V2, an EX record's source
                    // list is cleared before processing (legacy hosts never see source
                    // filtering, so a genuine v3 report claiming one is not trusted yet).
                    if record.compat < CompatMode::V3 && matches!(rec.record_type, RecordType::IsEx | RecordType::ToEx) {
                        sources.clear();
                    }
                    let rec_events =
                        process_record(record, key, &sources, rec.record_type, &self.cfg, timers, transport, &self.pending);
                    events.extend(rec_events);
                    self.reap_if_abandoned(key, &mut events);
                }
                events
            }
        }
    }

    /// Synthesize and apply a v3 record for a v1/v2 legacy message (§4.5): lower
    /// `compat` first, then feed through [`process_record`] unless the record type is
    /// suppressed by an old enough `compat` (`TO_IN`/`BLOCK` while `compat=V1`).
    fn legacy_report<S: TimerService, F: FlowTransport>(
        &mut self,
        sw: SwitchId,
        port: Port,
        group: IpV4,
        version: CompatMode,
        record_type: RecordType,
        timers: &mut S,
        transport: &mut F,
    ) -> Vec<GroupEvent> {
        let key = GroupKey { switch: sw, port, group };
        let mut events = Vec::new();
        self.ensure_record(key, &mut events);
        self.downgrade_compat(key, version, timers);

        let record = self.records.get(&key).unwrap();
        if record.compat == CompatMode::V1 && matches!(record_type, RecordType::ToIn | RecordType::Block) {
            debug!("ignoring {record_type:?} on {key:?} while compat=V1");
            self.reap_if_abandoned(key, &mut events);
            return events;
        }

        let sources = HashSet::new();
        let record = self.records.get_mut(&key).unwrap();
        let rec_events = process_record(record, key, &sources, record_type, &self.cfg, timers, transport, &self.pending);
        events.extend(rec_events);
        self.reap_if_abandoned(key, &mut events);
        events
    }

    fn downgrade_compat<S: TimerService>(&mut self, key: GroupKey, version: CompatMode, timers: &mut S) {
        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        if version > record.compat {
            return;
        }
        record.compat = version;
        if let Some(old) = record.compat_upgrade_timer.take() {
            timers.cancel(old);
        }
        let cb = self.pending.callback(TimerKind::CompatUpgrade { key });
        record.compat_upgrade_timer = Some(timers.post_at(self.cfg.group_membership_interval, cb));
    }

    fn ensure_record(&mut self, key: GroupKey, events: &mut Vec<GroupEvent>) {
        if !self.records.contains_key(&key) {
            self.records.insert(key, GroupRecord::new());
            events.push(GroupEvent::new(key.group, key.switch, key.port, GroupAction::Add));
        }
    }

    fn reap_if_abandoned(&mut self, key: GroupKey, events: &mut Vec<GroupEvent>) {
        if self.records.get(&key).map(GroupRecord::is_abandoned).unwrap_or(false) {
            self.records.remove(&key);
            events.push(GroupEvent::new(key.group, key.switch, key.port, GroupAction::Remove));
        }
    }

    // ---- timer firing (§4.5 "Timers emit state transitions") -----------------------

    /// Drain every timer notification fired since the last call and apply it,
    /// returning the resulting `GroupEvent`s in fire order (§5 FIFO).
    pub fn dispatch_timers<T: Topology, S: TimerService, F: FlowTransport>(
        &mut self,
        topo: &T,
        timers: &mut S,
        transport: &mut F,
    ) -> Vec<GroupEvent> {
        let mut events = Vec::new();
        for kind in self.pending.drain() {
            match kind {
                TimerKind::GeneralQuery { switch, port } => {
                    self.fire_general_query(switch, port, topo, timers, transport)
                }
                TimerKind::SourceTimer { key, src } => events.extend(self.on_source_timer(key, src)),
                TimerKind::GroupMember { key } => events.extend(self.on_group_member_timer(key)),
                TimerKind::GroupSpecificQuery { key } => {
                    events.extend(self.on_group_specific_query_timer(key, timers, transport))
                }
                TimerKind::GroupSourceSpecificQuery { key } => {
                    events.extend(self.on_group_source_specific_query_timer(key, timers, transport))
                }
                TimerKind::OtherQuerierPresent { switch, port } => {
                    self.querier.clear(switch, port);
                }
                TimerKind::CompatUpgrade { key } => self.on_compat_upgrade_timer(key, timers),
            }
        }
        events
    }

    /// A per-source timer fired (§4.5): in INCLUDE the source leaves membership
    /// entirely (`REMOVE(src)`); in EXCLUDE it only moves into the timed-out set, which
    /// has no routing-engine counterpart (C6 has no notion of excluding one source from
    /// an otherwise-EXCLUDE delivery) and so emits no event.
    fn on_source_timer(&mut self, key: GroupKey, src: IpV4) -> Vec<GroupEvent> {
        let mut events = Vec::new();
        let Some(record) = self.records.get_mut(&key) else {
            return events;
        };
        if record.st_map.remove(&src).is_none() {
            return events;
        }
        match record.filter {
            FilterMode::Include => {
                events.push(GroupEvent::with_src(key.group, key.switch, key.port, src, GroupAction::Remove));
            }
            FilterMode::Exclude => {
                record.st_set.insert(src);
            }
        }
        record.check_invariants();
        self.reap_if_abandoned(key, &mut events);
        events
    }

    /// The group-member timer fired: EXCLUDE reverts to INCLUDE (§4.5).
    fn on_group_member_timer(&mut self, key: GroupKey) -> Vec<GroupEvent> {
        let mut events = Vec::new();
        let Some(record) = self.records.get_mut(&key) else {
            return events;
        };
        record.gm_timer = None;
        if record.filter == FilterMode::Exclude {
            record.filter = FilterMode::Include;
            record.st_set.clear();
            events.push(GroupEvent::new(key.group, key.switch, key.port, GroupAction::ToInclude));
        }
        self.reap_if_abandoned(key, &mut events);
        events
    }

    /// One tick of the pure group-specific query burst (`Q(G)`): on the final tick with
    /// no report having refreshed the record in the meantime, EXCLUDE reverts to
    /// INCLUDE exactly as the group-member timer does (§4.5).
    fn on_group_specific_query_timer<S: TimerService, F: FlowTransport>(
        &mut self,
        key: GroupKey,
        timers: &mut S,
        transport: &mut F,
    ) -> Vec<GroupEvent> {
        let mut events = Vec::new();
        let Some(record) = self.records.get_mut(&key) else {
            return events;
        };
        if record.gs_query.remaining > 0 {
            record.gs_query.remaining -= 1;
            send_query(transport, &self.cfg, key, key.group, &[]);
            let cb = self.pending.callback(TimerKind::GroupSpecificQuery { key });
            record.gs_query.timer = Some(timers.post_at(self.cfg.last_member_query_interval, cb));
            return events;
        }
        record.gs_query.timer = None;
        if record.filter == FilterMode::Exclude {
            record.filter = FilterMode::Include;
            record.st_set.clear();
            events.push(GroupEvent::new(key.group, key.switch, key.port, GroupAction::ToInclude));
        }
        self.reap_if_abandoned(key, &mut events);
        events
    }

    /// One tick of the group-and-source-specific query burst (`Q(G, S)`): on the final
    /// tick, every queried source whose per-source timer handle is unchanged since the
    /// burst was armed — i.e. no fresh report refreshed it — is removed (§4.5).
    fn on_group_source_specific_query_timer<S: TimerService, F: FlowTransport>(
        &mut self,
        key: GroupKey,
        timers: &mut S,
        transport: &mut F,
    ) -> Vec<GroupEvent> {
        let mut events = Vec::new();
        let Some(record) = self.records.get_mut(&key) else {
            return events;
        };
        if record.gss_query.remaining > 0 {
            record.gss_query.remaining -= 1;
            let sources: Vec<IpV4> = record.gss_query.sources.keys().copied().collect();
            send_query(transport, &self.cfg, key, key.group, &sources);
            let cb = self.pending.callback(TimerKind::GroupSourceSpecificQuery { key });
            record.gss_query.timer = Some(timers.post_at(self.cfg.last_member_query_interval, cb));
            return events;
        }
        let mut stale = Vec::new();
        for (&src, &snapshot) in record.gss_query.sources.iter() {
            if record.st_map.get(&src) == Some(&snapshot) {
                stale.push(src);
            }
        }
        for src in stale {
            record.st_map.remove(&src);
            events.push(GroupEvent::with_src(key.group, key.switch, key.port, src, GroupAction::Remove));
        }
        record.gss_query.sources.clear();
        record.gss_query.timer = None;
        record.check_invariants();
        self.reap_if_abandoned(key, &mut events);
        events
    }

    fn on_compat_upgrade_timer<S: TimerService>(&mut self, key: GroupKey, timers: &mut S) {
        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        match record.compat {
            CompatMode::V1 => {
                record.compat = CompatMode::V2;
                let cb = self.pending.callback(TimerKind::CompatUpgrade { key });
                record.compat_upgrade_timer = Some(timers.post_at(self.cfg.group_membership_interval, cb));
            }
            CompatMode::V2 => {
                record.compat = CompatMode::V3;
                record.compat_upgrade_timer = None;
            }
            CompatMode::V3 => {}
        }
    }
}
