//! External collaborators consumed by this crate: topology discovery, the generic
//! unicast shortest-path service, the OpenFlow-style transport, and the timer service.
//! None of these are implemented here — per the scope note in `spec.md` §1 they are the
//! controller's plug-in container's job. These traits are the seams; production code
//! plugs in its own topology cache, transport codec, etc. Test code plugs in small fakes
//! defined alongside the module under test (see the `tests` submodules in
//! `mcnet::routing::engine` and the root crate's `group_manager`/`installer`).

use std::time::Duration;

use crate::types::{IpV4, Port, SwitchId};
use crate::weight::CompositeWeight;

/// Opaque handle to a scheduled timer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// A one-shot callback posted to a [`TimerService`].
pub type TimerCallback = Box<dyn FnOnce()>;

/// Cooperative single-threaded tick/timer loop (§5). Every handler runs to completion;
/// there is no suspension point within a handler. Long-running work schedules itself for
/// a later tick via `post_at`/`post_immediate` instead of blocking.
pub trait TimerService {
    /// Schedule `callback` to run after `delay`.
    fn post_at(&mut self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Schedule `callback` to run on the next tick.
    fn post_immediate(&mut self, callback: TimerCallback) -> TimerHandle {
        self.post_at(Duration::ZERO, callback)
    }

    /// Cancel a previously scheduled callback. Idempotent: canceling an already-fired or
    /// already-canceled handle is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Two ports connecting a pair of switches, oriented `src -> dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPorts {
    pub src_port: Port,
    pub dst_port: Port,
}

/// Topology events forwarded from topology discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    DatapathJoined(SwitchId),
    DatapathLeft(SwitchId),
    PortAdded(SwitchId, Port),
    PortRemoved(SwitchId, Port),
    LinkAdded {
        src: SwitchId,
        dst: SwitchId,
        ports: LinkPorts,
    },
    LinkRemoved {
        src: SwitchId,
        dst: SwitchId,
        ports: LinkPorts,
    },
}

/// Read-only view of the live switch-link topology.
pub trait Topology {
    fn ports_of(&self, sw: SwitchId) -> Vec<Port>;
    fn is_internal(&self, sw: SwitchId, port: Port) -> bool;
    fn datapaths(&self) -> Vec<SwitchId>;
    fn out_links(&self, sw: SwitchId) -> Vec<(SwitchId, LinkPorts)>;
    /// `true` if `sw` is currently known to topology discovery.
    fn has_datapath(&self, sw: SwitchId) -> bool {
        self.datapaths().contains(&sw)
    }
    /// `true` if `port` is still present on `sw`.
    fn has_port(&self, sw: SwitchId, port: Port) -> bool {
        self.ports_of(sw).contains(&port)
    }
}

/// A single hop of a unicast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub dst: SwitchId,
    pub in_port: Port,
    pub out_port: Port,
    pub weight: CompositeWeight,
}

/// A computed unicast path with its total weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicastPath {
    pub path: Vec<Hop>,
    pub weight: CompositeWeight,
}

/// Generic unicast shortest-path service (out of scope to implement here; §1).
pub trait UnicastRouting {
    fn route(&self, src: SwitchId, dst: SwitchId) -> Option<UnicastPath>;
}

/// Forwarding action attached to a flow-mod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Output(Port),
}

/// Flow-mod match fields. Per §6, all fields are wildcarded except those listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMatch {
    pub in_port: Option<Port>,
    pub nw_src: IpV4,
    pub nw_dst: IpV4,
}

impl FlowMatch {
    pub fn new(in_port: Port, nw_src: IpV4, nw_dst: IpV4) -> Self {
        Self {
            in_port: Some(in_port),
            nw_src,
            nw_dst,
        }
    }

    /// Deletion variant: omits `IN_PORT` (§6).
    pub fn for_delete(nw_src: IpV4, nw_dst: IpV4) -> Self {
        Self {
            in_port: None,
            nw_src,
            nw_dst,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowCommand {
    Add,
    Modify,
    Delete,
}

/// Flow-mod flags. A tiny hand-rolled bitset: the only flag in play is
/// `SEND_FLOW_REM`, so a dependency for this is not worth carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowFlags(pub u16);

impl FlowFlags {
    pub const NONE: FlowFlags = FlowFlags(0);
    pub const SEND_FLOW_REM: FlowFlags = FlowFlags(0x0001);

    pub fn contains(&self, other: FlowFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FlowFlags {
    type Output = FlowFlags;
    fn bitor(self, rhs: FlowFlags) -> FlowFlags {
        FlowFlags(self.0 | rhs.0)
    }
}

/// A packet arriving at the controller because no matching flow entry exists (or the
/// entry has `SEND_TO_CONTROLLER` semantics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub switch: SwitchId,
    pub in_port: Port,
    pub buffer_id: Option<u32>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowRemovedReason {
    IdleTimeout,
    HardTimeout,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRemoved {
    pub switch: SwitchId,
    pub cookie: u64,
    pub reason: FlowRemovedReason,
}

/// OpenFlow-style wire transport (out of scope to implement here; §1).
pub trait FlowTransport {
    #[allow(clippy::too_many_arguments)]
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
    );

    fn send_packet(&mut self, sw: SwitchId, payload: Vec<u8>, in_port: Port, out_port: Port);

    /// Forward a buffered packet already held by the switch, by `buffer_id`.
    fn send_buffered(&mut self, sw: SwitchId, buffer_id: u32, out_port: Port);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_match_delete_omits_in_port() {
        let m = FlowMatch::for_delete(IpV4::new(10, 0, 0, 1), IpV4::new(224, 1, 1, 1));
        assert_eq!(m.in_port, None);
    }

    #[test]
    fn flags_or_and_contains() {
        let f = FlowFlags::SEND_FLOW_REM | FlowFlags::NONE;
        assert!(f.contains(FlowFlags::SEND_FLOW_REM));
    }
}
