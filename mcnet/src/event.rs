//! Events emitted by the group manager, host tracker and link-weight sampler. Downstream
//! components see these in emission order (§5): the event types carry no behavior, only
//! data, so ordering is entirely the caller's responsibility.

use crate::types::{IpV4, Port, SwitchId};
use crate::weight::CompositeWeight;

/// A membership-state transition for `(switch, port, group[, src])`, emitted by the group
/// manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEvent {
    pub group: IpV4,
    pub switch: SwitchId,
    pub port: Port,
    pub src: Option<IpV4>,
    pub action: GroupAction,
}

impl GroupEvent {
    pub fn new(group: IpV4, switch: SwitchId, port: Port, action: GroupAction) -> Self {
        Self {
            group,
            switch,
            port,
            src: None,
            action,
        }
    }

    pub fn with_src(group: IpV4, switch: SwitchId, port: Port, src: IpV4, action: GroupAction) -> Self {
        Self {
            group,
            switch,
            port,
            src: Some(src),
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    /// A new `(switch, port, group)` or `(switch, port, group, src)` record was created.
    Add,
    /// A record was destroyed.
    Remove,
    /// The record's filter mode moved from INCLUDE to EXCLUDE.
    ToExclude,
    /// The record's filter mode moved from EXCLUDE to INCLUDE.
    ToInclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationChangeKind {
    Add,
    Modify,
    Remove,
}

/// Emitted by the host-IP tracker whenever the set of known locations for an IP changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLocationChanged {
    pub ip: IpV4,
    pub switch: SwitchId,
    pub port: Port,
    pub kind: LocationChangeKind,
}

/// Emitted by the link-load sampler when a link's quantized weight bucket changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkWeightChanged {
    pub src: SwitchId,
    pub dst: SwitchId,
    pub src_port: Port,
    pub dst_port: Port,
    pub old: CompositeWeight,
    pub new: CompositeWeight,
}
