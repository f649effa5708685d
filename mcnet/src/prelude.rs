// mcnet: multicast routing and protocol core for an SDN multicast controller
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

//! Convenience re-export of common members.

pub use crate::event::{GroupAction, GroupEvent, HostLocationChanged, LinkWeightChanged};
pub use crate::host_tracker::HostIpTracker;
pub use crate::igmp::{parse as parse_igmp, IgmpMessage};
pub use crate::interfaces::{FlowTransport, Topology, TimerService, UnicastRouting};
pub use crate::routing::{AdjList, MulticastGroup, RoutingEngine};
pub use crate::types::{EthAddr, IpV4, Port, SwitchId};
pub use crate::weight::CompositeWeight;
