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

//! Host-side IGMPv2 report/leave framing, for scenarios that drive a receiver joining
//! or leaving a group without reaching for the full v3 codec.

use mcnet::igmp::{build_v2, igmp_checksum, TYPE_V2_LEAVE, TYPE_V2_REPORT};
use mcnet::types::{EthAddr, IpV4};

const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_IGMP: u8 = 2;

fn wrap(igmp: Vec<u8>, dst_ip: IpV4) -> Vec<u8> {
    let ip_total_len = 20 + igmp.len();
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&(ip_total_len as u16).to_be_bytes());
    ip[8] = 1;
    ip[9] = IP_PROTO_IGMP;
    ip[16..20].copy_from_slice(&dst_ip.0.to_be_bytes());
    let csum = igmp_checksum(&ip);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());

    let dst_mac = EthAddr::multicast_for(dst_ip);
    let mut frame = Vec::with_capacity(14 + ip.len() + igmp.len());
    frame.extend_from_slice(&dst_mac.0);
    frame.extend_from_slice(&EthAddr::ZERO.0);
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&igmp);
    frame
}

/// A receiver's unsolicited IGMPv2 membership report joining `group`.
pub(crate) fn join_frame(group: IpV4) -> Vec<u8> {
    wrap(build_v2(TYPE_V2_REPORT, group), group)
}

/// A receiver's IGMPv2 leave group message, addressed to `224.0.0.2` per RFC 2236 §9.
pub(crate) fn leave_frame(group: IpV4) -> Vec<u8> {
    wrap(build_v2(TYPE_V2_LEAVE, group), IpV4::ALL_ROUTERS)
}
