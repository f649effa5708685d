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

//! Ethernet/IPv4 framing for outgoing IGMPv3 queries (§4.5, §6 "Wire formats").
//!
//! `mcnet::igmp` only codes the IGMP payload; the controller is what owns putting that
//! payload on the wire inside an Ethernet/IPv4 frame, so the framing lives here rather
//! than in the protocol-agnostic library crate.

use std::time::Duration;

use mcnet::igmp::{build_v3_query, igmp_checksum};
use mcnet::types::{EthAddr, IpV4};

const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTO_IGMP: u8 = 2;
/// IPv4 "don't fragment" flag.
const IP_FLAG_DF: u16 = 0x4000;

/// Assemble a general, group-specific, or group-and-source-specific IGMPv3 query as a
/// full Ethernet frame: source IP `0.0.0.0`, TTL 1, DF set, destination derived from
/// `224.0.0.1` for a general query (`group = IpV4::ZERO`) or from `group` itself
/// otherwise (§6).
pub fn build_query_frame(group: IpV4, max_resp: Duration, qrv: u8, qqic: Duration, sources: &[IpV4]) -> Vec<u8> {
    let dst_ip = if group.is_zero() { IpV4::ALL_HOSTS } else { group };
    let dst_mac = EthAddr::multicast_for(dst_ip);

    let igmp = build_v3_query(group, max_resp, qrv, qqic, sources).expect("query group must be zero or multicast");

    let ip_total_len = 20 + igmp.len();
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45; // version 4, IHL 5
    ip[2..4].copy_from_slice(&(ip_total_len as u16).to_be_bytes());
    ip[6..8].copy_from_slice(&IP_FLAG_DF.to_be_bytes());
    ip[8] = 1; // TTL
    ip[9] = IP_PROTO_IGMP;
    ip[12..16].copy_from_slice(&IpV4::ZERO.0.to_be_bytes());
    ip[16..20].copy_from_slice(&dst_ip.0.to_be_bytes());
    let csum = igmp_checksum(&ip);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());

    let mut frame = Vec::with_capacity(14 + ip.len() + igmp.len());
    frame.extend_from_slice(&dst_mac.0);
    frame.extend_from_slice(&EthAddr::ZERO.0);
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&igmp);
    frame
}

/// Extract the IGMP payload from a received Ethernet/IPv4 frame, returning `None` if it
/// is not an IPv4/IGMP frame or is too short to contain a full IPv4 header.
pub fn igmp_payload(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 14 + 20 {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    let ip = &frame[14..];
    let ihl = (ip[0] & 0x0F) as usize * 4;
    if ip[9] != IP_PROTO_IGMP || ip.len() < ihl {
        return None;
    }
    Some(&ip[ihl..])
}

/// Extract `(nw_src, nw_dst)` from a received Ethernet/IPv4 frame, used by the group
/// manager to honour the `224.0.0.2` destination check on v2 leaves and to identify the
/// sender of a competing query for non-querier election (§4.5).
pub fn ip_addrs(frame: &[u8]) -> Option<(IpV4, IpV4)> {
    if frame.len() < 14 + 20 {
        return None;
    }
    if u16::from_be_bytes([frame[12], frame[13]]) != ETHERTYPE_IPV4 {
        return None;
    }
    let ip = &frame[14..];
    let src = IpV4(u32::from_be_bytes([ip[12], ip[13], ip[14], ip[15]]));
    let dst = IpV4(u32::from_be_bytes([ip[16], ip[17], ip[18], ip[19]]));
    Some((src, dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcnet::igmp::{parse, IgmpMessage};

    #[test]
    fn general_query_roundtrips_through_framing() {
        let frame = build_query_frame(IpV4::ZERO, Duration::from_secs(10), 2, Duration::from_secs(125), &[]);
        let payload = igmp_payload(&frame).unwrap();
        match parse(payload).unwrap() {
            IgmpMessage::V3Query(q) => assert!(q.group.is_zero()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn group_specific_query_destination_derived_from_group() {
        let group = IpV4::new(224, 1, 2, 3);
        let frame = build_query_frame(group, Duration::from_secs(1), 2, Duration::from_secs(1), &[]);
        assert_eq!(&frame[0..6], &EthAddr::multicast_for(group).0);
    }

    #[test]
    fn ip_addrs_reads_src_and_dst() {
        let frame = build_query_frame(IpV4::ZERO, Duration::from_secs(10), 2, Duration::from_secs(125), &[]);
        let (src, dst) = ip_addrs(&frame).unwrap();
        assert_eq!(src, IpV4::ZERO);
        assert_eq!(dst, IpV4::ALL_HOSTS);
    }
}
