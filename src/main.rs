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

use std::time::Duration;

use clap::Parser;

use mcnet::interfaces::{PacketIn, Topology};
use mcnet::types::{IpV4, Port, SwitchId};

use mcast_controller::runtime::sim::{
    build_udp_frame, build_v2_report_frame, demo_topology, SimTimers, SimTransport, SimUnicast,
};
use mcast_controller::{Config, Controller};

/// Run the controller against an in-memory demo fabric and print what it did.
#[derive(Debug, Parser)]
struct Cli {
    /// Multicast group two receivers join.
    #[clap(long, default_value = "224.1.1.1")]
    group: String,
    /// How long (seconds) to let the demo's timers run before reporting a summary.
    #[clap(long, default_value_t = 5)]
    run_secs: u64,
}

fn parse_group(s: &str) -> IpV4 {
    let parts: Vec<u8> = s.split('.').map(|p| p.parse().expect("dotted-quad octet")).collect();
    assert_eq!(parts.len(), 4, "expected a dotted-quad multicast address");
    IpV4::new(parts[0], parts[1], parts[2], parts[3])
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();

    let args = Cli::parse();
    let group = parse_group(&args.group);

    let topo = demo_topology();
    let unicast = SimUnicast::from_topology(&topo);
    let mut timers = SimTimers::new();
    let mut transport = SimTransport::default();

    let mut ctl = Controller::new(Config::default());
    for sw in topo.datapaths() {
        ctl.on_datapath_joined(sw, &topo, &mut timers);
    }

    // source host on sw1, two receivers on sw3 and sw4 (see `demo_topology`).
    let source = IpV4::new(10, 0, 0, 1);
    let receiver_a = IpV4::new(10, 0, 0, 3);
    let receiver_b = IpV4::new(10, 0, 0, 4);
    ctl.on_host_seen(source, SwitchId(1), Port(10), &mut timers);
    ctl.on_host_seen(receiver_a, SwitchId(3), Port(10), &mut timers);
    ctl.on_host_seen(receiver_b, SwitchId(4), Port(10), &mut timers);

    let report_a = build_v2_report_frame(receiver_a, group);
    ctl.on_igmp_frame(SwitchId(3), Port(10), &report_a, &unicast, &mut timers, &mut transport)?;
    let report_b = build_v2_report_frame(receiver_b, group);
    ctl.on_igmp_frame(SwitchId(4), Port(10), &report_b, &unicast, &mut timers, &mut transport)?;

    let data = build_udp_frame(source, group);
    let pkt = PacketIn {
        switch: SwitchId(1),
        in_port: Port(10),
        buffer_id: None,
        payload: data,
    };
    ctl.on_packet_in(&pkt, &unicast, &mut transport)?;

    timers.run_until(Duration::from_secs(args.run_secs));
    ctl.dispatch_timers(&topo, &unicast, &mut timers, &mut transport);

    println!(
        "installed {} flow-mod(s) across {} switch(es) for group {group}",
        transport.installed.len(),
        topo.datapaths().len()
    );
    for flow in &transport.installed {
        println!(
            "  {:?} on {} cookie={} actions={:?}",
            flow.command, flow.switch, flow.cookie, flow.actions
        );
    }

    Ok(())
}
