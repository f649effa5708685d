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

//! Every tunable enumerated in §6, collected behind one `Default` impl carrying the
//! RFC 3376 defaults.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// IGMP is robust to `robustness - 1` packet losses.
    pub robustness: u8,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub query_interval: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub query_response_interval: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub startup_query_interval: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub last_member_query_interval: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub group_membership_interval: Duration,

    pub host_binding_default: u8,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub host_timeout: Duration,

    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub link_weight_interval: Duration,
    pub link_weight_alpha: f64,
    pub link_weight_parts: u32,

    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub default_flow_idle: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub default_flow_hard: Duration,
}

impl Config {
    /// `STARTUP_QUERY_COUNT = LAST_MEMBER_QUERY_COUNT = robustness` (§4.5).
    pub fn startup_query_count(&self) -> u32 {
        self.robustness as u32
    }

    pub fn last_member_query_count(&self) -> u32 {
        self.robustness as u32
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robustness: 2,
            query_interval: Duration::from_secs(125),
            query_response_interval: Duration::from_secs(10),
            startup_query_interval: Duration::from_secs(30),
            last_member_query_interval: Duration::from_secs(1),
            group_membership_interval: Duration::from_secs(2 * 125 + 10),
            host_binding_default: 1,
            host_timeout: Duration::from_secs(300),
            link_weight_interval: Duration::from_secs(5),
            link_weight_alpha: 0.0,
            link_weight_parts: 10,
            default_flow_idle: Duration::from_secs(30),
            default_flow_hard: Duration::from_secs(0),
        }
    }
}

#[cfg(feature = "serde")]
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc3376() {
        let c = Config::default();
        assert_eq!(c.robustness, 2);
        assert_eq!(c.group_membership_interval, Duration::from_secs(260));
        assert_eq!(c.startup_query_count(), 2);
    }
}
