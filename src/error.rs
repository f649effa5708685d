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

//! Top-level error type, one variant per fallible subsystem (§7).
//!
//! Only classes 1-3 of the §7 taxonomy surface as `Result`s; class 4 (invariant
//! violation) is a programmer error and aborts via `assert!`/`debug_assert!` at the
//! point of violation instead of being threaded through here.

use mcnet::igmp::IgmpCodecError;
use mcnet::types::IpV4;
use thiserror::Error;

pub use crate::installer::InstallerError;

/// Errors surfaced by the controller's handler entry points.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// A malformed IGMP frame (§7 class 1): logged and dropped by the caller, never
    /// propagated past the packet-in handler.
    #[error("IGMP codec error: {0}")]
    Igmp(#[from] IgmpCodecError),
    /// The installer found no existing shadow-table entry for an operation that assumed
    /// one (§7 class 2).
    #[error("installer error: {0}")]
    Installer(#[from] InstallerError),
    /// A `GroupEvent` referenced a group with no routing-engine record (§7 class 2).
    #[error("group {0} referenced by event has no routing record")]
    UnknownGroup(IpV4),
}
