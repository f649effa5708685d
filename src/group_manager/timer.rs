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

//! Timer re-arming discipline for the group manager (§5).
//!
//! A [`TimerService`] callback is a bare `FnOnce()` with no way to carry a result back
//! into the manager synchronously, and the manager cannot hand out `&mut self` into a
//! closure that outlives the call. So every armed callback's only job is to push a
//! [`TimerKind`] naming *what* fired onto a shared queue; the owning loop drains the
//! queue and re-enters the manager by `(switch, port, group[, src])` lookup. A lookup
//! miss means the record (or the whole port) was already torn down by the time the timer
//! fired — exactly the "re-check state, no-op if gone" discipline §5 requires of a
//! callback racing a `cancel()`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use mcnet::types::{IpV4, Port, SwitchId};

use crate::group_manager::record::GroupKey;

/// What kind of timer fired, and for which record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The per-port general-query timer (§4.5 querier behaviour).
    GeneralQuery { switch: SwitchId, port: Port },
    /// A per-source timer within `st_map` (§4.5 "timers emit state transitions").
    SourceTimer { key: GroupKey, src: IpV4 },
    /// The group-member timer (filter-mode revert to INCLUDE).
    GroupMember { key: GroupKey },
    /// One tick of the group-specific query burst.
    GroupSpecificQuery { key: GroupKey },
    /// One tick of the group-and-source-specific query burst.
    GroupSourceSpecificQuery { key: GroupKey },
    /// The non-querier suppression timer for a port (supplemented feature, see
    /// `querier`).
    OtherQuerierPresent { switch: SwitchId, port: Port },
    /// The `v1→v2→v3` compatibility-mode auto-upgrade timer.
    CompatUpgrade { key: GroupKey },
}

/// Shared FIFO of fired timer notifications, drained once per tick by the runtime.
#[derive(Debug, Clone, Default)]
pub struct PendingTimers(Rc<RefCell<VecDeque<TimerKind>>>);

impl PendingTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a one-shot callback that enqueues `kind` when the timer service fires it.
    pub fn callback(&self, kind: TimerKind) -> Box<dyn FnOnce()> {
        let queue = Rc::clone(&self.0);
        Box::new(move || queue.borrow_mut().push_back(kind))
    }

    /// Drain every notification enqueued since the last drain, in fire order.
    pub fn drain(&self) -> Vec<TimerKind> {
        self.0.borrow_mut().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_enqueues_and_drains_in_order() {
        let pending = PendingTimers::new();
        let key = GroupKey {
            switch: SwitchId(1),
            port: Port(1),
            group: IpV4::new(224, 1, 1, 1),
        };
        (pending.callback(TimerKind::GroupMember { key }))();
        (pending.callback(TimerKind::GeneralQuery {
            switch: SwitchId(1),
            port: Port(1),
        }))();
        let drained = pending.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], TimerKind::GroupMember { .. }));
        assert!(pending.drain().is_empty());
    }
}
