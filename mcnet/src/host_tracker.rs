//! LRU-bounded host-IP location tracker (component C3).
//!
//! Maps a host IP to a short, ordered sequence of recent `(switch, port)` sightings,
//! newest first, bounded by `binding_limit(ip)`. A single timer is armed for the
//! earliest expiry across the whole table and re-arms itself for the next oldest entry
//! when it fires, rather than one timer per entry.

use std::cell::Cell;
use std::collections::VecDeque;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::debug;

use crate::event::{HostLocationChanged, LocationChangeKind};
use crate::interfaces::{TimerHandle, TimerService};
use crate::types::{IpV4, Port, SwitchId};

/// A [`TimerService`] callback is a bare `FnOnce()` with no way to call back into the
/// tracker directly (§5: no back-pointers into an owning entity from a closure). The
/// expiry timer's callback only flips this shared flag; the owning runtime's tick loop
/// checks it and calls [`HostIpTracker::expire`] if set, mirroring the group manager's
/// `PendingTimers` discipline (`group_manager::timer`).
#[derive(Debug, Clone, Default)]
pub struct PendingExpiry(Rc<Cell<bool>>);

impl PendingExpiry {
    pub fn new() -> Self {
        Self::default()
    }

    fn callback(&self) -> Box<dyn FnOnce()> {
        let flag = Rc::clone(&self.0);
        Box::new(move || flag.set(true))
    }

    /// `true` if the expiry timer fired since the last call, clearing the flag.
    fn take_fired(&self) -> bool {
        self.0.replace(false)
    }
}

/// One sighting of a host at a `(switch, port)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLocation {
    pub switch: SwitchId,
    pub port: Port,
    pub last_seen: Instant,
}

/// Default binding limit and eviction timeout (§3, §6).
pub const DEFAULT_BINDING_LIMIT: usize = 1;
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-host binding-limit policy. Most deployments use a flat default; this hook exists
/// because the data model calls out `bindingLimit(host)` as a function of the host, not
/// a global constant (e.g. multi-homed servers may be allowed more than one location).
pub trait BindingLimit {
    fn binding_limit(&self, ip: IpV4) -> usize;
}

/// Flat policy returning the same limit for every host.
pub struct FlatBindingLimit(pub usize);

impl BindingLimit for FlatBindingLimit {
    fn binding_limit(&self, _ip: IpV4) -> usize {
        self.0
    }
}

pub struct HostIpTracker<B: BindingLimit> {
    locations: HashMap<IpV4, VecDeque<HostLocation>>,
    binding_limit: B,
    timeout: Duration,
    expiry_timer: Option<TimerHandle>,
    pending_expiry: PendingExpiry,
}

impl<B: BindingLimit> HostIpTracker<B> {
    pub fn new(binding_limit: B, timeout: Duration) -> Self {
        Self {
            locations: HashMap::new(),
            binding_limit,
            timeout,
            expiry_timer: None,
            pending_expiry: PendingExpiry::new(),
        }
    }

    /// Run `expire` if (and only if) the expiry timer has fired since the last call
    /// (§5 "re-check state" discipline). The runtime's tick loop calls this once per
    /// tick alongside the group manager's `dispatch_timers`.
    pub fn dispatch_expiry(&mut self, now: Instant, timers: &mut impl TimerService) -> Vec<HostLocationChanged> {
        if self.pending_expiry.take_fired() {
            self.expire(now, timers)
        } else {
            Vec::new()
        }
    }

    /// Insert or refresh a sighting. Returns the event to emit, if any.
    pub fn record_location(
        &mut self,
        ip: IpV4,
        switch: SwitchId,
        port: Port,
        ts: Instant,
        timers: &mut impl TimerService,
    ) -> Option<HostLocationChanged> {
        let limit = self.binding_limit.binding_limit(ip);
        let entry = self.locations.entry(ip).or_default();

        if let Some(existing) = entry.iter_mut().find(|l| l.switch == switch && l.port == port) {
            existing.last_seen = ts;
            self.rearm_expiry(timers);
            return None;
        }

        let was_empty = entry.is_empty();
        if entry.len() >= limit.max(1) {
            entry.pop_back();
        }
        let kind = if was_empty {
            LocationChangeKind::Add
        } else {
            LocationChangeKind::Modify
        };
        entry.push_front(HostLocation {
            switch,
            port,
            last_seen: ts,
        });
        self.rearm_expiry(timers);
        debug!("host {ip} seen at {switch}:{port}");
        Some(HostLocationChanged {
            ip,
            switch,
            port,
            kind,
        })
    }

    /// Drop matching `(switch, port)` entries for `ip`.
    pub fn remove_location(
        &mut self,
        ip: IpV4,
        switch: SwitchId,
        port: Port,
    ) -> Option<HostLocationChanged> {
        let entry = self.locations.get_mut(&ip)?;
        let before = entry.len();
        entry.retain(|l| !(l.switch == switch && l.port == port));
        if entry.len() == before {
            return None;
        }
        let kind = if entry.is_empty() {
            self.locations.remove(&ip);
            LocationChangeKind::Remove
        } else {
            LocationChangeKind::Modify
        };
        Some(HostLocationChanged {
            ip,
            switch,
            port,
            kind,
        })
    }

    pub fn locations(&self, ip: IpV4) -> &[HostLocation] {
        self.locations
            .get(&ip)
            .map(|v| v.as_slices().0)
            .unwrap_or(&[])
    }

    pub fn latest_location(&self, ip: IpV4) -> Option<HostLocation> {
        self.locations.get(&ip).and_then(|v| v.front()).copied()
    }

    pub fn all_hosts(&self) -> impl Iterator<Item = IpV4> + '_ {
        self.locations.keys().copied()
    }

    /// Remove every entry older than `timeout`, re-arming for the next oldest if any
    /// remain. Called by the expiry timer callback.
    pub fn expire(&mut self, now: Instant, timers: &mut impl TimerService) -> Vec<HostLocationChanged> {
        let timeout = self.timeout;
        let mut events = Vec::new();
        let mut empty_ips = Vec::new();
        for (ip, locs) in self.locations.iter_mut() {
            let before = locs.len();
            locs.retain(|l| now.duration_since(l.last_seen) < timeout);
            if locs.len() != before {
                let kind = if locs.is_empty() {
                    empty_ips.push(*ip);
                    LocationChangeKind::Remove
                } else {
                    LocationChangeKind::Modify
                };
                // best-effort switch/port reporting: the tracker only reports that
                // *something* expired for this ip at this point, callers needing the
                // exact entry should use `locations`/`latest_location` before calling
                // `expire`.
                events.push(HostLocationChanged {
                    ip: *ip,
                    switch: SwitchId(0),
                    port: Port::NONE,
                    kind,
                });
            }
        }
        for ip in empty_ips {
            self.locations.remove(&ip);
        }
        self.rearm_expiry(timers);
        events
    }

    fn earliest_expiry(&self) -> Option<Instant> {
        self.locations
            .values()
            .flat_map(|v| v.iter())
            .map(|l| l.last_seen + self.timeout)
            .min()
    }

    fn rearm_expiry(&mut self, timers: &mut impl TimerService) {
        if let Some(h) = self.expiry_timer.take() {
            timers.cancel(h);
        }
        if let Some(when) = self.earliest_expiry() {
            let delay = when.saturating_duration_since(Instant::now());
            self.expiry_timer = Some(timers.post_at(delay, self.pending_expiry.callback()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeTimers {
        next_id: u64,
    }

    impl TimerService for FakeTimers {
        fn post_at(&mut self, _delay: Duration, _cb: crate::interfaces::TimerCallback) -> TimerHandle {
            self.next_id += 1;
            TimerHandle(self.next_id)
        }
        fn cancel(&mut self, _handle: TimerHandle) {}
    }

    /// Captures the most recently posted callback instead of invoking it, so a test can
    /// fire it at will and observe `dispatch_expiry` react.
    #[derive(Default)]
    struct CapturingTimers {
        next_id: u64,
        last: Option<crate::interfaces::TimerCallback>,
    }

    impl TimerService for CapturingTimers {
        fn post_at(&mut self, _delay: Duration, cb: crate::interfaces::TimerCallback) -> TimerHandle {
            self.next_id += 1;
            self.last = Some(cb);
            TimerHandle(self.next_id)
        }
        fn cancel(&mut self, _handle: TimerHandle) {}
    }

    #[test]
    fn dispatch_expiry_is_noop_until_timer_actually_fires() {
        let mut t = HostIpTracker::new(FlatBindingLimit(1), Duration::from_millis(1));
        let mut timers = CapturingTimers::default();
        let ip = IpV4::new(10, 0, 0, 5);
        let now = Instant::now();
        t.record_location(ip, SwitchId(1), Port(1), now, &mut timers);

        // no callback has fired yet: dispatch_expiry must not evict early.
        assert!(t.dispatch_expiry(now + Duration::from_secs(10), &mut timers).is_empty());
        assert!(t.latest_location(ip).is_some());

        // fire the captured callback exactly as a real TimerService would when the
        // delay elapses, then dispatch_expiry must evict the now-stale entry.
        (timers.last.take().unwrap())();
        let events = t.dispatch_expiry(now + Duration::from_secs(10), &mut timers);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, LocationChangeKind::Remove);
        assert!(t.latest_location(ip).is_none());
    }

    #[test]
    fn single_binding_evicts_oldest() {
        let mut t = HostIpTracker::new(FlatBindingLimit(1), DEFAULT_HOST_TIMEOUT);
        let mut timers = FakeTimers::default();
        let ip = IpV4::new(10, 0, 0, 5);
        let now = Instant::now();
        let ev1 = t
            .record_location(ip, SwitchId(1), Port(1), now, &mut timers)
            .unwrap();
        assert_eq!(ev1.kind, LocationChangeKind::Add);
        let ev2 = t
            .record_location(ip, SwitchId(2), Port(2), now, &mut timers)
            .unwrap();
        assert_eq!(ev2.kind, LocationChangeKind::Modify);
        assert_eq!(t.locations(ip).len(), 1);
        assert_eq!(t.latest_location(ip).unwrap().switch, SwitchId(2));
    }

    #[test]
    fn refresh_does_not_duplicate() {
        let mut t = HostIpTracker::new(FlatBindingLimit(2), DEFAULT_HOST_TIMEOUT);
        let mut timers = FakeTimers::default();
        let ip = IpV4::new(10, 0, 0, 5);
        let now = Instant::now();
        t.record_location(ip, SwitchId(1), Port(1), now, &mut timers);
        let again = t.record_location(ip, SwitchId(1), Port(1), now + Duration::from_secs(1), &mut timers);
        assert!(again.is_none());
        assert_eq!(t.locations(ip).len(), 1);
    }

    #[test]
    fn remove_last_emits_remove() {
        let mut t = HostIpTracker::new(FlatBindingLimit(1), DEFAULT_HOST_TIMEOUT);
        let mut timers = FakeTimers::default();
        let ip = IpV4::new(10, 0, 0, 5);
        t.record_location(ip, SwitchId(1), Port(1), Instant::now(), &mut timers);
        let ev = t.remove_location(ip, SwitchId(1), Port(1)).unwrap();
        assert_eq!(ev.kind, LocationChangeKind::Remove);
        assert!(t.latest_location(ip).is_none());
    }
}
