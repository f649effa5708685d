//! Link-load sampler and weight quantizer (component C2).
//!
//! Visits one monitored link per tick, round-robin, computing a utilisation ratio from
//! byte-counter deltas and quantizing it into a [`CompositeWeight`] bucket. Emits
//! [`LinkWeightChanged`] only when the stored bucket actually crosses a boundary, so
//! downstream replanning is driven by real changes, not noise.

use std::collections::HashMap;
use std::time::Duration;

use crate::event::LinkWeightChanged;
use crate::interfaces::LinkPorts;
use crate::types::SwitchId;
use crate::weight::CompositeWeight;

/// Per-port byte counters sampled by the transport at `interval` (§4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct LinkKey {
    src: SwitchId,
    dst: SwitchId,
    ports: LinkPorts,
}

struct LinkState {
    key: LinkKey,
    ratio: f64,
    last_src_counters: Option<ByteCounters>,
    last_dst_counters: Option<ByteCounters>,
}

/// Tunables from §6.
#[derive(Debug, Clone, Copy)]
pub struct LinkWeightConfig {
    pub interval: Duration,
    pub alpha: f64,
    pub parts: u32,
    pub capacity_bytes_per_sec: u64,
}

impl Default for LinkWeightConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            alpha: 0.0,
            parts: 10,
            capacity_bytes_per_sec: 125_000_000, // 1 Gbit/s
        }
    }
}

pub struct LinkWeightSampler {
    config: LinkWeightConfig,
    links: Vec<LinkState>,
    cursor: usize,
}

fn quantize(ratio: f64, parts: u32, alpha: f64) -> CompositeWeight {
    let ratio = ratio.clamp(0.0, 1.0);
    let scaled = parts as f64 * ((1.0 - alpha) + alpha * ratio);
    CompositeWeight::new(scaled.round() as u64)
}

impl LinkWeightSampler {
    pub fn new(config: LinkWeightConfig) -> Self {
        Self {
            config,
            links: Vec::new(),
            cursor: 0,
        }
    }

    /// Tick period: `interval / max(1, #links)` (§4.2).
    pub fn tick_period(&self) -> Duration {
        let n = self.links.len().max(1) as u32;
        self.config.interval / n
    }

    /// Seed tracking for a newly-discovered link; emits a `LinkWeightChanged` with
    /// `old=ZERO`.
    pub fn link_added(&mut self, src: SwitchId, dst: SwitchId, ports: LinkPorts) -> LinkWeightChanged {
        let new = quantize(0.0, self.config.parts, self.config.alpha);
        self.links.push(LinkState {
            key: LinkKey { src, dst, ports },
            ratio: 0.0,
            last_src_counters: None,
            last_dst_counters: None,
        });
        LinkWeightChanged {
            src,
            dst,
            src_port: ports.src_port,
            dst_port: ports.dst_port,
            old: CompositeWeight::ZERO,
            new,
        }
    }

    /// Drop a removed link; emits a `LinkWeightChanged` with `new=ZERO`.
    pub fn link_removed(&mut self, src: SwitchId, dst: SwitchId, ports: LinkPorts) -> Option<LinkWeightChanged> {
        let idx = self
            .links
            .iter()
            .position(|l| l.key.src == src && l.key.dst == dst && l.key.ports.src_port == ports.src_port)?;
        let old = quantize(self.links[idx].ratio, self.config.parts, self.config.alpha);
        self.links.remove(idx);
        if idx <= self.cursor && self.cursor > 0 {
            self.cursor -= 1;
        }
        Some(LinkWeightChanged {
            src,
            dst,
            src_port: ports.src_port,
            dst_port: ports.dst_port,
            old,
            new: CompositeWeight::ZERO,
        })
    }

    /// Advance one round-robin step, sampling the next link's counters. Returns a
    /// `LinkWeightChanged` only if the bucket boundary was crossed.
    pub fn tick(&mut self, sample: impl FnOnce(SwitchId, SwitchId, LinkPorts) -> (ByteCounters, ByteCounters)) -> Option<LinkWeightChanged> {
        if self.links.is_empty() {
            return None;
        }
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.links.len();

        let key = self.links[idx].key;
        let (src_counters, dst_counters) = sample(key.src, key.dst, key.ports);
        let interval_secs = self.config.interval.as_secs_f64().max(f64::EPSILON);
        let capacity = self.config.capacity_bytes_per_sec as f64;

        let utilisation = |now: ByteCounters, prev: Option<ByteCounters>| -> f64 {
            let prev = prev.unwrap_or(now);
            let rx_delta = now.rx_bytes.saturating_sub(prev.rx_bytes) as f64;
            let tx_delta = now.tx_bytes.saturating_sub(prev.tx_bytes) as f64;
            let rx_ratio = rx_delta / (capacity * interval_secs);
            let tx_ratio = tx_delta / (capacity * interval_secs);
            rx_ratio.max(tx_ratio)
        };

        let src_ratio = utilisation(src_counters, self.links[idx].last_src_counters);
        let dst_ratio = utilisation(dst_counters, self.links[idx].last_dst_counters);
        let new_ratio = src_ratio.max(dst_ratio).clamp(0.0, 1.0);

        let old_ratio = self.links[idx].ratio;
        let crossed = (new_ratio - old_ratio).abs() >= 1.0 / self.config.parts as f64;

        self.links[idx].last_src_counters = Some(src_counters);
        self.links[idx].last_dst_counters = Some(dst_counters);
        if !crossed {
            return None;
        }

        let old = quantize(old_ratio, self.config.parts, self.config.alpha);
        let new = quantize(new_ratio, self.config.parts, self.config.alpha);
        self.links[idx].ratio = new_ratio;
        if old == new {
            return None;
        }
        Some(LinkWeightChanged {
            src: key.src,
            dst: key.dst,
            src_port: key.ports.src_port,
            dst_port: key.ports.dst_port,
            old,
            new,
        })
    }
}
