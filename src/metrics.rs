//! Append-only metrics sink and the PDR/delay/throughput/hop/energy
//! aggregation computed from it once a run completes.

use std::cell::RefCell;
use std::rc::Rc;

use embassy_time::Instant;

use crate::packet::{FlowId, NodeId, PacketId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricsKind {
    Generated,
    Delivered,
    DroppedTtl,
    DroppedMac,
    DroppedPhy,
    DroppedEnergy,
    Hop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub kind: MetricsKind,
    pub packet_id: PacketId,
    pub flow_id: Option<FlowId>,
    pub now: Instant,
    pub node_id: NodeId,
    /// Free-form extra context: hop count at delivery, collision peer, etc.
    pub extra: Option<String>,
}

/// Aggregate PDR/delay/throughput/hop/energy summary computed once the run
/// has finished. Not itself part of the append-only log.
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub generated: u64,
    pub delivered: u64,
    pub dropped_ttl: u64,
    pub dropped_mac: u64,
    pub dropped_phy: u64,
    pub dropped_energy: u64,
    pub total_hops: u64,
    pub mean_delay_ticks: f64,
}

impl MetricsSummary {
    pub fn pdr(&self) -> f64 {
        if self.generated == 0 {
            0.0
        } else {
            self.delivered as f64 / self.generated as f64
        }
    }

    pub fn mean_hop_count(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.total_hops as f64 / self.delivered as f64
        }
    }
}

/// Shared handle around the append-only record log. Cloning shares storage
/// (single-threaded `Rc<RefCell<_>>`, matching the rest of the engine: there
/// is no real parallelism so no need for atomics or a mutex here).
#[derive(Clone, Default)]
pub struct MetricsSink {
    inner: Rc<RefCell<Vec<MetricsRecord>>>,
    generated_at: Rc<RefCell<std::collections::HashMap<PacketId, Instant>>>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: MetricsRecord) {
        if record.kind == MetricsKind::Generated {
            self.generated_at.borrow_mut().insert(record.packet_id, record.now);
        }
        self.inner.borrow_mut().push(record);
    }

    pub fn generated(&self, packet_id: PacketId, flow_id: Option<FlowId>, now: Instant, node_id: NodeId) {
        self.record(MetricsRecord {
            kind: MetricsKind::Generated,
            packet_id,
            flow_id,
            now,
            node_id,
            extra: None,
        });
    }

    pub fn delivered(&self, packet_id: PacketId, flow_id: Option<FlowId>, now: Instant, node_id: NodeId, hop_count: u32) {
        self.record(MetricsRecord {
            kind: MetricsKind::Delivered,
            packet_id,
            flow_id,
            now,
            node_id,
            extra: Some(format!("hops={hop_count}")),
        });
    }

    pub fn dropped(&self, kind: MetricsKind, packet_id: PacketId, flow_id: Option<FlowId>, now: Instant, node_id: NodeId, reason: impl Into<String>) {
        self.record(MetricsRecord {
            kind,
            packet_id,
            flow_id,
            now,
            node_id,
            extra: Some(reason.into()),
        });
    }

    pub fn dropped_ttl(&self, packet_id: PacketId, flow_id: Option<FlowId>, now: Instant, node_id: NodeId) {
        self.dropped(MetricsKind::DroppedTtl, packet_id, flow_id, now, node_id, "ttl_expired");
    }

    pub fn dropped_mac(&self, packet_id: PacketId, flow_id: Option<FlowId>, now: Instant, node_id: NodeId) {
        self.dropped(MetricsKind::DroppedMac, packet_id, flow_id, now, node_id, "retries_exhausted");
    }

    pub fn dropped_phy(&self, packet_id: PacketId, flow_id: Option<FlowId>, now: Instant, node_id: NodeId) {
        self.dropped(MetricsKind::DroppedPhy, packet_id, flow_id, now, node_id, "collision");
    }

    pub fn dropped_energy(&self, packet_id: PacketId, flow_id: Option<FlowId>, now: Instant, node_id: NodeId) {
        self.dropped(MetricsKind::DroppedEnergy, packet_id, flow_id, now, node_id, "energy_exhausted");
    }

    pub fn hop(&self, packet_id: PacketId, flow_id: Option<FlowId>, now: Instant, node_id: NodeId) {
        self.record(MetricsRecord {
            kind: MetricsKind::Hop,
            packet_id,
            flow_id,
            now,
            node_id,
            extra: None,
        });
    }

    pub fn records(&self) -> Vec<MetricsRecord> {
        self.inner.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Compute the aggregate summary over every record seen so far.
    pub fn summarize(&self) -> MetricsSummary {
        let records = self.inner.borrow();
        let generated_at = self.generated_at.borrow();
        let mut summary = MetricsSummary::default();
        let mut delay_sum_ticks: u128 = 0;

        for r in records.iter() {
            match r.kind {
                MetricsKind::Generated => summary.generated += 1,
                MetricsKind::Delivered => {
                    summary.delivered += 1;
                    if let Some(extra) = &r.extra {
                        if let Some(hops) = extra.strip_prefix("hops=").and_then(|s| s.parse::<u64>().ok()) {
                            summary.total_hops += hops;
                        }
                    }
                    if let Some(gen_at) = generated_at.get(&r.packet_id) {
                        delay_sum_ticks += r.now.as_ticks().saturating_sub(gen_at.as_ticks()) as u128;
                    }
                }
                MetricsKind::DroppedTtl => summary.dropped_ttl += 1,
                MetricsKind::DroppedMac => summary.dropped_mac += 1,
                MetricsKind::DroppedPhy => summary.dropped_phy += 1,
                MetricsKind::DroppedEnergy => summary.dropped_energy += 1,
                MetricsKind::Hop => {}
            }
        }

        if summary.delivered > 0 {
            summary.mean_delay_ticks = delay_sum_ticks as f64 / summary.delivered as f64;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdr_reflects_generated_vs_delivered() {
        let sink = MetricsSink::new();
        let now = Instant::from_ticks(0);
        sink.generated(PacketId(1), None, now, 1);
        sink.generated(PacketId(2), None, now, 1);
        sink.delivered(PacketId(1), None, Instant::from_ticks(10), 2, 1);

        let summary = sink.summarize();
        assert_eq!(summary.generated, 2);
        assert_eq!(summary.delivered, 1);
        assert!((summary.pdr() - 0.5).abs() < 1e-9);
        assert_eq!(summary.mean_hop_count(), 1.0);
    }
}
