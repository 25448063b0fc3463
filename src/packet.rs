//! Packet data model: identities, variants, and the per-receiver transmission
//! record used for carrier sense and collision resolution.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use embassy_time::Instant;

use crate::scene::Position;

/// Identifier of a node in the scene. Nodes are indexed by this id
/// everywhere (routing tables, inboxes, metrics records).
pub type NodeId = u32;

/// Process-wide unique packet identity, allocated at injection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(pub u64);

/// Application-level flow/session identity, shared by every packet and ack
/// belonging to the same end-to-end exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(pub u32);

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_FLOW_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate the next packet id. Monotonic and process-wide so metrics and
/// conservation-property tests can key on it without ambiguity.
pub fn next_packet_id() -> PacketId {
    PacketId(NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed))
}

/// Allocate the next flow id, used by the application traffic generator
/// when it opens a new session.
pub fn next_flow_id() -> FlowId {
    FlowId(NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed))
}

/// Reset both counters to their initial value. Not used by the simulator
/// itself — intended for test harnesses (e.g. a seeded-replay test) that
/// need two runs sharing this process to allocate identical id sequences.
#[doc(hidden)]
pub fn reset_ids_for_tests() {
    NEXT_PACKET_ID.store(1, Ordering::Relaxed);
    NEXT_FLOW_ID.store(1, Ordering::Relaxed);
}

/// How a transmission is addressed at the MAC/PHY boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TxMode {
    Unicast(NodeId),
    Multicast(Vec<NodeId>),
    Broadcast,
}

/// Variant-specific packet payload.
#[derive(Debug, Clone)]
pub enum PacketKind {
    Data {
        destination: NodeId,
        flow_id: FlowId,
        sequence: u32,
    },
    Control,
    Ack {
        acked_packet_id: PacketId,
        target: NodeId,
    },
}

/// A single packet moving through the pipeline. Cheap to clone via `Arc`
/// wrapping at the transmission-record boundary (see [`TransmissionRecord`]);
/// the packet itself is cloned whenever it crosses a queue/inbox boundary.
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: PacketId,
    pub source: NodeId,
    pub current_hop: NodeId,
    pub created_at: Instant,
    pub size_bits: u32,
    pub ttl: u8,
    pub retransmissions: u8,
    pub mode: TxMode,
    pub kind: PacketKind,
}

impl Packet {
    pub fn new_data(source: NodeId, destination: NodeId, flow_id: FlowId, sequence: u32, size_bits: u32, ttl: u8, now: Instant) -> Self {
        Packet {
            id: next_packet_id(),
            source,
            current_hop: source,
            created_at: now,
            size_bits,
            ttl,
            retransmissions: 0,
            mode: TxMode::Unicast(destination),
            kind: PacketKind::Data {
                destination,
                flow_id,
                sequence,
            },
        }
    }

    pub fn new_control(source: NodeId, mode: TxMode, size_bits: u32, now: Instant) -> Self {
        Packet {
            id: next_packet_id(),
            source,
            current_hop: source,
            created_at: now,
            size_bits,
            ttl: 1,
            retransmissions: 0,
            mode,
            kind: PacketKind::Control,
        }
    }

    pub fn new_ack(source: NodeId, target: NodeId, acked_packet_id: PacketId, size_bits: u32, now: Instant) -> Self {
        Packet {
            id: next_packet_id(),
            source,
            current_hop: source,
            created_at: now,
            size_bits,
            ttl: 1,
            retransmissions: 0,
            mode: TxMode::Unicast(target),
            kind: PacketKind::Ack { acked_packet_id, target },
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, PacketKind::Data { .. })
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind, PacketKind::Ack { .. })
    }

    pub fn is_control(&self) -> bool {
        matches!(self.kind, PacketKind::Control)
    }

    pub fn destination(&self) -> Option<NodeId> {
        match &self.kind {
            PacketKind::Data { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    pub fn flow_id(&self) -> Option<FlowId> {
        match &self.kind {
            PacketKind::Data { flow_id, .. } => Some(*flow_id),
            _ => None,
        }
    }
}

/// One in-flight (or recently completed) transmission as recorded in a
/// receiver's inbox. Retained until `now() > end + 2 * max_air_time` so
/// overlap queries stay correct for every record that could still interfere
/// with a later-arriving one (see `resolver::prune`).
#[derive(Clone)]
pub struct TransmissionRecord {
    pub packet: Arc<Packet>,
    pub sender_id: NodeId,
    pub tx_power_dbm: f32,
    pub start: Instant,
    pub end: Instant,
    pub sender_position: Position,
    /// Received power at this particular receiver (dBm), computed once at
    /// insertion time so the resolver never needs to recompute path loss.
    pub rssi_dbm: f32,
}

impl TransmissionRecord {
    pub fn overlaps(&self, start: Instant, end: Instant) -> bool {
        self.start < end && self.end > start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_ids_are_unique_and_increasing() {
        let a = next_packet_id();
        let b = next_packet_id();
        assert!(b.0 > a.0);
    }

    #[test]
    fn data_packet_reports_destination_and_flow() {
        let now = Instant::from_ticks(0);
        let flow = next_flow_id();
        let pkt = Packet::new_data(1, 2, flow, 7, 1000, 8, now);
        assert_eq!(pkt.destination(), Some(2));
        assert_eq!(pkt.flow_id(), Some(flow));
        assert!(pkt.is_data());
        assert!(!pkt.is_ack());
    }
}
