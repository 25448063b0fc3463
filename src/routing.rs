//! Routing plug-in interface and two non-production stand-ins
//! (`FloodingRouting`, `StaticRouting`) sufficient to drive the transmit
//! pipeline and its tests. Real routing protocols (DSDV, greedy, Q-routing,
//! OPAR, GRAd) are explicitly out of scope; these exist only to give the
//! pipeline a real collaborator.

use std::collections::BTreeMap;

use embassy_time::Instant;
use serde::Deserialize;

use crate::packet::{NodeId, Packet, PacketId};

/// Which stand-in a node's scene entry selects. `#[serde(default)]` picks
/// `Flooding` so minimal scene files keep working.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKind {
    #[default]
    Flooding,
    Static,
}

/// Read-only, per-call view of the querying node. Passed at each call site
/// instead of giving the routing component a back-reference to its owning
/// node, which would create an ownership cycle (node owns routing; routing
/// would own node).
pub struct RoutingQuery<'a> {
    pub self_id: NodeId,
    pub now: Instant,
    pub known_neighbors: &'a [NodeId],
}

pub trait Routing {
    /// Resolve the next hop for `packet`, or `None` if currently unknown
    /// (the caller moves the packet to the waiting list).
    fn next_hop(&mut self, packet: &Packet, query: &RoutingQuery) -> Option<NodeId>;
    fn on_neighbor_heard(&mut self, neighbor_id: NodeId, rssi_dbm: f32, now: Instant);
    fn on_ack(&mut self, data_packet_id: PacketId, now: Instant);
    fn on_ack_timeout(&mut self, data_packet_id: PacketId, now: Instant);
    /// Consumes and returns whether a route changed since the last poll.
    /// The feed loop polls this once per iteration to decide whether to
    /// re-evaluate the waiting list.
    fn poll_routing_changed(&mut self) -> bool;
}

/// Naive flood: forwards directly to the destination once it has been heard
/// as a one-hop neighbor, otherwise forwards to any known neighbor to keep
/// the flood moving. Returns `None` (waiting list) until at least one
/// neighbor has been heard.
#[derive(Default)]
pub struct FloodingRouting {
    neighbors: BTreeMap<NodeId, f32>,
    changed: bool,
}

impl Routing for FloodingRouting {
    fn next_hop(&mut self, packet: &Packet, _query: &RoutingQuery) -> Option<NodeId> {
        let destination = packet.destination()?;
        if self.neighbors.contains_key(&destination) {
            return Some(destination);
        }
        self.neighbors.keys().next().copied()
    }

    fn on_neighbor_heard(&mut self, neighbor_id: NodeId, rssi_dbm: f32, _now: Instant) {
        if self.neighbors.insert(neighbor_id, rssi_dbm).is_none() {
            self.changed = true;
        }
    }

    fn on_ack(&mut self, _data_packet_id: PacketId, _now: Instant) {}
    fn on_ack_timeout(&mut self, _data_packet_id: PacketId, _now: Instant) {}

    fn poll_routing_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

/// Explicit destination -> next-hop table, populated externally via
/// [`StaticRouting::set_route`] (e.g. by a mobility/topology-control
/// collaborator, or directly by a test exercising scenario 5 from the
/// testable-properties list: routing publishes a route after the packet
/// already sits in the waiting list).
#[derive(Default)]
pub struct StaticRouting {
    table: BTreeMap<NodeId, NodeId>,
    changed: bool,
}

impl StaticRouting {
    pub fn set_route(&mut self, destination: NodeId, next_hop: NodeId) {
        self.table.insert(destination, next_hop);
        self.changed = true;
    }
}

impl Routing for StaticRouting {
    fn next_hop(&mut self, packet: &Packet, _query: &RoutingQuery) -> Option<NodeId> {
        let destination = packet.destination()?;
        self.table.get(&destination).copied()
    }

    fn on_neighbor_heard(&mut self, _neighbor_id: NodeId, _rssi_dbm: f32, _now: Instant) {}
    fn on_ack(&mut self, _data_packet_id: PacketId, _now: Instant) {}
    fn on_ack_timeout(&mut self, _data_packet_id: PacketId, _now: Instant) {}

    fn poll_routing_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}
