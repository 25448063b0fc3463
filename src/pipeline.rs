//! Transmit pipeline data structures (§4.4): the transmitting queue and the
//! waiting list. The feed loop that drives packets between them lives on
//! `Node` (`node.rs`) since it also has to reach routing, MAC, and energy —
//! the queue/waiting-list types themselves stay here as small, independently
//! testable collections, the same way `scheduler::BufferSlot` is the piece
//! of §4.1 application code actually touches while the driver lives in
//! `time_driver`.

use std::collections::{BTreeMap, VecDeque};

use crate::packet::{Packet, PacketId};

/// FIFO of packets awaiting buffer acquisition. Unbounded, per §3.
#[derive(Default)]
pub struct TransmittingQueue {
    queue: VecDeque<Packet>,
}

impl TransmittingQueue {
    pub fn push_back(&mut self, packet: Packet) {
        self.queue.push_back(packet);
    }

    /// Look at, but do not remove, the head packet — the feed loop decides
    /// whether to dequeue only after consulting routing.
    pub fn peek(&self) -> Option<&Packet> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Data packets whose next hop is currently unknown, keyed by packet id so
/// a routing-change notification can look up and requeue them by id.
#[derive(Default)]
pub struct WaitingList {
    packets: BTreeMap<PacketId, Packet>,
}

impl WaitingList {
    pub fn insert(&mut self, packet: Packet) {
        self.packets.insert(packet.id, packet);
    }

    pub fn remove(&mut self, id: PacketId) -> Option<Packet> {
        self.packets.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Destinations of every waiting packet, used by the feed loop to find
    /// which entries a routing-change notification just unblocked.
    pub fn destinations(&self) -> impl Iterator<Item = (PacketId, Option<crate::packet::NodeId>)> + '_ {
        self.packets.iter().map(|(id, p)| (*id, p.destination()))
    }

    /// Every waiting packet by id, for callers that need to re-run routing
    /// against the whole packet rather than just its final destination.
    pub fn iter(&self) -> impl Iterator<Item = (PacketId, &Packet)> + '_ {
        self.packets.iter().map(|(id, p)| (*id, p))
    }
}
