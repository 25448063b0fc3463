//! Drone Node (§4.6): composes the transmit pipeline with pluggable
//! routing, mobility, and energy. Plug-ins never hold a back-reference to
//! the node — callers pass a [`RoutingQuery`]/receiver snapshot at each
//! call site, per §9's cyclic-reference strategy.
//!
//! Each node is driven by its own independent cooperative task (spawned by
//! [`crate::simulator`]), not by a shared loop that visits every node in
//! turn — the spec's nodes act simultaneously in virtual time, and only
//! genuinely concurrent tasks interleave at the right points (mid-backoff,
//! mid-AWAIT_ACK). Cross-node state a sender must reach into — another
//! node's inbox, its live position — is therefore kept out of the owned
//! `Node` struct and held in scene-wide `Rc`-shared tables instead
//! (`inboxes`, `positions`); everything else (queue, waiting list, energy,
//! routing, mac rng) is exclusively owned by the task that runs this node
//! and touched by no one else.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use embassy_time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::channel::{ChannelModel, ReceiverSnapshot};
use crate::energy::Energy;
use crate::mac::csma::{self, AckWaiter, CsmaEnv};
use crate::mac::{aloha, MacKind, MacOutcome, MacParameters};
use crate::metrics::MetricsSink;
use crate::mobility::Mobility;
use crate::packet::{NodeId, Packet, PacketId, PacketKind, TxMode};
use crate::pipeline::{TransmittingQueue, WaitingList};
use crate::resolver::Inbox;
use crate::routing::{Routing, RoutingQuery};
use crate::scene::{Obstacle, Position};
use crate::scheduler::BufferSlot;
use crate::signal::{McsParameters, PathLossParameters};

/// Scene-wide resources shared read-only by every node task for the whole
/// run, bundled so the simulator hands each spawned task one `Rc` instead
/// of half a dozen fields.
pub struct NodeEnv {
    pub mac_params: MacParameters,
    pub mcs: McsParameters,
    pub path_loss: PathLossParameters,
    pub channel: ChannelModel,
    pub obstacles: Vec<Obstacle>,
    pub all_node_ids: Vec<NodeId>,
    /// Worst-case single-packet air time in this scene, used as the
    /// resolver prune horizon (`now - 2 * max_air_time`, §4.3).
    pub max_air_time: Duration,
}

/// Live positions of every node, refreshed by each node's own task and read
/// by any other node about to transmit. Every access is a short synchronous
/// borrow that never spans an `.await`.
pub type PositionTable = Rc<RefCell<BTreeMap<NodeId, Position>>>;

/// Every node's inbox, keyed by id. A sending node's MAC layer writes
/// directly into a receiver's entry; a node's own resolver tick prunes and
/// resolves its own entry. Built once for the whole node set before any
/// task is spawned — membership never changes after that.
pub type InboxTable = Rc<BTreeMap<NodeId, Rc<RefCell<Inbox>>>>;

pub struct Node {
    pub id: NodeId,
    pub tx_power_dbm: f32,
    pub mac_kind: MacKind,
    pub mobility: Box<dyn Mobility>,
    pub routing: Box<dyn Routing>,
    pub energy: Box<dyn Energy>,
    pub queue: TransmittingQueue,
    pub waiting: WaitingList,
    pub buffer_slot: BufferSlot,
    pub ack_waiter: AckWaiter,
    pub mac_rng: StdRng,
    pub metrics: MetricsSink,
    inboxes: InboxTable,
    positions: PositionTable,
    known_neighbors: Vec<NodeId>,
    seen_data: BTreeSet<PacketId>,
    position_update_interval: Duration,
    last_position_update: Instant,
    last_energy_update: Instant,
    position: Position,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: NodeId,
        tx_power_dbm: f32,
        mac_kind: MacKind,
        mobility: Box<dyn Mobility>,
        routing: Box<dyn Routing>,
        energy: Box<dyn Energy>,
        metrics: MetricsSink,
        seed: u64,
        position_update_interval: Duration,
        now: Instant,
        inboxes: InboxTable,
        positions: PositionTable,
    ) -> Self {
        let position = mobility.position(id, now);
        positions.borrow_mut().insert(id, position);
        Node {
            id,
            tx_power_dbm,
            mac_kind,
            mobility,
            routing,
            energy,
            queue: TransmittingQueue::default(),
            waiting: WaitingList::default(),
            buffer_slot: BufferSlot::new(),
            ack_waiter: AckWaiter::default(),
            mac_rng: StdRng::seed_from_u64(seed),
            metrics,
            inboxes,
            positions,
            known_neighbors: Vec::new(),
            seen_data: BTreeSet::new(),
            position_update_interval,
            last_position_update: now,
            last_energy_update: now,
            position,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            node_id: self.id,
            position: self.position,
        }
    }

    /// Re-read position from the mobility plug-in if `position_update_interval`
    /// has elapsed since the last read (§6: "ticked on position_update_interval"),
    /// and publish it to the shared position table other nodes read from.
    pub fn maybe_update_position(&mut self, now: Instant) {
        if now.checked_duration_since(self.last_position_update).map(|d| d >= self.position_update_interval).unwrap_or(false) {
            self.position = self.mobility.position(self.id, now);
            self.last_position_update = now;
            self.positions.borrow_mut().insert(self.id, self.position);
        }
    }

    /// Debit the flight/idle power draw for the time elapsed since the last
    /// call (§4.6/§7: energy is debited per flight interval regardless of
    /// radio activity, not just at transmit time).
    fn debit_flight_energy(&mut self, now: Instant) {
        if let Some(dt) = now.checked_duration_since(self.last_energy_update) {
            self.energy.debit_flight(dt);
            self.last_energy_update = now;
        }
    }

    /// Application-layer injection: a fresh packet enters the transmitting
    /// queue directly (its next hop is resolved by the feed loop).
    pub fn inject(&mut self, packet: Packet, now: Instant) {
        self.metrics.generated(packet.id, packet.flow_id(), now, self.id);
        self.queue.push_back(packet);
    }

    /// Terminal receiver: record end-to-end metrics and drop.
    pub fn on_delivered(&mut self, packet: &Packet, now: Instant) {
        self.metrics.delivered(packet.id, packet.flow_id(), now, self.id, packet.retransmissions as u32 + 1);
    }

    /// Intermediate receiver: decrement TTL, drop duplicates and exhausted
    /// TTLs, otherwise enqueue for further forwarding.
    pub fn on_forward(&mut self, mut packet: Packet, now: Instant) {
        if !self.seen_data.insert(packet.id) {
            return;
        }
        if packet.ttl == 0 {
            self.metrics.dropped_ttl(packet.id, packet.flow_id(), now, self.id);
            return;
        }
        packet.ttl -= 1;
        packet.current_hop = self.id;
        self.metrics.hop(packet.id, packet.flow_id(), now, self.id);
        self.queue.push_back(packet);
    }

    /// Routing published a change: move every waiting packet whose next hop
    /// is now known back to the tail of the transmitting queue. Re-queries
    /// `routing.next_hop` per entry rather than checking the packet's final
    /// destination against `known_neighbors` — under `FloodingRouting` the
    /// resolved next hop need not be the destination itself, so that check
    /// would leave such packets stranded in the waiting list forever.
    pub fn reconcile_waiting_list(&mut self) {
        if !self.routing.poll_routing_changed() {
            return;
        }
        let now = crate::scheduler::now();
        let known_neighbors = self.known_neighbors.clone();
        let entries: Vec<(PacketId, Packet)> = self.waiting.iter().map(|(id, p)| (id, p.clone())).collect();
        let mut ready = Vec::new();
        for (id, packet) in &entries {
            let query = RoutingQuery {
                self_id: self.id,
                now,
                known_neighbors: &known_neighbors,
            };
            if self.routing.next_hop(packet, &query).is_some() {
                ready.push(*id);
            }
        }
        for id in ready {
            if let Some(packet) = self.waiting.remove(id) {
                self.queue.push_back(packet);
            }
        }
    }

    fn record_neighbor(&mut self, neighbor_id: NodeId, rssi_dbm: f32, now: Instant) {
        if !self.known_neighbors.contains(&neighbor_id) {
            self.known_neighbors.push(neighbor_id);
        }
        self.routing.on_neighbor_heard(neighbor_id, rssi_dbm, now);
    }

    /// One feed-loop iteration (§4.4): if the queue is non-empty, inspect
    /// (not dequeue) its head; only dequeue once we know it can proceed to
    /// the buffer slot. Acks bypass the queue via `reply_with_ack` instead
    /// of flowing through here.
    pub async fn run_feed_loop_once(&mut self, env: &NodeEnv) {
        let now = crate::scheduler::now();
        self.maybe_update_position(now);
        self.debit_flight_energy(now);
        self.reconcile_waiting_list();

        let Some(head) = self.queue.peek() else {
            return;
        };

        // `next_hop` is kept, not just tested for presence: `recipients_for`
        // later fans the transmission out by `packet.mode`, which must name
        // the actual radio-adjacent next hop routing just resolved, not the
        // packet's (possibly many-hops-away) final destination.
        let next_hop = match &head.kind {
            PacketKind::Control | PacketKind::Ack { .. } => None,
            PacketKind::Data { .. } => {
                let query = RoutingQuery {
                    self_id: self.id,
                    now,
                    known_neighbors: &self.known_neighbors,
                };
                self.routing.next_hop(head, &query)
            }
        };
        let ready = matches!(head.kind, PacketKind::Control | PacketKind::Ack { .. }) || next_hop.is_some();

        if !ready {
            let packet = self.queue.pop_front().expect("peeked above");
            self.waiting.insert(packet);
            return;
        }

        let mut packet = self.queue.pop_front().expect("peeked above");
        if let Some(next_hop) = next_hop {
            packet.mode = TxMode::Unicast(next_hop);
        }

        if self.energy.remaining() <= 0.0 {
            log::debug!("{}", crate::error::PacketOutcome::EnergyExhausted { node_id: self.id });
            self.metrics.dropped_energy(packet.id, packet.flow_id(), now, self.id);
            return;
        }

        self.buffer_slot.acquire().await;
        let outcome = self.contend(&mut packet, env).await;
        self.buffer_slot.release();

        match outcome {
            MacOutcome::RetriesExhausted { .. } => {
                self.metrics.dropped_mac(packet.id, packet.flow_id(), now, self.id);
                self.routing.on_ack_timeout(packet.id, now);
            }
            MacOutcome::Delivered => {
                self.routing.on_ack(packet.id, now);
            }
            MacOutcome::Sent => {}
        }
    }

    /// Resolver tick (§4.3) for this node's own inbox: prune stale records,
    /// resolve newly-completed ones, and dispatch each outcome. The
    /// `RefCell` borrow over the inbox is released before any dispatch
    /// `.await`, since `on_packet_delivered` may itself transmit an Ack.
    pub async fn run_resolver_tick(&mut self, env: &NodeEnv) {
        let now = crate::scheduler::now();
        let resolved = {
            let inbox = self.inboxes.get(&self.id).expect("every node has a registered inbox");
            let mut inbox = inbox.borrow_mut();
            inbox.prune(now, env.max_air_time);
            inbox.resolve_completed(now, &env.mcs, &env.path_loss)
        };
        for reception in resolved {
            if reception.delivered {
                self.on_packet_delivered(&reception.packet, reception.rssi_dbm, now, env).await;
            } else {
                self.on_packet_collision(&reception.packet, now);
            }
        }
    }

    async fn contend(&mut self, packet: &mut Packet, env: &NodeEnv) -> MacOutcome {
        let receivers = {
            let recipients = recipients_for(packet, &env.all_node_ids);
            let positions = self.positions.borrow();
            recipients
                .into_iter()
                .filter(|id| *id != self.id)
                .filter_map(|id| positions.get(&id).map(|&position| ReceiverSnapshot { node_id: id, position }))
                .collect::<Vec<_>>()
        };

        match self.mac_kind {
            MacKind::CsmaCa => {
                let own_inbox = self.inboxes.get(&self.id).expect("every node has a registered inbox").clone();
                let mut csma_env = CsmaEnv {
                    mac: &env.mac_params,
                    mcs: &env.mcs,
                    path_loss: &env.path_loss,
                    channel: &env.channel,
                    obstacles: &env.obstacles,
                    receivers: &receivers,
                    inboxes: &self.inboxes,
                    own_inbox,
                    rng: &mut self.mac_rng,
                };
                csma::contend(&mut csma_env, packet, self.id, self.position, self.tx_power_dbm, self.energy.as_mut(), &self.ack_waiter).await
            }
            MacKind::Aloha => {
                let mut aloha_env = aloha::AlohaEnv {
                    mac: &env.mac_params,
                    mcs: &env.mcs,
                    path_loss: &env.path_loss,
                    channel: &env.channel,
                    obstacles: &env.obstacles,
                    receivers: &receivers,
                    inboxes: &self.inboxes,
                    rng: &mut self.mac_rng,
                };
                aloha::contend(&mut aloha_env, packet, self.id, self.position, self.tx_power_dbm, self.energy.as_mut(), &self.ack_waiter).await
            }
        }
    }

    /// Reacts to the resolver's per-tick delivered stream for this node
    /// (§4.3's terminal output).
    async fn on_packet_delivered(&mut self, packet: &Packet, rssi_dbm: f32, now: Instant, env: &NodeEnv) {
        match &packet.kind {
            PacketKind::Ack { acked_packet_id, target } if *target == self.id => {
                self.ack_waiter.notify(*acked_packet_id);
                self.record_neighbor(packet.source, rssi_dbm, now);
            }
            PacketKind::Data { destination, .. } if *destination == self.id => {
                self.record_neighbor(packet.current_hop, rssi_dbm, now);
                self.reply_ack(packet, now, env).await;
                self.on_delivered(packet, now);
            }
            PacketKind::Data { .. } => {
                self.record_neighbor(packet.current_hop, rssi_dbm, now);
                self.reply_ack(packet, now, env).await;
                self.on_forward(packet.clone(), now);
            }
            PacketKind::Control => {
                self.record_neighbor(packet.source, rssi_dbm, now);
            }
            PacketKind::Ack { .. } => {}
        }
    }

    /// The resolver judged this record below the SINR threshold at this
    /// receiver — invisible to the sender (§7: surfaces as a MAC ACK
    /// timeout there), but worth a diagnostic metrics record here.
    fn on_packet_collision(&mut self, packet: &Packet, now: Instant) {
        self.metrics.dropped_phy(packet.id, packet.flow_id(), now, self.id);
    }

    async fn reply_ack(&mut self, data_packet: &Packet, now: Instant, env: &NodeEnv) {
        let ack = Packet::new_ack(self.id, data_packet.current_hop, data_packet.id, 64, now);
        let receivers = {
            let positions = self.positions.borrow();
            positions
                .get(&data_packet.current_hop)
                .map(|&position| {
                    vec![ReceiverSnapshot {
                        node_id: data_packet.current_hop,
                        position,
                    }]
                })
                .unwrap_or_default()
        };

        match self.mac_kind {
            MacKind::CsmaCa => {
                let own_inbox = self.inboxes.get(&self.id).expect("every node has a registered inbox").clone();
                let csma_env = CsmaEnv {
                    mac: &env.mac_params,
                    mcs: &env.mcs,
                    path_loss: &env.path_loss,
                    channel: &env.channel,
                    obstacles: &env.obstacles,
                    receivers: &receivers,
                    inboxes: &self.inboxes,
                    own_inbox,
                    rng: &mut self.mac_rng,
                };
                csma::reply_with_ack(&csma_env, ack, self.id, self.position, self.tx_power_dbm).await;
            }
            MacKind::Aloha => {
                let aloha_env = aloha::AlohaEnv {
                    mac: &env.mac_params,
                    mcs: &env.mcs,
                    path_loss: &env.path_loss,
                    channel: &env.channel,
                    obstacles: &env.obstacles,
                    receivers: &receivers,
                    inboxes: &self.inboxes,
                    rng: &mut self.mac_rng,
                };
                aloha::reply_with_ack(&aloha_env, ack, self.id, self.position, self.tx_power_dbm).await;
            }
        }
    }
}

/// How a packet is addressed determines who the channel fans it out to.
pub fn recipients_for(packet: &Packet, all_node_ids: &[NodeId]) -> Vec<NodeId> {
    match &packet.mode {
        TxMode::Broadcast => all_node_ids.to_vec(),
        TxMode::Multicast(ids) => ids.clone(),
        TxMode::Unicast(id) => vec![*id],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::{EnergyParameters, LinearBatteryEnergy};
    use crate::mobility::StaticMobility;
    use crate::routing::FloodingRouting;

    fn test_node(id: NodeId) -> Node {
        let inboxes: InboxTable = Rc::new(BTreeMap::from([(id, Rc::new(RefCell::new(Inbox::default())))]));
        let positions: PositionTable = Rc::new(RefCell::new(BTreeMap::new()));
        Node::new(
            id,
            10.0,
            MacKind::CsmaCa,
            Box::new(StaticMobility { position: Position::new(0.0, 0.0, 0.0) }),
            Box::new(FloodingRouting::default()),
            Box::new(LinearBatteryEnergy::new(
                1000.0,
                EnergyParameters {
                    joules_per_bit: 0.0001,
                    flight_power_watts: 1.0,
                },
            )),
            MetricsSink::default(),
            1,
            Duration::from_secs(1),
            Instant::from_ticks(0),
            inboxes,
            positions,
        )
    }

    #[test]
    fn inject_enqueues_and_records_generated() {
        let mut node = test_node(1);
        let pkt = Packet::new_data(1, 2, crate::packet::next_flow_id(), 0, 1000, 8, Instant::from_ticks(0));
        node.inject(pkt, Instant::from_ticks(0));
        assert_eq!(node.queue.len(), 1);
        assert_eq!(node.metrics.len(), 1);
    }

    #[test]
    fn on_forward_drops_duplicate_and_ttl_expired() {
        let mut node = test_node(2);
        let mut pkt = Packet::new_data(1, 9, crate::packet::next_flow_id(), 0, 1000, 1, Instant::from_ticks(0));
        pkt.current_hop = 2;
        node.on_forward(pkt.clone(), Instant::from_ticks(0));
        assert_eq!(node.queue.len(), 1);

        // duplicate: same packet id arrives again, silently dropped.
        node.on_forward(pkt.clone(), Instant::from_ticks(1));
        assert_eq!(node.queue.len(), 1);
    }
}
