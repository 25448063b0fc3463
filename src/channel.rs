//! The broadcast primitive (§4.2): decides, per candidate receiver, whether
//! a Transmission Record is inserted into that receiver's inbox at all.
//! Collision/interference resolution is never decided here — that is
//! `resolver`'s job.
//!
//! Three variants, selected per scene/config at construction and dispatched
//! by match rather than `dyn Trait` (the channel is a hot per-transmission
//! path and stays on the stack; see the dynamic-dispatch design note this
//! mirrors for routing/mobility/energy too). Grounded in the teacher's
//! `network.rs` `find_target_nodes` / `distribute_packet_to_targets` /
//! `handle_radio_transfer`, which performs exactly this fan-out-with-policy
//! step before handing candidates to its reception/collision logic.

use std::cell::RefCell;
use std::sync::Arc;

use embassy_time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::Deserialize;

use crate::geometry;
use crate::packet::{NodeId, Packet, TransmissionRecord};
use crate::scene::{Obstacle, Position};
use crate::signal::{calculate_rssi, PathLossParameters};

/// A fan-out candidate as seen by the channel: who, and where they are. The
/// caller (the node/pipeline driving a transmission) has already narrowed
/// this list to the packet's `recipients_hint` — everyone for Broadcast,
/// the addressed set for Multicast, the single addressee for Unicast.
#[derive(Clone, Copy)]
pub struct ReceiverSnapshot {
    pub node_id: NodeId,
    pub position: Position,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    Los,
    Probabilistic { loss_prob: f64 },
    Range { sensitivity_dbm: f32 },
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig::Los
    }
}

pub enum ChannelModel {
    Los,
    Probabilistic { loss_prob: f64, rng: RefCell<StdRng> },
    Range { sensitivity_dbm: f32 },
}

impl ChannelModel {
    pub fn from_config(config: &ChannelConfig, seed: u64) -> Self {
        match *config {
            ChannelConfig::Los => ChannelModel::Los,
            ChannelConfig::Probabilistic { loss_prob } => ChannelModel::Probabilistic {
                loss_prob,
                rng: RefCell::new(StdRng::seed_from_u64(seed)),
            },
            ChannelConfig::Range { sensitivity_dbm } => ChannelModel::Range { sensitivity_dbm },
        }
    }

    /// Insert a Transmission Record into every receiver this policy allows.
    /// Returns `(receiver, record)` pairs for the caller to append into
    /// each receiver's own inbox (the channel never touches node state
    /// directly — nodes exclusively own their inbox, per §3).
    #[allow(clippy::too_many_arguments)]
    pub fn broadcast_put(
        &self,
        packet: Arc<Packet>,
        sender_id: NodeId,
        sender_position: Position,
        tx_power_dbm: f32,
        start: Instant,
        duration: Duration,
        receivers: &[ReceiverSnapshot],
        obstacles: &[Obstacle],
        path_loss: &PathLossParameters,
    ) -> Vec<(NodeId, TransmissionRecord)> {
        let end = start + duration;
        receivers
            .iter()
            .filter(|r| r.node_id != sender_id)
            .filter_map(|r| {
                let distance = geometry::distance_from_d2(geometry::distance2(&sender_position.planar(), &r.position.planar()));
                let rssi_dbm = calculate_rssi(distance, tx_power_dbm, path_loss);

                let admitted = match self {
                    ChannelModel::Los => true,
                    ChannelModel::Probabilistic { loss_prob, rng } => {
                        let dropped: f64 = rng.borrow_mut().gen();
                        dropped >= *loss_prob
                    }
                    ChannelModel::Range { sensitivity_dbm } => {
                        rssi_dbm >= *sensitivity_dbm && !geometry::is_intersect(&sender_position.planar(), &r.position.planar(), obstacles)
                    }
                };

                if !admitted {
                    return None;
                }

                Some((
                    r.node_id,
                    TransmissionRecord {
                        packet: packet.clone(),
                        sender_id,
                        tx_power_dbm,
                        start,
                        end,
                        sender_position,
                        rssi_dbm,
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::next_flow_id;

    fn default_path_loss() -> PathLossParameters {
        PathLossParameters {
            path_loss_exponent: 2.0,
            shadowing_sigma: 0.0,
            path_loss_at_reference_distance: 40.0,
            noise_floor: -100.0,
        }
    }

    fn sample_packet() -> Arc<Packet> {
        Arc::new(Packet::new_data(1, 2, next_flow_id(), 0, 1000, 8, Instant::from_ticks(0)))
    }

    #[test]
    fn los_channel_always_admits() {
        let model = ChannelModel::Los;
        let receivers = [ReceiverSnapshot {
            node_id: 2,
            position: Position::new(100.0, 0.0, 0.0),
        }];
        let out = model.broadcast_put(
            sample_packet(),
            1,
            Position::new(0.0, 0.0, 0.0),
            10.0,
            Instant::from_ticks(0),
            Duration::from_millis(10),
            &receivers,
            &[],
            &default_path_loss(),
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn probabilistic_channel_drops_everything_at_loss_prob_one() {
        let model = ChannelModel::from_config(&ChannelConfig::Probabilistic { loss_prob: 1.0 }, 42);
        let receivers = [ReceiverSnapshot {
            node_id: 2,
            position: Position::new(10.0, 0.0, 0.0),
        }];
        let out = model.broadcast_put(
            sample_packet(),
            1,
            Position::new(0.0, 0.0, 0.0),
            10.0,
            Instant::from_ticks(0),
            Duration::from_millis(10),
            &receivers,
            &[],
            &default_path_loss(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn range_channel_rejects_receivers_below_sensitivity() {
        let model = ChannelModel::Range { sensitivity_dbm: -40.0 };
        let receivers = [ReceiverSnapshot {
            node_id: 2,
            position: Position::new(100_000.0, 0.0, 0.0),
        }];
        let out = model.broadcast_put(
            sample_packet(),
            1,
            Position::new(0.0, 0.0, 0.0),
            10.0,
            Instant::from_ticks(0),
            Duration::from_millis(10),
            &receivers,
            &[],
            &default_path_loss(),
        );
        assert!(out.is_empty());
    }
}
