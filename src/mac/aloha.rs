//! Pure ALOHA (§4.5.2): transmit immediately without sensing or backoff; on
//! ACK timeout, wait a randomized interval that grows with attempt count,
//! then retry, up to the same retransmit cap as CSMA/CA.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use embassy_time::{Duration, Timer};
use rand::rngs::StdRng;
use rand::Rng;

use crate::channel::{ChannelModel, ReceiverSnapshot};
use crate::energy::Energy;
use crate::mac::csma::AckWaiter;
use crate::mac::{MacOutcome, MacParameters};
use crate::packet::{NodeId, Packet, TxMode};
use crate::resolver::Inbox;
use crate::scene::{Obstacle, Position};
use crate::scheduler::{self, with_timeout};
use crate::signal::{calculate_air_time, get_air_time_duration, McsParameters, PathLossParameters};

pub struct AlohaEnv<'a> {
    pub mac: &'a MacParameters,
    pub mcs: &'a McsParameters,
    pub path_loss: &'a PathLossParameters,
    pub channel: &'a ChannelModel,
    pub obstacles: &'a [Obstacle],
    pub receivers: &'a [ReceiverSnapshot],
    pub inboxes: &'a BTreeMap<NodeId, Rc<RefCell<Inbox>>>,
    pub rng: &'a mut StdRng,
}

/// Uniform over `[0, k * attempts * slot_time]`, per §4.5.2's example
/// schedule. `attempts` is the retransmission count just incurred, so the
/// very first retry (attempts == 1) already has a non-degenerate range.
fn retry_delay(mac: &MacParameters, attempts: u8, rng: &mut StdRng) -> Duration {
    let span_slots = mac.aloha_retry_k.saturating_mul(attempts.max(1) as u32);
    if span_slots == 0 {
        return Duration::from_ticks(0);
    }
    let slots = rng.gen_range(0..=span_slots);
    Duration::from_micros(mac.slot_time.as_micros() * slots as u64)
}

fn transmit(env: &AlohaEnv<'_>, packet: &Packet, sender_id: NodeId, sender_position: Position, tx_power_dbm: f32, duration: Duration) {
    let start = scheduler::now();
    let packet_arc = Arc::new(packet.clone());
    let admitted = env
        .channel
        .broadcast_put(packet_arc, sender_id, sender_position, tx_power_dbm, start, duration, env.receivers, env.obstacles, env.path_loss);
    for (receiver_id, record) in admitted {
        if let Some(inbox) = env.inboxes.get(&receiver_id) {
            let packet_id = record.packet.id;
            inbox.borrow_mut().insert(packet_id, record);
        }
    }
}

/// Receiver-side ack reply for a node whose MAC is pure ALOHA: transmitted
/// immediately, with no carrier sense or SIFS wait — consistent with
/// ALOHA's "no sensing" model for data, since there is no contention window
/// concept to delay into.
pub async fn reply_with_ack(env: &AlohaEnv<'_>, ack_packet: Packet, sender_id: NodeId, sender_position: Position, tx_power_dbm: f32) {
    let duration = get_air_time_duration(env.mcs, ack_packet.size_bits as usize / 8);
    transmit(env, &ack_packet, sender_id, sender_position, tx_power_dbm, duration);
}

pub async fn contend(env: &mut AlohaEnv<'_>, packet: &mut Packet, sender_id: NodeId, sender_position: Position, tx_power_dbm: f32, energy: &mut dyn Energy, ack: &AckWaiter) -> MacOutcome {
    let expects_ack = packet.is_data() && matches!(packet.mode, TxMode::Unicast(_));

    loop {
        let duration = get_air_time_duration(env.mcs, packet.size_bits as usize / 8);
        transmit(env, packet, sender_id, sender_position, tx_power_dbm, duration);
        energy.debit_transmit(packet.size_bits as u64, tx_power_dbm, duration);

        if !expects_ack {
            return MacOutcome::Sent;
        }

        let ack_air_time = Duration::from_micros((calculate_air_time(env.mcs, 1) * 1_000_000.0) as u64);
        let timeout = env.mac.sifs + ack_air_time + env.mac.ack_slack;
        let got_ack = with_timeout(timeout, ack.wait_for(packet.id)).await.unwrap_or(false);

        if got_ack {
            return MacOutcome::Delivered;
        }

        packet.retransmissions += 1;
        if packet.retransmissions > env.mac.max_retries {
            return MacOutcome::RetriesExhausted { attempts: packet.retransmissions };
        }

        let delay = retry_delay(env.mac, packet.retransmissions, env.rng);
        Timer::after(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn mac_params() -> MacParameters {
        MacParameters {
            cw_min: 16,
            cw_max: 256,
            slot_time: Duration::from_micros(20),
            difs: Duration::from_micros(50),
            sifs: Duration::from_micros(10),
            ack_slack: Duration::from_micros(20),
            max_retries: 7,
            aloha_retry_k: 2,
        }
    }

    #[test]
    fn retry_delay_range_grows_with_attempts() {
        let mac = mac_params();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let d = retry_delay(&mac, 1, &mut rng);
            assert!(d.as_micros() <= mac.slot_time.as_micros() * 2);
        }
        for _ in 0..50 {
            let d = retry_delay(&mac, 5, &mut rng);
            assert!(d.as_micros() <= mac.slot_time.as_micros() * 10);
        }
    }
}
