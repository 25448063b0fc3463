//! CSMA/CA without RTS/CTS (§4.5.1): carrier sense, DIFS+backoff with
//! freeze-on-busy, SIFS ACK fast-path, exponential contention window.
//!
//! Carrier sense and backoff are quantized to `slot_time`: DIFS is treated
//! as `ceil(difs / slot_time)` slots so the whole WAITING period is a single
//! integer slot countdown, which makes the freeze-on-interruption rule exact
//! (the frozen remainder is just the untouched slot counter) rather than an
//! approximation over a raw `Duration`. Grounded in the teacher's polling
//! style in `simulation/network.rs`, generalized to an explicit per-attempt
//! state machine since the teacher's own MAC lives inside the external
//! `moonblokz_radio_lib` crate this system does not depend on.
//!
//! Every node runs as its own independent cooperative task (see
//! `node::spawn`), so the inbox this contends over is a shared
//! `Rc<RefCell<Inbox>>` rather than a plain borrow: a sending node's
//! `broadcast_put` writes directly into *other* nodes' inboxes while those
//! nodes' own tasks may be mid-suspension. Every borrow here is scoped to a
//! single synchronous expression and never held across an `.await`, which is
//! what keeps that sharing panic-free under single-threaded cooperative
//! scheduling (only one task's synchronous code section ever runs at a
//! time).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use embassy_time::{Duration, Timer};
use rand::rngs::StdRng;
use rand::Rng;

use crate::channel::{ChannelModel, ReceiverSnapshot};
use crate::energy::Energy;
use crate::mac::{MacOutcome, MacParameters};
use crate::packet::{NodeId, Packet, PacketId, TxMode};
use crate::resolver::Inbox;
use crate::scene::{Obstacle, Position};
use crate::scheduler::{self, with_timeout};
use crate::signal::{calculate_air_time, get_air_time_duration, McsParameters, PathLossParameters};

/// Everything one contention attempt needs to reach the channel and judge
/// the medium, gathered so `contend` doesn't need a dozen positional
/// arguments. Borrowed/cloned fresh for each call — nothing here outlives a
/// single MAC attempt.
pub struct CsmaEnv<'a> {
    pub mac: &'a MacParameters,
    pub mcs: &'a McsParameters,
    pub path_loss: &'a PathLossParameters,
    pub channel: &'a ChannelModel,
    pub obstacles: &'a [Obstacle],
    pub receivers: &'a [ReceiverSnapshot],
    pub inboxes: &'a BTreeMap<NodeId, Rc<RefCell<Inbox>>>,
    pub own_inbox: Rc<RefCell<Inbox>>,
    pub rng: &'a mut StdRng,
}

fn contention_window(mac: &MacParameters, attempts: u8) -> u32 {
    let cw = mac.cw_min.saturating_mul(1u32 << attempts.min(16));
    cw.min(mac.cw_max).max(1)
}

fn difs_slots(mac: &MacParameters) -> u32 {
    let difs_us = mac.difs.as_micros().max(1);
    let slot_us = mac.slot_time.as_micros().max(1);
    difs_us.div_ceil(slot_us) as u32
}

/// Sense the medium idle, then count down `remaining_slots` one slot at a
/// time, freezing (returning to sensing without consuming a slot) whenever
/// the medium is busy at a slot boundary — the frozen remainder is exactly
/// `remaining_slots` at the point of interruption, satisfying the
/// backoff-freeze property without any extra bookkeeping.
async fn sense_then_count_down(env: &CsmaEnv<'_>, mut remaining_slots: u32) {
    while remaining_slots > 0 {
        let now = scheduler::now();
        let busy = env.own_inbox.borrow().busy_until(now);
        if let Some(until) = busy {
            Timer::at(until).await;
            continue;
        }
        Timer::after(env.mac.slot_time).await;
        remaining_slots -= 1;
    }
}

/// Fan a just-transmitted packet out through the channel and append the
/// resulting records to every admitted receiver's inbox.
fn transmit(env: &CsmaEnv<'_>, packet: &Packet, sender_id: NodeId, sender_position: Position, tx_power_dbm: f32, duration: Duration) {
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

/// Run one full CSMA/CA send-and-retry cycle for `packet`.
pub async fn contend(env: &mut CsmaEnv<'_>, packet: &mut Packet, sender_id: NodeId, sender_position: Position, tx_power_dbm: f32, energy: &mut dyn Energy, ack: &AckWaiter) -> MacOutcome {
    let expects_ack = packet.is_data() && matches!(packet.mode, TxMode::Unicast(_));

    loop {
        let attempts = packet.retransmissions;
        let backoff_slots = {
            let cw = contention_window(env.mac, attempts);
            env.rng.gen_range(0..cw)
        };
        let total_slots = difs_slots(env.mac) + backoff_slots;
        sense_then_count_down(env, total_slots).await;

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
    }
}

/// Receiver-side fast-path (§4.5.1, last paragraph): a resolver-delivered
/// data packet whose current next-hop is this node replies with an Ack
/// after SIFS, bypassing the transmitting queue and backoff entirely —
/// SIFS is shorter than DIFS, so it always wins contention against any
/// peer that is simultaneously backing off to send new data.
pub async fn reply_with_ack(env: &CsmaEnv<'_>, ack_packet: Packet, sender_id: NodeId, sender_position: Position, tx_power_dbm: f32) {
    Timer::after(env.mac.sifs).await;
    let duration = get_air_time_duration(env.mcs, ack_packet.size_bits as usize / 8);
    transmit(env, &ack_packet, sender_id, sender_position, tx_power_dbm, duration);
}

/// Signals a node's in-flight AWAIT_ACK wait. One instance per node: the
/// buffer slot guarantees at most one MAC attempt (and therefore at most
/// one outstanding `wait_for`) is active at a time.
pub struct AckWaiter {
    signal: embassy_sync::signal::Signal<embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex, PacketId>,
}

impl Default for AckWaiter {
    fn default() -> Self {
        AckWaiter {
            signal: embassy_sync::signal::Signal::new(),
        }
    }
}

impl AckWaiter {
    pub fn notify(&self, acked_packet_id: PacketId) {
        self.signal.signal(acked_packet_id);
    }

    /// Resolves once an Ack matching `packet_id` is signalled. Mismatched
    /// signals (stale acks for a previous attempt the sender already gave
    /// up on) are ignored and waiting continues.
    pub async fn wait_for(&self, packet_id: PacketId) -> bool {
        loop {
            let acked = self.signal.wait().await;
            if acked == packet_id {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn contention_window_doubles_with_attempts_and_caps() {
        let mac = mac_params();
        assert_eq!(contention_window(&mac, 0), 16);
        assert_eq!(contention_window(&mac, 1), 32);
        assert_eq!(contention_window(&mac, 4), 256);
    }

    #[test]
    fn difs_rounds_up_to_whole_slots() {
        assert_eq!(difs_slots(&mac_params()), 3);
    }
}
