//! Inbox Resolver (§4.3): decides which newly completed Transmission
//! Records are delivered vs. corrupted by interference, and prunes records
//! that can no longer interfere with anything.
//!
//! Grounded in the teacher's `process_packet_reception` /
//! `process_all_packet_receptions` / `find_next_packet_to_process`
//! (`simulation/network.rs`), generalized from the teacher's RSSI-dominance
//! capture-effect heuristic to the plain SINR-vs-MCS-threshold test this
//! system specifies.

use std::collections::{BTreeMap, BTreeSet};

use embassy_time::{Duration, Instant};

use crate::packet::{PacketId, TransmissionRecord};
use crate::signal::{calculate_snr_limit, dbm_to_mw, McsParameters, PathLossParameters};

/// Per-node log of in-flight and recently completed Transmission Records.
/// Written by the channel on send; read and pruned here.
#[derive(Default)]
pub struct Inbox {
    records: BTreeMap<PacketId, TransmissionRecord>,
    /// Packet ids already evaluated by a resolver tick, so a record is
    /// never resolved twice (but can be re-armed if the same id is
    /// retransmitted and reinserted — see `insert`).
    resolved: BTreeSet<PacketId>,
}

/// Outcome of resolving one newly completed record.
pub struct ResolvedReception {
    pub packet_id: PacketId,
    pub packet: std::sync::Arc<crate::packet::Packet>,
    pub sinr_db: f32,
    pub delivered: bool,
    pub rssi_dbm: f32,
}

impl Inbox {
    pub fn insert(&mut self, packet_id: PacketId, record: TransmissionRecord) {
        self.records.insert(packet_id, record);
        self.resolved.remove(&packet_id);
    }

    /// Drop records whose end-time is older than `now - 2 * max_air_time`:
    /// they can no longer overlap anything still pending evaluation.
    pub fn prune(&mut self, now: Instant, max_air_time: Duration) {
        let horizon = Duration::from_micros(max_air_time.as_micros() * 2);
        let stale: Vec<PacketId> = self
            .records
            .iter()
            .filter(|(_, r)| now.checked_duration_since(r.end).map(|age| age > horizon).unwrap_or(false))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.records.remove(&id);
            self.resolved.remove(&id);
        }
    }

    /// Resolve every record whose air-time has ended (`end <= now`) and
    /// that has not yet been evaluated. Each is judged independently
    /// against the full set of records overlapping its interval — "none is
    /// privileged" per §4.3's tie-breaking rule.
    pub fn resolve_completed(&mut self, now: Instant, mcs: &McsParameters, path_loss: &PathLossParameters) -> Vec<ResolvedReception> {
        let newly_completed: Vec<PacketId> = self
            .records
            .iter()
            .filter(|(id, r)| r.end <= now && !self.resolved.contains(*id))
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::with_capacity(newly_completed.len());
        for id in newly_completed {
            let record = self.records.get(&id).expect("just collected from records").clone();
            let signal_mw = dbm_to_mw(record.rssi_dbm);
            let noise_mw = dbm_to_mw(path_loss.noise_floor);
            let interferers: Vec<f32> = self
                .records
                .values()
                .filter(|other| other.sender_id != record.sender_id || other.start != record.start)
                .filter(|other| other.overlaps(record.start, record.end))
                .map(|other| other.rssi_dbm)
                .collect();
            let interference_mw: f32 = interferers.iter().copied().map(dbm_to_mw).sum();

            let sinr_linear = signal_mw / (noise_mw + interference_mw);
            let sinr_db = 10.0 * sinr_linear.log10();
            let threshold_db = calculate_snr_limit(mcs);

            // Capture effect: a weak interferer is tolerated as long as the
            // wanted signal clears the noise-limited SINR threshold above,
            // but a comparable-strength interferer (within capture_threshold_db)
            // defeats capture entirely — neither signal is privileged, so both
            // overlapping transmissions are corrupted at this receiver.
            let strongest_interferer_dbm = interferers.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let captured = interferers.is_empty() || record.rssi_dbm - strongest_interferer_dbm >= mcs.capture_threshold_db;
            let delivered = sinr_db >= threshold_db && captured;

            self.resolved.insert(id);
            out.push(ResolvedReception {
                packet_id: id,
                packet: record.packet.clone(),
                sinr_db,
                delivered,
                rssi_dbm: record.rssi_dbm,
            });
        }
        out
    }

    /// Carrier sense (§4.5.1): `Some(end)` — the latest end-time among
    /// overlapping records — iff the medium is busy for node `n` right now,
    /// i.e. some record has `start <= now < end`.
    pub fn busy_until(&self, now: Instant) -> Option<Instant> {
        self.records.values().filter(|r| r.start <= now && now < r.end).map(|r| r.end).max()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{next_flow_id, Packet};
    use crate::scene::Position;
    use std::sync::Arc;

    fn mcs() -> McsParameters {
        McsParameters {
            bandwidth: 125_000,
            spreading_factor: 7,
            coding_rate: 1,
            preamble_symbols: 8.0,
            crc_enabled: true,
            low_data_rate_optimization: false,
            capture_threshold_db: 6.0,
        }
    }

    fn path_loss() -> PathLossParameters {
        PathLossParameters {
            path_loss_exponent: 2.0,
            shadowing_sigma: 0.0,
            path_loss_at_reference_distance: 40.0,
            noise_floor: -120.0,
        }
    }

    fn record(sender: u32, rssi_dbm: f32, start_ms: u64, end_ms: u64) -> TransmissionRecord {
        TransmissionRecord {
            packet: Arc::new(Packet::new_data(sender, 9, next_flow_id(), 0, 1000, 8, Instant::from_ticks(0))),
            sender_id: sender,
            tx_power_dbm: 10.0,
            start: Instant::from_millis(start_ms),
            end: Instant::from_millis(end_ms),
            sender_position: Position::new(0.0, 0.0, 0.0),
            rssi_dbm,
        }
    }

    #[test]
    fn lone_strong_signal_is_delivered() {
        let mut inbox = Inbox::default();
        let r = record(1, -60.0, 0, 10);
        inbox.insert(r.packet.id, r);
        let out = inbox.resolve_completed(Instant::from_millis(10), &mcs(), &path_loss());
        assert_eq!(out.len(), 1);
        assert!(out[0].delivered);
    }

    #[test]
    fn two_equal_power_overlapping_signals_both_corrupted() {
        let mut inbox = Inbox::default();
        let a = record(1, -80.0, 0, 10);
        let b = record(2, -80.0, 2, 12);
        inbox.insert(a.packet.id, a);
        inbox.insert(b.packet.id, b);
        let out = inbox.resolve_completed(Instant::from_millis(12), &mcs(), &path_loss());
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| !r.delivered));
    }

    #[test]
    fn prune_drops_records_past_twice_max_airtime() {
        let mut inbox = Inbox::default();
        let r = record(1, -60.0, 0, 10);
        inbox.insert(r.packet.id, r);
        inbox.prune(Instant::from_millis(10_000), Duration::from_millis(5));
        assert!(inbox.is_empty());
    }
}
