//! Energy plug-in interface and a linear joule-debit model.

use embassy_time::Duration;
use serde::Deserialize;

use crate::signal::dbm_to_mw;

#[derive(Debug, Deserialize, Clone)]
pub struct EnergyParameters {
    /// Joules debited per bit transmitted, independent of power (a fixed
    /// per-bit processing cost on top of the radio-power term).
    pub joules_per_bit: f32,
    /// Idle/flight power draw in watts, debited continuously regardless of
    /// radio activity.
    pub flight_power_watts: f32,
}

pub trait Energy {
    /// Debit the cost of transmitting `bits` at `power_dbm` for `duration`.
    fn debit_transmit(&mut self, bits: u64, power_dbm: f32, duration: Duration);
    /// Debit the cost of `dt` elapsed flight/idle time.
    fn debit_flight(&mut self, dt: Duration);
    /// Remaining energy budget in joules.
    fn remaining(&self) -> f32;
}

/// Debits joules linearly: a per-bit transmit cost plus the radiated power
/// integrated over air-time, and a constant flight/idle power draw.
/// Reaching zero does not error — `Drone Node` (see `node.rs`) checks
/// `remaining() > 0.0` before handing a packet to the MAC layer and goes
/// silently send-mute otherwise, per spec's `EnergyExhausted` semantics.
pub struct LinearBatteryEnergy {
    remaining_joules: f32,
    params: EnergyParameters,
}

impl LinearBatteryEnergy {
    pub fn new(initial_joules: f32, params: EnergyParameters) -> Self {
        LinearBatteryEnergy {
            remaining_joules: initial_joules,
            params,
        }
    }
}

impl Energy for LinearBatteryEnergy {
    fn debit_transmit(&mut self, bits: u64, power_dbm: f32, duration: Duration) {
        let power_w = dbm_to_mw(power_dbm) / 1000.0;
        let radiated_joules = power_w * duration.as_micros() as f32 / 1_000_000.0;
        let fixed_joules = bits as f32 * self.params.joules_per_bit;
        self.remaining_joules = (self.remaining_joules - radiated_joules - fixed_joules).max(0.0);
    }

    fn debit_flight(&mut self, dt: Duration) {
        let joules = self.params.flight_power_watts * dt.as_micros() as f32 / 1_000_000.0;
        self.remaining_joules = (self.remaining_joules - joules).max(0.0);
    }

    fn remaining(&self) -> f32 {
        self.remaining_joules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EnergyParameters {
        EnergyParameters {
            joules_per_bit: 0.0001,
            flight_power_watts: 1.0,
        }
    }

    #[test]
    fn transmit_and_flight_debit_reduce_remaining() {
        let mut energy = LinearBatteryEnergy::new(10.0, params());
        energy.debit_transmit(1000, 20.0, Duration::from_millis(100));
        let after_tx = energy.remaining();
        assert!(after_tx < 10.0);

        energy.debit_flight(Duration::from_secs(1));
        assert!(energy.remaining() < after_tx);
    }

    #[test]
    fn remaining_never_goes_negative() {
        let mut energy = LinearBatteryEnergy::new(0.001, params());
        energy.debit_transmit(100_000, 30.0, Duration::from_secs(10));
        assert_eq!(energy.remaining(), 0.0);
    }
}
