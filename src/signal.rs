//! Physical-layer signal and timing calculations.
//!
//! - Log-distance path loss with optional log-normal shadowing
//! - LoRa-inspired airtime and SINR-threshold estimates for the configured
//!   modulation and coding scheme (MCS)
//! - Effective communication distance from a simple link budget
//!
//! Units:
//! - Power: dBm, mW (conversion provided)
//! - Time: seconds (f32) for the formulas, `embassy_time::Duration` at the API boundary
//! - Distance: meters

use embassy_time::Duration;
use rand::thread_rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

/// Parameters of the log-distance path loss model with log-normal shadowing.
#[derive(Debug, Deserialize, Clone)]
pub struct PathLossParameters {
    /// Path loss exponent (n). 2.0 is free space; 2.7-3.5 is typical for
    /// urban clutter between ground-level obstacles and airborne nodes.
    pub path_loss_exponent: f32,
    /// Standard deviation for log-normal shadowing (sigma) in dB. 0.0
    /// disables shadowing.
    pub shadowing_sigma: f32,
    /// Path loss at the reference distance d0 = 1 meter, in dB.
    pub path_loss_at_reference_distance: f32,
    /// Receiver thermal noise floor in dBm.
    pub noise_floor: f32,
}

/// Modulation and coding scheme parameters, LoRa-inspired: spreading factor
/// trades airtime for receiver sensitivity.
#[derive(Debug, Deserialize, Clone)]
pub struct McsParameters {
    pub bandwidth: u32,
    pub spreading_factor: u8,
    pub coding_rate: u32,
    pub preamble_symbols: f32,
    pub crc_enabled: bool,
    pub low_data_rate_optimization: bool,
    /// Minimum SINR (dB) margin above the noise-limited threshold for the
    /// capture effect to destroy a later, overlapping weaker packet.
    pub capture_threshold_db: f32,
}

/// Calculate the path loss (in dB) at a given distance using a log-distance
/// path loss model with log-normal shadowing.
///
/// `PL(d) = PL(d0) + 10 * n * log10(d/d0) + X_sigma`, `d0` = 1 meter.
pub fn calculate_path_loss(distance: f32, params: &PathLossParameters) -> f32 {
    if distance < 1.0 {
        return params.path_loss_at_reference_distance;
    }
    let path_loss = params.path_loss_at_reference_distance + 10.0 * params.path_loss_exponent * distance.log10();
    let shadowing = if params.shadowing_sigma > 0.0 {
        let normal = Normal::new(0.0_f32, params.shadowing_sigma).expect("invalid normal sigma");
        let mut rng = thread_rng();
        normal.sample(&mut rng)
    } else {
        0.0
    };
    path_loss + shadowing
}

/// Estimate a deterministic "effective distance" based on a basic link
/// budget without sampling shadowing. Used for range checks.
///
/// Solving `P_tx - PL(d) = receiving_limit` for `d` with `PL(d) = PL(d0) +
/// 10*n*log10(d)` gives `d = 10^((P_tx - RL - PL0) / (10n))`.
pub fn calculate_effective_distance(tx_power_dbm: f32, mcs: &McsParameters, path_loss_parameters: &PathLossParameters) -> f32 {
    let pl0 = path_loss_parameters.path_loss_at_reference_distance;
    let rl = calculate_receiving_limit_with_basic_noise(mcs, path_loss_parameters);
    let numerator = tx_power_dbm - rl - pl0;
    let denom = 10.0 * path_loss_parameters.path_loss_exponent;
    if numerator <= 0.0 {
        return 0.0;
    }
    10.0_f32.powf(numerator / denom)
}

pub fn calculate_receiving_limit_with_basic_noise(mcs: &McsParameters, path_loss_parameters: &PathLossParameters) -> f32 {
    path_loss_parameters.noise_floor + calculate_snr_limit(mcs)
}

pub fn calculate_snr_limit(mcs: &McsParameters) -> f32 {
    match mcs.spreading_factor {
        5 => -2.5,
        6 => -5.0,
        7 => -7.5,
        8 => -10.0,
        9 => -12.5,
        10 => -15.0,
        11 => -17.5,
        12 => -20.0,
        _ => -20.0,
    }
}

/// Air time in seconds for a payload of `payload_size` bytes under `mcs`,
/// following the standard LoRa symbol-count formula (SX127x/LoRa spec,
/// explicit header mode).
pub fn calculate_air_time(mcs: &McsParameters, payload_size: usize) -> f32 {
    let symbol_time = 2.0_f32.powi(mcs.spreading_factor as i32) / mcs.bandwidth as f32;
    let preamble_time = (mcs.preamble_symbols + 4.25) * symbol_time;

    let sf = mcs.spreading_factor as f32;
    let pl = payload_size as f32;
    let crc = if mcs.crc_enabled { 1.0 } else { 0.0 };
    let de = if mcs.low_data_rate_optimization { 1.0 } else { 0.0 };
    let ih = 0.0_f32;
    let cr = mcs.coding_rate as f32;

    let denom = 4.0 * (sf - 2.0 * de);
    let numerator = 8.0 * pl - 4.0 * sf + 28.0 + 16.0 * crc - 20.0 * ih;
    let base = (numerator / denom).ceil();
    let payload_symbols = 8.0 + (base * (cr + 4.0)).max(0.0);

    preamble_time + payload_symbols * symbol_time
}

/// Instantaneous RSSI (dBm) at a given distance: `RSSI = P_tx - PL(d)`.
/// Stochastic because `calculate_path_loss` samples shadowing.
pub fn calculate_rssi(distance: f32, tx_power_dbm: f32, params: &PathLossParameters) -> f32 {
    let path_loss_db = calculate_path_loss(distance, params);
    tx_power_dbm - path_loss_db
}

pub fn dbm_to_mw(dbm: f32) -> f32 {
    10f32.powf(dbm / 10.0)
}

pub fn mw_to_dbm(mw: f32) -> f32 {
    10.0 * mw.log10()
}

pub fn get_preamble_time(mcs: &McsParameters) -> Duration {
    let symbol_time = 2.0_f32.powi(mcs.spreading_factor as i32) / mcs.bandwidth as f32;
    Duration::from_micros(((mcs.preamble_symbols + 4.25) * symbol_time * 1_000_000.0) as u64)
}

pub fn get_air_time_duration(mcs: &McsParameters, payload_size: usize) -> Duration {
    Duration::from_micros((calculate_air_time(mcs, payload_size) * 1_000_000.0) as u64)
}
