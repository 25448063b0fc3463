//! MAC contention state machines (§4.5): CSMA/CA with carrier sense and
//! exponential backoff, and pure ALOHA. Both are driven as ordinary
//! `async fn`s on the deterministic scheduler rather than `dyn Trait`
//! objects — each node picks its variant once at construction (`MacKind`)
//! and the buffer-slot holder calls the matching free function directly,
//! the same call-site dispatch the channel module uses for its variants.

pub mod aloha;
pub mod csma;

use embassy_time::Duration;
use serde::Deserialize;

use crate::packet::PacketId;

/// `embassy_time::Duration` has no `serde` feature enabled in this crate's
/// dependency table, so scene files encode every MAC timing field as plain
/// microseconds and `MacParameters` converts them once at deserialize time.
mod duration_us {
    use embassy_time::Duration;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}

/// Protocol-defined timing and retry parameters, shared by both MAC
/// variants (ALOHA ignores the contention-window/DIFS fields). Left to the
/// scene configuration per §9's "CW schedule constants are protocol-defined
/// and left to configuration" open question.
#[derive(Debug, Deserialize, Clone)]
pub struct MacParameters {
    pub cw_min: u32,
    pub cw_max: u32,
    #[serde(with = "duration_us")]
    pub slot_time: Duration,
    #[serde(with = "duration_us")]
    pub difs: Duration,
    #[serde(with = "duration_us")]
    pub sifs: Duration,
    /// Extra slack added on top of expected ACK air-time when computing the
    /// AWAIT_ACK timeout, to absorb scheduling jitter.
    #[serde(with = "duration_us")]
    pub ack_slack: Duration,
    pub max_retries: u8,
    /// Pure ALOHA's randomized-retry multiplier `k` (§4.5.2): retry delay is
    /// uniform over `[0, k * attempts * slot_time]`.
    pub aloha_retry_k: u32,
}

/// Which state machine a node's scene entry selects.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MacKind {
    #[default]
    CsmaCa,
    Aloha,
}

/// Outcome of one MAC attempt to deliver `packet_id` to the channel,
/// reported to the pipeline so it can release the buffer slot and, for
/// data packets, tell routing about the ack/timeout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MacOutcome {
    /// Transmitted; for unicast data, the matching Ack arrived in time.
    Delivered,
    /// Transmitted a non-acked packet (control/broadcast); no ACK is
    /// expected, so completion is immediate.
    Sent,
    /// Retransmit cap exceeded — terminal per-packet failure (§4.5.3).
    RetriesExhausted { attempts: u8 },
}

/// A timed-out wait for an Ack of `packet_id`. Shared by both variants'
/// AWAIT_ACK step.
#[derive(Debug, Clone, Copy)]
pub struct AwaitAck {
    pub packet_id: PacketId,
}
