//! Error taxonomy.
//!
//! Transient and terminal-per-packet errors (`RoutingTransient`,
//! `MacFailure`, `PhyLoss`, `Collision`, `EnergyExhausted`, `TTLExpired`) are
//! absorbed by the pipeline and surfaced to `MetricsSink` rather than
//! propagated as `Result::Err` — they are not exceptional, they are outcomes.
//! Only `ConfigError` aborts the run, which is why it is the only variant
//! actually returned from a fallible function in this crate.

use std::fmt;

use crate::packet::{NodeId, PacketId};

/// Fatal configuration error, reported before the simulation starts.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: String, source: std::io::Error },
    Parse { path: String, source: serde_json::Error },
    OutOfBounds { node_id: NodeId, reason: String },
    DuplicateNodeId(NodeId),
    InvalidParameter(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "failed to read scene file '{path}': {source}"),
            ConfigError::Parse { path, source } => write!(f, "failed to parse scene file '{path}': {source}"),
            ConfigError::OutOfBounds { node_id, reason } => write!(f, "node {node_id} out of bounds: {reason}"),
            ConfigError::DuplicateNodeId(id) => write!(f, "duplicate node id {id} in scene file"),
            ConfigError::InvalidParameter(msg) => write!(f, "invalid configuration parameter: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Terminal, per-packet outcome recorded against a single packet's
/// lifetime. None of these abort the run; they are recorded as
/// `MetricsRecord`s by the component that observes them (see `metrics.rs`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketOutcome {
    /// Routing returned `NONE` for a hop; absorbed by moving the packet to
    /// the waiting list. Not itself a drop.
    RoutingTransient,
    /// ACK-timeout retries exhausted at the MAC layer.
    MacFailure { packet_id: PacketId, attempts: u8 },
    /// Channel policy dropped the transmission before it ever reached an
    /// inbox (probabilistic loss or out-of-range). Indistinguishable from a
    /// collision at the sending MAC; both present as ACK timeout there.
    PhyLoss { packet_id: PacketId },
    /// Resolver found SINR below the MCS threshold for this receiver.
    Collision { packet_id: PacketId, receiver: NodeId },
    /// Node has exhausted its energy budget and can no longer transmit.
    EnergyExhausted { node_id: NodeId },
    /// TTL reached zero at a forwarding node.
    TtlExpired { packet_id: PacketId, node_id: NodeId },
}

impl fmt::Display for PacketOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketOutcome::RoutingTransient => write!(f, "routing returned no next hop"),
            PacketOutcome::MacFailure { packet_id, attempts } => {
                write!(f, "packet {} exhausted {} MAC retransmit attempts", packet_id.0, attempts)
            }
            PacketOutcome::PhyLoss { packet_id } => write!(f, "packet {} dropped by channel policy", packet_id.0),
            PacketOutcome::Collision { packet_id, receiver } => {
                write!(f, "packet {} collided at receiver {}", packet_id.0, receiver)
            }
            PacketOutcome::EnergyExhausted { node_id } => write!(f, "node {node_id} exhausted its energy budget"),
            PacketOutcome::TtlExpired { packet_id, node_id } => {
                write!(f, "packet {} TTL expired at node {}", packet_id.0, node_id)
            }
        }
    }
}

impl std::error::Error for PacketOutcome {}
