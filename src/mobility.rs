//! Mobility plug-in interface and two stand-ins (`StaticMobility`,
//! `LinearMobility`). Both are pure functions of virtual time, so unlike the
//! MAC/routing/channel plug-ins they need no dedicated tick task: a node's
//! live position is simply `mobility.position(node_id, now)`, computed on
//! demand wherever a position snapshot is needed (route queries, channel
//! fan-out). Real mobility models (Gauss-Markov, random walk/waypoint) are
//! out of scope; these exist to give the channel and routing something
//! concrete to query.

use embassy_time::Instant;
use serde::Deserialize;

use crate::packet::NodeId;
use crate::scene::Position;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MobilityKind {
    #[default]
    Static,
    Linear {
        velocity_m_per_s: Position,
    },
}

pub trait Mobility {
    fn position(&self, node_id: NodeId, now: Instant) -> Position;
}

/// Node never moves from its scene-file starting position.
pub struct StaticMobility {
    pub position: Position,
}

impl Mobility for StaticMobility {
    fn position(&self, _node_id: NodeId, _now: Instant) -> Position {
        self.position
    }
}

/// Constant-velocity straight-line flight from a starting position.
/// Deterministic given `now`, so no per-node random stream is needed.
pub struct LinearMobility {
    pub start: Position,
    pub velocity_m_per_s: Position,
}

impl Mobility for LinearMobility {
    fn position(&self, _node_id: NodeId, now: Instant) -> Position {
        let elapsed_s = now.as_ticks() as f64 / embassy_time::TICK_HZ as f64;
        Position::new(
            self.start.x + self.velocity_m_per_s.x * elapsed_s,
            self.start.y + self.velocity_m_per_s.y * elapsed_s,
            self.start.z + self.velocity_m_per_s.z * elapsed_s,
        )
    }
}
