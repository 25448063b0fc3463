//! Static scene description: world bounds, obstacles, and per-node initial
//! state, loaded from a JSON config file.

use serde::Deserialize;

use crate::energy::EnergyParameters;
use crate::mac::{MacKind, MacParameters};
use crate::mobility::MobilityKind;
use crate::packet::NodeId;
use crate::routing::RoutingKind;
use crate::signal::{McsParameters, PathLossParameters};

/// Three-dimensional node position in meters. Drones move in three
/// dimensions even though line-of-sight obstacle checks (inherited from the
/// teacher's ground-station geometry) are evaluated on the horizontal
/// projection only — see [`Point`].
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z }
    }

    /// Horizontal projection, used by the obstacle line-of-sight test.
    pub fn planar(&self) -> Point {
        Point { x: self.x, y: self.y }
    }
}

/// Simple 2D point, used only for the horizontal obstacle/line-of-sight
/// geometry (see `geometry` module).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Rectangle position with two corners.
#[derive(Debug, Deserialize, Clone)]
pub struct RectPos {
    #[serde(rename = "top-left-position")]
    pub top_left: Point,
    #[serde(rename = "bottom-right-position")]
    pub bottom_right: Point,
}

/// Circle position defined by its center and radius (meters).
#[derive(Debug, Deserialize, Clone)]
pub struct CirclePos {
    #[serde(rename = "center_position")]
    pub center: Point,
    pub radius: f64,
}

/// Obstacles are projected vertical prisms in the horizontal plane; they
/// block line-of-sight between two nodes regardless of altitude. This is a
/// deliberate simplification of true 3D occlusion, documented in
/// `DESIGN.md`.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum Obstacle {
    #[serde(rename = "rectangle")]
    Rectangle {
        #[serde(flatten)]
        position: RectPos,
    },
    #[serde(rename = "circle")]
    Circle {
        #[serde(flatten)]
        position: CirclePos,
    },
}

/// Per-node spec as it appears in the scene file: initial position, radio
/// transmit power, and the plug-in selections for this node.
#[derive(Debug, Deserialize, Clone)]
pub struct NodeSpec {
    pub node_id: NodeId,
    pub position: Position,
    pub tx_power_dbm: f32,
    #[serde(default)]
    pub routing: RoutingKind,
    /// Pre-seeded destination -> next-hop entries, applied at construction
    /// when `routing` is [`RoutingKind::Static`] (ignored otherwise). Without
    /// this a `StaticRouting` node could never route anything: nothing in
    /// the scene file would ever call `StaticRouting::set_route`.
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
    #[serde(default)]
    pub mobility: MobilityKind,
    #[serde(default)]
    pub mac_kind: MacKind,
    #[serde(default)]
    pub initial_energy_joules: f32,
}

/// One pre-seeded entry for [`NodeSpec::static_routes`].
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct StaticRoute {
    pub destination: NodeId,
    pub next_hop: NodeId,
}

/// How an application session's packets are spaced in time (§4.7): a fixed
/// interval, or exponentially-distributed arrivals (`rand_distr::Exp`) for a
/// Poisson traffic source.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrafficMode {
    Uniform { interval_us: u64 },
    Poisson { rate_per_sec: f64 },
}

/// An application-layer flow between a fixed source/destination pair
/// (GLOSSARY: "Session"), generating Data packets per `mode` until the
/// harness's end condition is reached.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionSpec {
    pub source: NodeId,
    pub destination: NodeId,
    pub mode: TrafficMode,
    #[serde(default = "default_packet_size_bits")]
    pub packet_size_bits: u32,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
}

fn default_packet_size_bits() -> u32 {
    1000
}

fn default_ttl() -> u8 {
    16
}

/// Root structure describing the whole scene: world bounds, shared physical
/// and MAC parameters, obstacles, and the node roster.
#[derive(Debug, Deserialize, Clone)]
pub struct Scene {
    pub path_loss_parameters: PathLossParameters,
    pub mcs_parameters: McsParameters,
    pub mac_parameters: MacParameters,
    pub energy_parameters: EnergyParameters,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub sessions: Vec<SessionSpec>,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    #[serde(default)]
    pub channel: crate::channel::ChannelConfig,
    pub world_top_left: Point,
    pub world_bottom_right: Point,
    /// Tick on which every node re-reads its mobility position (§4.6).
    #[serde(default = "default_position_update_interval_us", rename = "position_update_interval_us")]
    pub position_update_interval_us: u64,
}

fn default_position_update_interval_us() -> u64 {
    1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_projects_to_planar_point() {
        let p = Position::new(1.0, 2.0, 300.0);
        let planar = p.planar();
        assert_eq!(planar.x, 1.0);
        assert_eq!(planar.y, 2.0);
    }
}
