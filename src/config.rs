//! Simulation configuration value object (§9): constructed once from CLI
//! arguments plus the parsed scene file, then passed by reference to every
//! component at construction — never mutated afterward, replacing the
//! original's process-wide config constants.

use std::path::{Path, PathBuf};

use clap::Parser;
use embassy_time::Duration;

use crate::error::ConfigError;
use crate::scene::Scene;

/// CLI surface (§6): a scene file path, a random seed, and a run duration,
/// each overridable by an environment variable. Exit code is 0 on clean
/// termination, non-zero on configuration error (`main.rs`).
#[derive(Debug, Parser)]
#[command(name = "aerial-mesh-sim", about = "Discrete-event simulator for aerial ad-hoc mesh networks")]
pub struct CliArgs {
    /// Path to the scene JSON file describing nodes, obstacles, and
    /// physical/MAC parameters.
    #[arg(long, value_name = "PATH")]
    pub scene: PathBuf,

    /// Seed for every explicitly-seeded random stream in the run.
    #[arg(long, env = "AEROSIM_SEED", default_value_t = 1)]
    pub seed: u64,

    /// Virtual run duration in milliseconds.
    #[arg(long = "duration-ms", env = "AEROSIM_DURATION_MS", default_value_t = 60_000)]
    pub duration_ms: u64,
}

/// Value object built once at startup and threaded through construction of
/// the scheduler, channel, and every node. Never mutated after `load`.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub scene: Scene,
    pub seed: u64,
    pub duration: Duration,
}

impl SimConfig {
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let scene = load_scene(&args.scene)?;
        validate_scene(&scene)?;
        Ok(SimConfig {
            scene,
            seed: args.seed,
            duration: Duration::from_millis(args.duration_ms),
        })
    }
}

fn load_scene(path: &Path) -> Result<Scene, ConfigError> {
    let path_str = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path_str.clone(), source })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { path: path_str, source })
}

/// Structural checks the deserializer can't express on its own: unique node
/// ids and in-bounds positions. Mirrors the teacher's `validate_scene`.
fn validate_scene(scene: &Scene) -> Result<(), ConfigError> {
    let mut seen = std::collections::BTreeSet::new();
    for node in &scene.nodes {
        if !seen.insert(node.node_id) {
            return Err(ConfigError::DuplicateNodeId(node.node_id));
        }
        let pos = node.position.planar();
        let in_bounds = pos.x >= scene.world_top_left.x && pos.x <= scene.world_bottom_right.x && pos.y >= scene.world_top_left.y && pos.y <= scene.world_bottom_right.y;
        if !in_bounds {
            return Err(ConfigError::OutOfBounds {
                node_id: node.node_id,
                reason: format!("position ({}, {}) outside world bounds", pos.x, pos.y),
            });
        }
    }
    if scene.nodes.is_empty() {
        return Err(ConfigError::InvalidParameter("scene must contain at least one node".to_string()));
    }
    Ok(())
}
