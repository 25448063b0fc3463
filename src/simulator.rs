//! Simulator Harness (§4.7): builds the node registry and the per-session
//! application traffic generators, spawns one cooperative task per node plus
//! one per session on a dedicated Embassy executor thread, and drains
//! virtual time on the calling thread until the configured duration is
//! reached. Mirrors the teacher's `network_task`/`node_task` split
//! (`simulation/network.rs`, `simulation/node_task.rs`): a background
//! executor thread runs forever, spawned with `Box::leak` for a `'static`
//! executor exactly as the teacher's `main.rs` does, while this thread pumps
//! the deterministic clock forward (`time_driver::advance_to_next_deadline`).
//!
//! Every node runs as its own task so that many nodes really do act
//! simultaneously in virtual time (§5): one node mid-backoff does not block
//! another node's feed loop from running. Cross-node state a sender needs —
//! another node's inbox, its live position — lives in scene-wide `Rc`-shared
//! tables (see `node::InboxTable`/`node::PositionTable`) built once, before
//! any task is spawned, rather than inside the owned per-task `Node`.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::thread;

use embassy_executor::{Executor, Spawner};
use embassy_time::{Duration, Timer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};

use crate::channel::ChannelModel;
use crate::config::SimConfig;
use crate::energy::LinearBatteryEnergy;
use crate::metrics::{MetricsSink, MetricsSummary};
use crate::mobility::{LinearMobility, Mobility, StaticMobility};
use crate::node::{InboxTable, Node, NodeEnv, PositionTable};
use crate::packet::{next_flow_id, NodeId, Packet};
use crate::resolver::Inbox;
use crate::routing::{FloodingRouting, Routing, StaticRouting};
use crate::scene::{MobilityKind, RoutingKind, Scene, SessionSpec, TrafficMode};
use crate::signal::get_air_time_duration;

/// Upper bound on the number of simultaneously-spawned node tasks. Embassy
/// task pools are sized at compile time; a scene with more nodes than this
/// is rejected at spawn time rather than silently truncated.
const MAX_NODES: usize = 256;
const MAX_SESSIONS: usize = 128;
/// A node's application-layer injection mailbox (§4.7): a plain FIFO a
/// session's generator pushes into and the node's own feed loop drains.
/// Synchronous and unbounded rather than an `embassy-sync` channel — every
/// node task already drains its mailbox once per tick regardless of load, so
/// there is nothing a bounded, awaitable handoff buys here, and a blocking
/// `send().await` would be a suspension point this driver's deterministic
/// clock can't see (see `time_driver`'s module docs), since it would resolve
/// only when some *other* task's later tick drains it rather than through a
/// tracked `Timer`/`schedule_wake` registration.
type InjectQueue = Rc<RefCell<VecDeque<Packet>>>;
type InjectTable = Rc<BTreeMap<NodeId, InjectQueue>>;

/// Constructed once from a [`SimConfig`] and never mutated afterward, per
/// §9's config-value-object design note.
pub struct Simulator {
    config: SimConfig,
    metrics: MetricsSink,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        Simulator {
            config,
            metrics: MetricsSink::new(),
        }
    }

    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    /// Drive the event loop to completion: spawn every node/session task on
    /// a background Embassy executor thread, then repeatedly jump virtual
    /// time to the next scheduled deadline until the configured run duration
    /// is reached.
    pub fn run(&self) {
        let scene = self.config.scene.clone();
        let seed = self.config.seed;
        let metrics = self.metrics.clone();
        // Relative to the virtual clock's value at the start of this run,
        // not an absolute tick count: the clock never resets between runs
        // sharing a process (e.g. a test binary driving several scenarios).
        let target_ticks = crate::time_driver::now_ticks().saturating_add(self.config.duration.as_ticks());

        log::info!("starting simulation: {} node(s), {} session(s), seed={seed}", scene.nodes.len(), scene.sessions.len());

        thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .name("aerial-mesh-executor".to_string())
            .spawn(move || {
                // INTENTIONAL LEAK: Box::leak gives the Embassy executor a
                // 'static lifetime. It lives for the rest of the process;
                // there is no shutdown path because the pump loop below
                // simply stops pumping virtual time once it reaches the
                // configured duration and the process exits shortly after.
                let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
                executor.run(|spawner| spawn_scene(spawner, &scene, seed, metrics));
            })
            .expect("failed to spawn embassy executor thread");

        loop {
            if crate::time_driver::now_ticks() >= target_ticks {
                break;
            }
            if !crate::time_driver::advance_to_next_deadline() {
                crate::time_driver::wait_for_deadline();
                continue;
            }
            crate::time_driver::wait_for_reactions_to_settle();
        }

        log::info!("simulation reached configured duration at tick {}", crate::time_driver::now_ticks());
    }

    pub fn run_and_summarize(&self) -> MetricsSummary {
        self.run();
        self.metrics.summarize()
    }
}

fn spawn_scene(spawner: Spawner, scene: &Scene, seed: u64, metrics: MetricsSink) {
    assert!(scene.nodes.len() <= MAX_NODES, "scene has more nodes than the {MAX_NODES}-node task pool supports");
    assert!(scene.sessions.len() <= MAX_SESSIONS, "scene has more sessions than the {MAX_SESSIONS}-session task pool supports");

    let max_packet_bytes = scene.sessions.iter().map(|s| (s.packet_size_bits as usize / 8).max(1)).max().unwrap_or(256).max(8);
    let max_air_time = get_air_time_duration(&scene.mcs_parameters, max_packet_bytes);

    let env = Rc::new(NodeEnv {
        mac_params: scene.mac_parameters.clone(),
        mcs: scene.mcs_parameters.clone(),
        path_loss: scene.path_loss_parameters.clone(),
        channel: ChannelModel::from_config(&scene.channel, seed),
        obstacles: scene.obstacles.clone(),
        all_node_ids: scene.nodes.iter().map(|n| n.node_id).collect(),
        max_air_time,
    });
    let tick = env.mac_params.slot_time;

    let inboxes: InboxTable = Rc::new(scene.nodes.iter().map(|n| (n.node_id, Rc::new(RefCell::new(Inbox::default())))).collect());
    let positions: PositionTable = Rc::new(RefCell::new(BTreeMap::new()));
    let inject_queues: InjectTable = Rc::new(scene.nodes.iter().map(|n| (n.node_id, Rc::new(RefCell::new(VecDeque::new())))).collect());

    let now = crate::scheduler::now();
    for node_spec in &scene.nodes {
        let mobility: Box<dyn Mobility> = match node_spec.mobility {
            MobilityKind::Static => Box::new(StaticMobility { position: node_spec.position }),
            MobilityKind::Linear { velocity_m_per_s } => Box::new(LinearMobility {
                start: node_spec.position,
                velocity_m_per_s,
            }),
        };
        let routing: Box<dyn Routing> = match node_spec.routing {
            RoutingKind::Flooding => Box::new(FloodingRouting::default()),
            RoutingKind::Static => {
                let mut static_routing = StaticRouting::default();
                for route in &node_spec.static_routes {
                    static_routing.set_route(route.destination, route.next_hop);
                }
                Box::new(static_routing)
            }
        };
        let energy = Box::new(LinearBatteryEnergy::new(node_spec.initial_energy_joules, scene.energy_parameters.clone()));

        let node = Node::new(
            node_spec.node_id,
            node_spec.tx_power_dbm,
            node_spec.mac_kind,
            mobility,
            routing,
            energy,
            metrics.clone(),
            seed.wrapping_add(node_spec.node_id as u64),
            Duration::from_micros(scene.position_update_interval_us),
            now,
            inboxes.clone(),
            positions.clone(),
        );

        let inject_queue = inject_queues.get(&node_spec.node_id).expect("registered above").clone();
        log::debug!("spawning node {}", node_spec.node_id);
        spawner.must_spawn(node_task(node, env.clone(), inject_queue, tick));
    }

    for session in &scene.sessions {
        let Some(inject_tx) = inject_queues.get(&session.source).cloned() else {
            log::warn!("session source {} is not a known node id; skipping session", session.source);
            continue;
        };
        let session_seed = seed.wrapping_add(0x5EED_0000_0000_0000u64).wrapping_add(session.source as u64).wrapping_add((session.destination as u64) << 16);
        spawner.must_spawn(session_task(session.clone(), inject_tx, session_seed));
    }
}

#[embassy_executor::task(pool_size = MAX_NODES)]
async fn node_task(mut node: Node, env: Rc<NodeEnv>, inject_queue: InjectQueue, tick: Duration) {
    loop {
        let now = crate::scheduler::now();
        while let Some(packet) = inject_queue.borrow_mut().pop_front() {
            node.inject(packet, now);
        }
        node.run_feed_loop_once(&env).await;
        node.run_resolver_tick(&env).await;
        Timer::after(tick).await;
    }
}

/// Generates Data packets for one application session (GLOSSARY: "Session")
/// at the configured inter-arrival rate and hands each one to its source
/// node's injection mailbox.
#[embassy_executor::task(pool_size = MAX_SESSIONS)]
async fn session_task(spec: SessionSpec, inject_tx: InjectQueue, seed: u64) {
    let flow_id = next_flow_id();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sequence: u32 = 0;

    loop {
        let delay = match spec.mode {
            TrafficMode::Uniform { interval_us } => Duration::from_micros(interval_us),
            TrafficMode::Poisson { rate_per_sec } => {
                let exp = Exp::new(rate_per_sec).expect("session rate_per_sec must be positive");
                let seconds: f64 = exp.sample(&mut rng);
                Duration::from_micros((seconds * 1_000_000.0).round() as u64)
            }
        };
        Timer::after(delay).await;

        let now = crate::scheduler::now();
        let packet = Packet::new_data(spec.source, spec.destination, flow_id, sequence, spec.packet_size_bits, spec.ttl, now);
        sequence += 1;
        inject_tx.borrow_mut().push_back(packet);
    }
}
