//! Background simulation: per-category physics schedulers.
//!
//! Each world owns one scheduler per [`TaskCategory`]. A scheduler is a
//! single tokio task draining a delay queue of [`PhysicsTask`]s; after a task
//! runs it re-arms itself with whatever delay it returns. Tasks never write
//! the block store -- they read it through brief shared locks and submit
//! effects as [`BlockUpdate`]s into the world's update queue, where the tick
//! drain applies and broadcasts them.
//!
//! Schedulers start lazily (a physics flag turned on, a life zone
//! registered) and stop when nothing needs them; `stop` is cooperative and
//! returns only once the scheduler task has actually ended, so no straggler
//! keeps enqueueing updates afterwards.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use opencube_engine::block::{self, BlockId, BlockRegistry};
use opencube_engine::queue::{BlockUpdate, UpdateQueue};
use opencube_engine::store::BlockStore;

/// Shared read access to a world's grid and update queue, handed to every
/// scheduler the world starts.
pub struct PhysicsContext {
    pub store: Arc<RwLock<Option<BlockStore>>>,
    pub queue: Arc<UpdateQueue>,
    pub registry: Arc<BlockRegistry>,
}

impl PhysicsContext {
    /// Read one block. Unloaded map and out-of-range coordinates both read
    /// as UNDEFINED, which no task acts on.
    pub fn block_at(&self, x: i32, y: i32, z: i32) -> BlockId {
        match self.store.read().expect("store cell poisoned").as_ref() {
            Some(store) => store.get(x, y, z),
            None => BlockId::UNDEFINED,
        }
    }

    pub fn enqueue(&self, update: BlockUpdate) {
        self.queue.enqueue(update);
    }
}

/// The fixed task categories. One scheduler slot per category per world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    Physics,
    Water,
    Sand,
    Gun,
    Life,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 5] = [
        TaskCategory::Physics,
        TaskCategory::Water,
        TaskCategory::Sand,
        TaskCategory::Gun,
        TaskCategory::Life,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TaskCategory::Physics => "physics",
            TaskCategory::Water => "water",
            TaskCategory::Sand => "sand",
            TaskCategory::Gun => "gun",
            TaskCategory::Life => "life",
        }
    }

    fn index(self) -> usize {
        match self {
            TaskCategory::Physics => 0,
            TaskCategory::Water => 1,
            TaskCategory::Sand => 2,
            TaskCategory::Gun => 3,
            TaskCategory::Life => 4,
        }
    }
}

/// Per-world physics feature flags. Explicit struct so lifecycle transitions
/// (which flags start/stop which schedulers) stay auditable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicsFlags {
    pub tnt: bool,
    pub water: bool,
    pub sand: bool,
    pub plant: bool,
    pub gun: bool,
}

impl PhysicsFlags {
    /// Whether this flag set keeps the given category's scheduler alive.
    /// Life is driven by registered zones, not flags.
    pub fn wants(&self, category: TaskCategory) -> bool {
        match category {
            TaskCategory::Physics => self.tnt || self.plant,
            TaskCategory::Water => self.water,
            TaskCategory::Sand => self.sand,
            TaskCategory::Gun => self.gun,
            TaskCategory::Life => false,
        }
    }
}

/// A named region running a cellular life simulation on one horizontal
/// plane. Owned by a loaded map; resumed against the new map when the map is
/// replaced.
#[derive(Debug, Clone)]
pub struct LifeZone {
    pub name: String,
    pub min: (i32, i32),
    pub max: (i32, i32),
    pub plane_z: i32,
    pub alive_block: BlockId,
    pub step: Duration,
}

/// The closed set of simulation behaviors. Adding one is a new variant plus
/// a `run` arm, nothing more.
#[derive(Debug, Clone)]
pub enum PhysicsTask {
    /// Replace a sphere around the detonation point with air.
    TntExplosion { x: i32, y: i32, z: i32, radius: i32 },
    /// Breadth-first water creep from an expanding frontier.
    WaterSpread { frontier: Vec<(i32, i32, i32)> },
    /// A gravity-affected block falling one cell per step.
    SandFall { x: i32, y: i32, z: i32, block: BlockId },
    /// Dirt greening over when exposed to the sky.
    PlantGrowth { x: i32, y: i32, z: i32 },
    /// A projectile laying a block trail one cell per step.
    GunShot {
        x: i32,
        y: i32,
        z: i32,
        dx: i32,
        dy: i32,
        dz: i32,
        block: BlockId,
        range_left: u32,
        trail: Option<(i32, i32, i32)>,
    },
    /// One generation of a life zone.
    LifeStep { zone: LifeZone },
}

impl PhysicsTask {
    pub fn category(&self) -> TaskCategory {
        match self {
            PhysicsTask::TntExplosion { .. } | PhysicsTask::PlantGrowth { .. } => TaskCategory::Physics,
            PhysicsTask::WaterSpread { .. } => TaskCategory::Water,
            PhysicsTask::SandFall { .. } => TaskCategory::Sand,
            PhysicsTask::GunShot { .. } => TaskCategory::Gun,
            PhysicsTask::LifeStep { .. } => TaskCategory::Life,
        }
    }

    /// Execute one step: enqueue effects, return the re-arm delay or `None`
    /// when finished.
    pub fn run(&mut self, ctx: &PhysicsContext) -> Option<Duration> {
        match self {
            PhysicsTask::TntExplosion { x, y, z, radius } => {
                let r = *radius;
                for dx in -r..=r {
                    for dy in -r..=r {
                        for dz in -r..=r {
                            if dx * dx + dy * dy + dz * dz > r * r {
                                continue;
                            }
                            let (bx, by, bz) = (*x + dx, *y + dy, *z + dz);
                            let current = ctx.block_at(bx, by, bz);
                            if current.is_undefined() || current == block::AIR || current == block::BEDROCK {
                                continue;
                            }
                            ctx.enqueue(BlockUpdate::new(bx, by, bz, block::AIR));
                        }
                    }
                }
                None
            }

            PhysicsTask::WaterSpread { frontier } => {
                let mut next = Vec::new();
                for &(x, y, z) in frontier.iter() {
                    // Down first, then the four horizontal neighbors.
                    for (tx, ty, tz) in [(x, y, z - 1), (x + 1, y, z), (x - 1, y, z), (x, y + 1, z), (x, y - 1, z)] {
                        if ctx.block_at(tx, ty, tz) == block::AIR {
                            ctx.enqueue(BlockUpdate::new(tx, ty, tz, block::WATER));
                            next.push((tx, ty, tz));
                        }
                    }
                }
                *frontier = next;
                if frontier.is_empty() { None } else { Some(Duration::from_millis(200)) }
            }

            PhysicsTask::SandFall { x, y, z, block: falling } => {
                if ctx.block_at(*x, *y, *z) != *falling {
                    return None; // someone replaced it mid-fall
                }
                let below = ctx.block_at(*x, *y, *z - 1);
                if below == block::AIR || below == block::WATER || below == block::STILL_WATER {
                    ctx.enqueue(BlockUpdate::new(*x, *y, *z, block::AIR));
                    ctx.enqueue(BlockUpdate::new(*x, *y, *z - 1, *falling));
                    *z -= 1;
                    Some(Duration::from_millis(100))
                } else {
                    None
                }
            }

            PhysicsTask::PlantGrowth { x, y, z } => {
                if ctx.block_at(*x, *y, *z) != block::DIRT {
                    return None;
                }
                let above = ctx.block_at(*x, *y, *z + 1);
                if above == block::AIR {
                    ctx.enqueue(BlockUpdate::new(*x, *y, *z, block::GRASS));
                    None
                } else if ctx.registry.is_transparent(above) && !above.is_undefined() {
                    // Shaded but under see-through cover: try again later.
                    Some(Duration::from_millis(rand::thread_rng().gen_range(10_000..30_000)))
                } else {
                    None
                }
            }

            PhysicsTask::GunShot { x, y, z, dx, dy, dz, block: trail_block, range_left, trail } => {
                if let Some((px, py, pz)) = trail.take() {
                    ctx.enqueue(BlockUpdate::new(px, py, pz, block::AIR));
                }
                if *range_left == 0 {
                    return None;
                }
                let (nx, ny, nz) = (*x + *dx, *y + *dy, *z + *dz);
                if ctx.block_at(nx, ny, nz) != block::AIR {
                    return None; // hit something (or left the map)
                }
                ctx.enqueue(BlockUpdate::new(nx, ny, nz, *trail_block));
                *trail = Some((nx, ny, nz));
                *x = nx;
                *y = ny;
                *z = nz;
                *range_left -= 1;
                Some(Duration::from_millis(60))
            }

            PhysicsTask::LifeStep { zone } => {
                let alive = zone.alive_block;
                let is_alive = |x: i32, y: i32| ctx.block_at(x, y, zone.plane_z) == alive;
                for x in zone.min.0..=zone.max.0 {
                    for y in zone.min.1..=zone.max.1 {
                        let mut neighbors = 0;
                        for nx in x - 1..=x + 1 {
                            for ny in y - 1..=y + 1 {
                                if (nx, ny) != (x, y) && is_alive(nx, ny) {
                                    neighbors += 1;
                                }
                            }
                        }
                        let live = is_alive(x, y);
                        let next = matches!((live, neighbors), (true, 2) | (true, 3) | (false, 3));
                        if next != live {
                            let cell = if next { alive } else { block::AIR };
                            ctx.enqueue(BlockUpdate::new(x, y, zone.plane_z, cell));
                        }
                    }
                }
                Some(zone.step)
            }
        }
    }
}

// -- Scheduler ---------------------------------------------------------

struct Due {
    at: Instant,
    seq: u64,
    task: PhysicsTask,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Due {}
impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Due {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

struct Running {
    tx: mpsc::UnboundedSender<(PhysicsTask, Duration)>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One delay-queue scheduler. `start`/`stop` are idempotent; tasks submitted
/// while stopped are dropped (their category is inactive by definition).
pub struct PhysicsScheduler {
    category: TaskCategory,
    state: Mutex<Option<Running>>,
}

impl PhysicsScheduler {
    pub fn new(category: TaskCategory) -> Self {
        Self { category, state: Mutex::new(None) }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().expect("scheduler state poisoned").is_some()
    }

    /// Spawn the scheduler task if not already running.
    pub fn start(&self, ctx: Arc<PhysicsContext>) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        if state.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let category = self.category;
        let handle = tokio::spawn(run_loop(category, ctx, rx, shutdown_rx));
        *state = Some(Running { tx, shutdown, handle });
        tracing::info!("{} scheduler started", self.category.name());
    }

    /// Stop and wait for the scheduler task to finish. Safe to call when
    /// already stopped. After this returns, no task of this category will
    /// enqueue another update.
    pub async fn stop(&self) {
        let running = self.state.lock().expect("scheduler state poisoned").take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            let _ = running.handle.await;
            tracing::info!("{} scheduler stopped", self.category.name());
        }
    }

    /// Submit a task to run after `initial_delay`. Returns false (task
    /// dropped) if the scheduler is not running.
    pub fn add_task(&self, task: PhysicsTask, initial_delay: Duration) -> bool {
        let state = self.state.lock().expect("scheduler state poisoned");
        match state.as_ref() {
            Some(running) => running.tx.send((task, initial_delay)).is_ok(),
            None => false,
        }
    }
}

async fn run_loop(
    category: TaskCategory,
    ctx: Arc<PhysicsContext>,
    mut rx: mpsc::UnboundedReceiver<(PhysicsTask, Duration)>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending: BinaryHeap<Reverse<Due>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            submission = rx.recv() => {
                match submission {
                    Some((task, delay)) => {
                        pending.push(Reverse(Due { at: Instant::now() + delay, seq, task }));
                        seq += 1;
                    }
                    // All senders gone: the owning world was dropped.
                    None => break,
                }
            }

            _ = async {
                match pending.peek() {
                    Some(Reverse(due)) => tokio::time::sleep_until(due.at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                let now = Instant::now();
                while pending.peek().is_some_and(|Reverse(due)| due.at <= now) {
                    let Some(Reverse(mut due)) = pending.pop() else { break };
                    if let Some(delay) = due.task.run(&ctx) {
                        due.at = now + delay;
                        due.seq = seq;
                        seq += 1;
                        pending.push(Reverse(due));
                    }
                }
            }
        }
    }

    tracing::debug!("{} scheduler drained ({} tasks abandoned)", category.name(), pending.len());
}

/// The five per-category scheduler slots of one world.
pub struct PhysicsSchedulerSet {
    slots: [PhysicsScheduler; 5],
}

impl PhysicsSchedulerSet {
    pub fn new() -> Self {
        Self {
            slots: TaskCategory::ALL.map(PhysicsScheduler::new),
        }
    }

    pub fn get(&self, category: TaskCategory) -> &PhysicsScheduler {
        &self.slots[category.index()]
    }

    /// Start exactly the schedulers the flags (plus life-zone presence)
    /// call for, stop the rest. Used on flag changes and map install.
    pub async fn reconcile(&self, ctx: &Arc<PhysicsContext>, flags: PhysicsFlags, has_life_zones: bool) {
        for category in TaskCategory::ALL {
            let wanted = flags.wants(category)
                || (category == TaskCategory::Life && has_life_zones);
            let slot = self.get(category);
            if wanted && !slot.is_running() {
                slot.start(Arc::clone(ctx));
            } else if !wanted && slot.is_running() {
                slot.stop().await;
            }
        }
    }

    /// Unconditional stop of every category (world unloading).
    pub async fn stop_all(&self) {
        for slot in &self.slots {
            slot.stop().await;
        }
    }

    pub fn running_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_running()).count()
    }
}

impl Default for PhysicsSchedulerSet {
    fn default() -> Self {
        Self::new()
    }
}
