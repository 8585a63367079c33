//! World lifecycle: the state machine every loaded map lives inside.
//!
//! One [`World`] owns a block store cell, an update queue, a draw scheduler
//! and the five physics scheduler slots. A single `tokio::sync::Mutex` (the
//! root) serializes every lifecycle transition and the tick drain; the lock
//! is coarse on purpose, since transitions are rare and cheap. Physics tasks
//! never take the root -- they read the grid through the shared store cell --
//! so awaiting a scheduler stop while holding the root cannot deadlock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use opencube_engine::block::BlockRegistry;
use opencube_engine::draw::{DrawOpId, DrawOperation, DrawScheduler};
use opencube_engine::queue::{ActorId, BlockUpdate, UpdateQueue};
use opencube_engine::store::{BlockStore, Dimensions};

use crate::backup;
use crate::config::{BudgetPolicy, ServerConfig};
use crate::persistence::{self, MapMeta, unix_now};
use crate::physics::{
    LifeZone, PhysicsContext, PhysicsFlags, PhysicsSchedulerSet, PhysicsTask, TaskCategory,
};
use crate::session::{Packet, PlayerSession};

/// Grid size used when a world has no saved map to load.
pub const DEFAULT_DIMENSIONS: Dimensions = Dimensions::new(128, 128, 64);

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world '{0}' is full")]
    WorldFull(String),
    #[error("world '{0}' is already locked")]
    AlreadyLocked(String),
    #[error("world '{0}' is not locked")]
    NotLocked(String),
    #[error("world '{0}' is already flushing")]
    AlreadyFlushing(String),
    #[error("failed to prepare the map of '{name}'")]
    MapLoad {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Lifecycle state bits with explicit transitions. The `lock`, `unlock` and
/// `begin_flush` transitions report rejection when already in the target
/// state.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldFlags {
    locked: bool,
    flushing: bool,
    pending_unload: bool,
    never_unload: bool,
    is_realm: bool,
    announce: bool,
}

impl WorldFlags {
    fn lock(&mut self) -> bool {
        !std::mem::replace(&mut self.locked, true)
    }

    fn unlock(&mut self) -> bool {
        std::mem::replace(&mut self.locked, false)
    }

    fn begin_flush(&mut self) -> bool {
        !std::mem::replace(&mut self.flushing, true)
    }

    fn finish_flush(&mut self) {
        self.flushing = false;
    }

    fn set_pending_unload(&mut self) {
        self.pending_unload = true;
    }

    fn clear_pending_unload(&mut self) {
        self.pending_unload = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn pending_unload(&self) -> bool {
        self.pending_unload
    }

    pub fn never_unload(&self) -> bool {
        self.never_unload
    }

    pub fn is_realm(&self) -> bool {
        self.is_realm
    }
}

/// Per-world construction settings not covered by the shared server config.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldOptions {
    /// Keep the grid loaded even while the world is empty.
    pub never_unload: bool,
    /// Realm worlds are personal; joins are not announced.
    pub is_realm: bool,
}

/// Everything guarded by the root lock.
struct WorldInner {
    /// Lowercased player name -> session.
    roster: HashMap<String, Arc<PlayerSession>>,
    /// Immutable snapshot handed to the tick drain, refreshed on every
    /// roster change so broadcasting never walks the map under contention.
    roster_cache: Arc<[Arc<PlayerSession>]>,
    flags: WorldFlags,
    physics: PhysicsFlags,
    life_zones: Vec<LifeZone>,
    meta: MapMeta,
}

/// Point-in-time status snapshot.
#[derive(Debug, Clone, Copy)]
pub struct WorldStatus {
    pub is_locked: bool,
    pub is_flushing: bool,
    pub pending_unload: bool,
    pub is_loaded: bool,
    pub player_count: usize,
    pub update_queue_len: usize,
    pub draw_queue_block_count: u64,
}

/// State carried across a map replacement: the new world object adopts the
/// old one's players, zones and flags.
pub(crate) struct SwapState {
    pub sessions: Vec<Arc<PlayerSession>>,
    pub life_zones: Vec<LifeZone>,
    pub flags: WorldFlags,
    pub physics: PhysicsFlags,
    pub meta: MapMeta,
}

pub struct World {
    name: String,
    cfg: ServerConfig,
    registry: Arc<BlockRegistry>,
    store: Arc<RwLock<Option<BlockStore>>>,
    queue: Arc<UpdateQueue>,
    draw: Arc<DrawScheduler>,
    physics: PhysicsSchedulerSet,
    ctx: Arc<PhysicsContext>,
    root: Mutex<WorldInner>,
}

impl World {
    pub fn new(name: impl Into<String>, cfg: ServerConfig, registry: Arc<BlockRegistry>) -> Arc<Self> {
        Self::with_options(name, cfg, registry, WorldOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        cfg: ServerConfig,
        registry: Arc<BlockRegistry>,
        options: WorldOptions,
    ) -> Arc<Self> {
        let store: Arc<RwLock<Option<BlockStore>>> = Arc::new(RwLock::new(None));
        let queue = Arc::new(UpdateQueue::new());
        let ctx = Arc::new(PhysicsContext {
            store: Arc::clone(&store),
            queue: Arc::clone(&queue),
            registry: Arc::clone(&registry),
        });
        let announce = cfg.announce_joins;
        Arc::new(Self {
            name: name.into(),
            cfg,
            registry,
            store,
            queue,
            draw: Arc::new(DrawScheduler::new()),
            physics: PhysicsSchedulerSet::new(),
            ctx,
            root: Mutex::new(WorldInner {
                roster: HashMap::new(),
                roster_cache: Arc::from(Vec::new()),
                flags: WorldFlags {
                    announce,
                    never_unload: options.never_unload,
                    is_realm: options.is_realm,
                    ..WorldFlags::default()
                },
                physics: PhysicsFlags::default(),
                life_zones: Vec::new(),
                meta: MapMeta::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    fn map_path(&self) -> PathBuf {
        self.cfg.map_dir.join(format!("{}.ocw", self.name))
    }

    pub fn is_loaded(&self) -> bool {
        self.store.read().expect("store cell poisoned").is_some()
    }

    /// Read one block of the loaded grid. UNDEFINED when the map is not
    /// loaded or the coordinates are out of range.
    pub fn block_at(&self, x: i32, y: i32, z: i32) -> opencube_engine::block::BlockId {
        match self.store.read().expect("store cell poisoned").as_ref() {
            Some(store) => store.get(x, y, z),
            None => opencube_engine::block::BlockId::UNDEFINED,
        }
    }

    fn refresh_roster_cache(inner: &mut WorldInner) {
        let snapshot: Vec<Arc<PlayerSession>> = inner.roster.values().cloned().collect();
        inner.roster_cache = snapshot.into();
    }

    // -- Map load / unload -------------------------------------------------

    /// Make sure a grid is installed: reuse the loaded one, load from disk,
    /// or synthesize the default flat world when nothing usable exists.
    pub async fn load_map(&self) -> Result<()> {
        let mut inner = self.root.lock().await;
        self.ensure_map(&mut inner).await
    }

    async fn ensure_map(&self, inner: &mut WorldInner) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }

        let path = self.map_path();
        let loaded = match persistence::load_grid(Arc::clone(&self.registry), &path) {
            Ok(Some((store, meta))) => {
                inner.meta = meta;
                Some(store)
            }
            Ok(None) => {
                tracing::info!("No saved map for {}, generating a flat world", self.name);
                None
            }
            Err(e) => {
                tracing::error!("Map of {} is unreadable ({e:#}), generating a flat world", self.name);
                for p in inner.roster_cache.iter() {
                    p.message("The saved map could not be read; a fresh world was generated.");
                }
                None
            }
        };

        let mut store = match loaded {
            Some(store) => store,
            None => {
                inner.meta = MapMeta::new();
                let mut store = BlockStore::new(Arc::clone(&self.registry), DEFAULT_DIMENSIONS)
                    .context("creating the default grid")?;
                store.fill_default_flat();
                store
            }
        };
        if store.remap_blocks(&self.registry.known_or_air_table()) {
            tracing::warn!("Unknown block ids in {} were cleared to air", self.name);
        }

        *self.store.write().expect("store cell poisoned") = Some(store);
        inner.flags.clear_pending_unload();
        self.physics
            .reconcile(&self.ctx, inner.physics, !inner.life_zones.is_empty())
            .await;
        self.restart_life(inner).await;
        Ok(())
    }

    /// Unload the map: save, stop every scheduler, release the grid. With
    /// `expected_pending` the call is skipped if the pending-unload flag was
    /// cleared in the meantime (someone joined). Returns whether the grid
    /// was actually released.
    pub async fn unload(&self, expected_pending: bool) -> bool {
        let mut inner = self.root.lock().await;
        if expected_pending && !inner.flags.pending_unload() {
            tracing::debug!("Stale unload request for {}, skipped", self.name);
            return false;
        }
        self.unload_locked(&mut inner).await
    }

    async fn unload_locked(&self, inner: &mut WorldInner) -> bool {
        {
            let mut guard = self.store.write().expect("store cell poisoned");
            let Some(store) = guard.as_mut() else {
                inner.flags.clear_pending_unload();
                return false;
            };
            if store.flags().dirty_since_save() {
                inner.meta.modified = unix_now();
                if let Err(e) = persistence::save_grid(store, &inner.meta, &self.map_path()) {
                    // Keep the map loaded and dirty; the next empty tick or
                    // save timer retries.
                    tracing::error!("Could not save {} before unload: {e:#}", self.name);
                    return false;
                }
                store.mark_saved();
            }
        }

        self.physics.stop_all().await;
        *self.store.write().expect("store cell poisoned") = None;
        inner.flags.clear_pending_unload();
        tracing::debug!("Grid of {} released", self.name);
        true
    }

    // -- Lock / flush --------------------------------------------------------

    /// Lock the world read-only: pending updates are discarded and every
    /// draw operation is cancelled immediately.
    pub async fn lock(&self) -> Result<(), WorldError> {
        let mut inner = self.root.lock().await;
        if !inner.flags.lock() {
            return Err(WorldError::AlreadyLocked(self.name.clone()));
        }
        let dropped = self.queue.clear_pending();
        self.draw.cancel_all();
        tracing::info!("{} locked ({} pending updates discarded)", self.name, dropped);
        for p in inner.roster_cache.iter() {
            p.message("This world is now locked (read-only).");
        }
        Ok(())
    }

    pub async fn unlock(&self) -> Result<(), WorldError> {
        let mut inner = self.root.lock().await;
        if !inner.flags.unlock() {
            return Err(WorldError::NotLocked(self.name.clone()));
        }
        tracing::info!("{} unlocked", self.name);
        for p in inner.roster_cache.iter() {
            p.message("This world is no longer locked.");
        }
        Ok(())
    }

    /// Start flushing: updates keep applying but are no longer broadcast.
    /// The tick drain completes the flush on the first tick that empties the
    /// queue with budget to spare, rejoining every player once.
    pub async fn flush(&self) -> Result<(), WorldError> {
        let mut inner = self.root.lock().await;
        if !inner.flags.begin_flush() {
            return Err(WorldError::AlreadyFlushing(self.name.clone()));
        }
        tracing::info!("{} flushing", self.name);
        for p in inner.roster_cache.iter() {
            p.message("Map is being flushed; you will rejoin shortly.");
        }
        Ok(())
    }

    // -- Tick drain -----------------------------------------------------------

    /// One tick: drain up to the budget from the update queue into the
    /// store, broadcast, hand leftover budget to the draw scheduler, and
    /// perform a due unload on a zero-packet tick. Returns updates applied.
    pub async fn update_tick(&self, policy: &dyn BudgetPolicy) -> usize {
        let mut inner = self.root.lock().await;
        let players = Arc::clone(&inner.roster_cache);
        let budget = policy.max_packets_per_tick(players.len());

        let mut applied = 0usize;
        let mut drawn = 0usize;
        let mut remaining = budget;
        let mut flush_completed = false;

        {
            let mut guard = self.store.write().expect("store cell poisoned");
            if let Some(store) = guard.as_mut() {
                if inner.flags.is_locked() {
                    let dropped = self.queue.clear_pending();
                    if dropped > 0 {
                        tracing::debug!("{}: {} updates discarded while locked", self.name, dropped);
                    }
                    // The discard emptied the queue, so a pending flush can
                    // complete here instead of stalling until an unlock.
                    if inner.flags.is_flushing() {
                        flush_completed = true;
                    }
                } else {
                    let flushing = inner.flags.is_flushing();
                    while remaining > 0 {
                        let Some(update) = self.queue.try_dequeue() else { break };
                        // Out-of-range and sentinel updates are discarded
                        // without consuming budget.
                        if update.block.is_undefined() || !store.in_bounds(update.x, update.y, update.z) {
                            continue;
                        }
                        store.set(update.x, update.y, update.z, update.block);
                        if !flushing {
                            broadcast_update(&players, &self.registry, &update);
                        }
                        applied += 1;
                        remaining -= 1;
                    }

                    if flushing && remaining > 0 && self.queue.is_empty() {
                        flush_completed = true;
                    }

                    if remaining > 0 && !flush_completed {
                        let mut emit = |u: BlockUpdate| {
                            if !flushing {
                                broadcast_update(&players, &self.registry, &u);
                            }
                        };
                        let mut notify = |owner: ActorId, msg: String| {
                            if let Some(p) = players.iter().find(|p| p.id == owner) {
                                p.message(msg);
                            }
                        };
                        drawn = self.draw.draw_pass(store, &mut emit, &mut notify, remaining);
                    }
                }
            }
        }

        if flush_completed {
            inner.flags.finish_flush();
            for p in players.iter() {
                p.send_low_priority(Packet::Rejoin { world: self.name.clone() });
            }
            tracing::info!("Flush of {} complete, {} players rejoined", self.name, players.len());
        }

        if applied == 0 && drawn == 0 && inner.flags.pending_unload() {
            self.unload_locked(&mut inner).await;
        }
        applied
    }

    // -- Admission ------------------------------------------------------------

    /// Admit a player: self-heal duplicate names, enforce capacity (with
    /// idle-eviction for reserved-slot ranks), make sure the map is loaded,
    /// take the join backup if asked, and announce.
    pub async fn admit_player(&self, session: Arc<PlayerSession>) -> Result<(), WorldError> {
        let mut inner = self.root.lock().await;
        let key = session.name.to_lowercase();

        if let Some(stale) = inner.roster.remove(&key) {
            // Duplicate registration is a caller bug; heal it by dropping
            // the stale session so the roster stays consistent.
            tracing::error!("Duplicate session for {} in {}, evicting the stale one", session.name, self.name);
            stale.send_low_priority(Packet::Kick("Logged in from another session".into()));
            Self::refresh_roster_cache(&mut inner);
        }

        if inner.roster.len() >= self.cfg.max_players_per_world {
            if !session.rank.reserved_slot {
                return Err(WorldError::WorldFull(self.name.clone()));
            }
            let victim = inner
                .roster
                .values()
                .filter(|p| p.rank.evictable && p.rank.priority < session.rank.priority)
                .min_by_key(|p| p.last_active())
                .cloned();
            match victim {
                Some(victim) => {
                    inner.roster.remove(&victim.name.to_lowercase());
                    Self::refresh_roster_cache(&mut inner);
                    victim.clear_transient_state();
                    victim.send_low_priority(Packet::Kick("Making room for a reserved slot".into()));
                    tracing::info!("{} evicted from {} to admit {}", victim.name, self.name, session.name);
                }
                None => return Err(WorldError::WorldFull(self.name.clone())),
            }
        }

        self.ensure_map(&mut inner)
            .await
            .map_err(|source| WorldError::MapLoad { name: self.name.clone(), source })?;

        if self.cfg.backup_on_join {
            let dirty = self
                .store
                .read()
                .expect("store cell poisoned")
                .as_ref()
                .is_some_and(|s| s.flags().dirty_since_backup());
            if dirty {
                if let Err(e) = self.backup_locked(&mut inner) {
                    tracing::error!("Join backup of {} failed: {e:#}", self.name);
                }
            }
        }

        if inner.flags.announce && !inner.flags.is_realm() {
            for p in inner.roster.values() {
                p.message(format!("{} joined {}", session.name, self.name));
            }
        }

        session.touch();
        inner.roster.insert(key, session);
        Self::refresh_roster_cache(&mut inner);
        inner.flags.clear_pending_unload();
        Ok(())
    }

    /// Remove a player. An emptied, unpinned world becomes pending-unload;
    /// the actual unload happens on the next zero-packet tick.
    pub async fn release_player(&self, name: &str) -> bool {
        let mut inner = self.root.lock().await;
        let Some(session) = inner.roster.remove(&name.to_lowercase()) else {
            return false;
        };
        session.clear_transient_state();
        Self::refresh_roster_cache(&mut inner);
        if inner.roster.is_empty() && !inner.flags.never_unload() {
            inner.flags.set_pending_unload();
            tracing::debug!("{} is empty, unload pending", self.name);
        }
        true
    }

    // -- Mutation surface -------------------------------------------------------

    pub fn queue_update(&self, update: BlockUpdate) {
        self.queue.enqueue(update);
    }

    pub fn queue_draw_operation(&self, op: Box<dyn DrawOperation>) -> DrawOpId {
        self.draw.queue(op)
    }

    pub fn cancel_draw_operation(&self, id: DrawOpId) -> bool {
        self.draw.cancel(id)
    }

    /// Submit a task to its category's scheduler. Dropped (false) when that
    /// scheduler is not running.
    pub fn add_physics_task(&self, task: PhysicsTask, initial_delay: Duration) -> bool {
        self.physics.get(task.category()).add_task(task, initial_delay)
    }

    /// Replace the physics flags; schedulers are started and stopped to
    /// match when a map is loaded.
    pub async fn set_physics(&self, flags: PhysicsFlags) {
        let mut inner = self.root.lock().await;
        inner.physics = flags;
        if self.is_loaded() {
            self.physics
                .reconcile(&self.ctx, flags, !inner.life_zones.is_empty())
                .await;
        }
    }

    pub async fn add_life_zone(&self, zone: LifeZone) {
        let mut inner = self.root.lock().await;
        inner.life_zones.retain(|z| z.name != zone.name);
        inner.life_zones.push(zone);
        if self.is_loaded() {
            self.restart_life(&inner).await;
        }
    }

    pub async fn remove_life_zone(&self, name: &str) -> bool {
        let mut inner = self.root.lock().await;
        let before = inner.life_zones.len();
        inner.life_zones.retain(|z| z.name != name);
        let removed = inner.life_zones.len() != before;
        if removed && self.is_loaded() {
            self.restart_life(&inner).await;
        }
        removed
    }

    /// Restart the life scheduler so it runs exactly the registered zones.
    /// Also used to resume zones against a replacement map.
    async fn restart_life(&self, inner: &WorldInner) {
        let slot = self.physics.get(TaskCategory::Life);
        slot.stop().await;
        if inner.life_zones.is_empty() {
            return;
        }
        slot.start(Arc::clone(&self.ctx));
        for zone in &inner.life_zones {
            slot.add_task(PhysicsTask::LifeStep { zone: zone.clone() }, zone.step);
        }
    }

    // -- Persistence / backup -------------------------------------------------

    pub async fn save_map(&self) -> Result<()> {
        let mut inner = self.root.lock().await;
        self.save_locked(&mut inner)
    }

    fn save_locked(&self, inner: &mut WorldInner) -> Result<()> {
        let mut guard = self.store.write().expect("store cell poisoned");
        let Some(store) = guard.as_mut() else { return Ok(()) };
        if !store.flags().dirty_since_save() {
            return Ok(());
        }
        inner.meta.modified = unix_now();
        persistence::save_grid(store, &inner.meta, &self.map_path())?;
        store.mark_saved();
        Ok(())
    }

    /// Save (if dirty) and take a backup, then rotate old ones. A clean-
    /// since-last-backup map is a no-op.
    pub async fn backup_now(&self) -> Result<()> {
        let mut inner = self.root.lock().await;
        self.backup_locked(&mut inner)
    }

    fn backup_locked(&self, inner: &mut WorldInner) -> Result<()> {
        let path = self.map_path();
        {
            let mut guard = self.store.write().expect("store cell poisoned");
            let Some(store) = guard.as_mut() else { return Ok(()) };
            if !store.flags().dirty_since_backup() {
                return Ok(());
            }
            if store.flags().dirty_since_save() {
                inner.meta.modified = unix_now();
                persistence::save_grid(store, &inner.meta, &path)?;
                store.mark_saved();
            }
            backup::backup_map(&path, &self.cfg.backup_dir, &self.name)?;
            store.mark_backed_up();
        }
        backup::prune_backups(
            &self.cfg.backup_dir,
            &self.name,
            self.cfg.max_backups,
            self.cfg.max_backup_size_bytes(),
        )?;
        Ok(())
    }

    // -- Status -----------------------------------------------------------------

    pub async fn status(&self) -> WorldStatus {
        let inner = self.root.lock().await;
        WorldStatus {
            is_locked: inner.flags.is_locked(),
            is_flushing: inner.flags.is_flushing(),
            pending_unload: inner.flags.pending_unload(),
            is_loaded: self.is_loaded(),
            player_count: inner.roster.len(),
            update_queue_len: self.queue.len(),
            draw_queue_block_count: self.draw.pending_block_count(),
        }
    }

    pub fn update_queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn draw_queue_block_count(&self) -> u64 {
        self.draw.pending_block_count()
    }

    pub async fn player_count(&self) -> usize {
        self.root.lock().await.roster.len()
    }

    // -- Map replacement ---------------------------------------------------------

    /// Tear this world down for replacement: stop the schedulers, drop the
    /// grid, and hand the roster, zones and flags to the successor.
    pub(crate) async fn begin_swap(&self) -> SwapState {
        let mut inner = self.root.lock().await;
        self.physics.stop_all().await;
        self.draw.cancel_all();
        self.queue.clear_pending();
        *self.store.write().expect("store cell poisoned") = None;

        let sessions: Vec<Arc<PlayerSession>> = inner.roster.drain().map(|(_, s)| s).collect();
        Self::refresh_roster_cache(&mut inner);
        SwapState {
            sessions,
            life_zones: std::mem::take(&mut inner.life_zones),
            flags: inner.flags,
            physics: inner.physics,
            meta: inner.meta,
        }
    }

    /// Install a replacement grid plus the predecessor's carried state, and
    /// tell every migrated player to rejoin. Life zones resume against the
    /// new grid before anything else runs.
    pub(crate) async fn adopt(&self, mut store: BlockStore, state: SwapState) {
        let SwapState { sessions, life_zones, flags, physics, meta } = state;
        let mut inner = self.root.lock().await;

        if store.remap_blocks(&self.registry.known_or_air_table()) {
            tracing::warn!("Unknown block ids in the new map of {} were cleared to air", self.name);
        }
        store.validate_spawn();

        inner.meta = MapMeta { modified: unix_now(), ..meta };
        inner.flags = flags;
        inner.flags.finish_flush();
        inner.flags.clear_pending_unload();
        inner.physics = physics;
        inner.life_zones = life_zones;
        *self.store.write().expect("store cell poisoned") = Some(store);

        self.physics
            .reconcile(&self.ctx, inner.physics, !inner.life_zones.is_empty())
            .await;
        self.restart_life(&inner).await;

        for session in sessions {
            session.send_low_priority(Packet::Rejoin { world: self.name.clone() });
            inner.roster.insert(session.name.to_lowercase(), session);
        }
        Self::refresh_roster_cache(&mut inner);
    }
}

/// Send one update to everyone but its origin, down-mapped for clients
/// without extended-block support.
fn broadcast_update(players: &[Arc<PlayerSession>], registry: &BlockRegistry, update: &BlockUpdate) {
    for p in players {
        if update.origin == Some(p.id) {
            continue;
        }
        let block = if p.supports_extended_blocks {
            update.block
        } else {
            registry.fallback(update.block)
        };
        p.send_low_priority(Packet::BlockChange {
            x: update.x,
            y: update.y,
            z: update.z,
            block: block.0,
        });
    }
}

// -- Background loops ---------------------------------------------------

pub fn spawn_tick_loop(
    world: Arc<World>,
    policy: Arc<dyn BudgetPolicy>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            world.update_tick(policy.as_ref()).await;
        }
    })
}

pub fn spawn_save_loop(world: Arc<World>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // immediate first tick, skip it
        loop {
            ticker.tick().await;
            if let Err(e) = world.save_map().await {
                tracing::error!("Autosave of {} failed: {e:#}", world.name());
            }
        }
    })
}

pub fn spawn_backup_loop(world: Arc<World>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = world.backup_now().await {
                tracing::error!("Timed backup of {} failed: {e:#}", world.name());
            }
        }
    })
}
