//! The server-wide world directory.
//!
//! Worlds are looked up by lowercased name. Map replacement builds a fresh
//! [`World`] object rather than swapping the grid in place: the old object's
//! schedulers are stopped, its players, life zones and flags move to the
//! successor, and the directory entry is replaced last, so a name always
//! resolves to a fully consistent world.

use std::sync::Arc;

use anyhow::{Result, bail};
use dashmap::DashMap;

use opencube_engine::block::BlockRegistry;
use opencube_engine::store::BlockStore;

use crate::config::ServerConfig;
use crate::world::{World, WorldOptions};

pub struct WorldManager {
    cfg: ServerConfig,
    registry: Arc<BlockRegistry>,
    worlds: DashMap<String, Arc<World>>,
}

impl WorldManager {
    pub fn new(cfg: ServerConfig, registry: Arc<BlockRegistry>) -> Self {
        Self { cfg, registry, worlds: DashMap::new() }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    /// Look up or create the named world. Creation registers it immediately;
    /// the map loads lazily on first admission.
    pub fn register(&self, name: &str) -> Arc<World> {
        self.register_with(name, WorldOptions::default())
    }

    /// `register` with per-world settings (realm, pinned). Settings apply
    /// only when this call creates the world.
    pub fn register_with(&self, name: &str, options: WorldOptions) -> Arc<World> {
        let key = name.to_lowercase();
        self.worlds
            .entry(key)
            .or_insert_with(|| {
                World::with_options(name, self.cfg.clone(), Arc::clone(&self.registry), options)
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<World>> {
        self.worlds.get(&name.to_lowercase()).map(|w| w.clone())
    }

    /// Drop a world from the directory after unloading it. Returns false
    /// for unknown names.
    pub async fn remove(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        match self.worlds.remove(&key) {
            Some((_, world)) => {
                world.unload(false).await;
                true
            }
            None => false,
        }
    }

    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.worlds.iter().map(|e| e.value().name().to_string()).collect()
    }

    /// Replace the named world's map with `new_store`. The returned world is
    /// a new object under the same name; players are migrated and told to
    /// rejoin, life zones resume against the new grid.
    pub async fn change_map(&self, name: &str, new_store: BlockStore) -> Result<Arc<World>> {
        let key = name.to_lowercase();
        let Some(old) = self.get(&key) else {
            bail!("cannot change the map of unknown world '{name}'");
        };

        let carried = old.begin_swap().await;
        let fresh = World::new(old.name(), self.cfg.clone(), Arc::clone(&self.registry));
        fresh.adopt(new_store, carried).await;

        self.worlds.insert(key, Arc::clone(&fresh));
        tracing::info!("Map of {} replaced", fresh.name());
        Ok(fresh)
    }
}
