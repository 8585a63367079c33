//! Server configuration and the per-tick packet budget policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// External policy deciding how many block-change packets a world may emit
/// per tick. Supplied by the host; worlds only consume it.
pub trait BudgetPolicy: Send + Sync {
    fn max_packets_per_tick(&self, player_count: usize) -> usize;
}

/// Linear back-off: a base budget shrinks with every connected player, never
/// below the floor.
#[derive(Debug, Clone, Copy)]
pub struct DefaultBudgetPolicy {
    pub base: usize,
    pub per_player_penalty: usize,
    pub floor: usize,
}

impl BudgetPolicy for DefaultBudgetPolicy {
    fn max_packets_per_tick(&self, player_count: usize) -> usize {
        self.base
            .saturating_sub(player_count * self.per_player_penalty)
            .max(self.floor)
    }
}

/// Fixed budget, mostly for tests and scripted drains.
#[derive(Debug, Clone, Copy)]
pub struct FixedBudget(pub usize);

impl BudgetPolicy for FixedBudget {
    fn max_packets_per_tick(&self, _player_count: usize) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Roster capacity per world.
    pub max_players_per_world: usize,
    pub packets_per_tick_base: usize,
    pub packets_per_tick_penalty: usize,
    pub packets_per_tick_floor: usize,
    pub tick_interval_ms: u64,
    pub save_interval_secs: u64,
    /// 0 disables timed backups.
    pub backup_interval_secs: u64,
    /// Take a backup when a player joins a world that changed since the last
    /// one.
    pub backup_on_join: bool,
    /// Rotation limits; `None` means unlimited.
    pub max_backups: Option<usize>,
    pub max_backup_size_mb: Option<u64>,
    pub announce_joins: bool,
    pub map_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_players_per_world: 20,
            packets_per_tick_base: 600,
            packets_per_tick_penalty: 25,
            packets_per_tick_floor: 50,
            tick_interval_ms: 50,
            save_interval_secs: 120,
            backup_interval_secs: 1200,
            backup_on_join: false,
            max_backups: Some(20),
            max_backup_size_mb: None,
            announce_joins: true,
            map_dir: "maps".into(),
            backup_dir: "backups".into(),
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file; a missing file yields defaults, a malformed
    /// one is an error (silent fallback would hide typos).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn budget_policy(&self) -> DefaultBudgetPolicy {
        DefaultBudgetPolicy {
            base: self.packets_per_tick_base,
            per_player_penalty: self.packets_per_tick_penalty,
            floor: self.packets_per_tick_floor,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_backup_size_bytes(&self) -> Option<u64> {
        self.max_backup_size_mb.map(|mb| mb * 1024 * 1024)
    }
}
