use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use opencube_engine::block::BlockRegistry;
use opencube_server::config::{BudgetPolicy, ServerConfig};
use opencube_server::manager::WorldManager;
use opencube_server::world::{WorldOptions, spawn_backup_loop, spawn_save_loop, spawn_tick_loop};

#[tokio::main]
async fn main() {
    let config_path: PathBuf = std::env::args()
        .skip_while(|a| a != "--config")
        .nth(1)
        .unwrap_or_else(|| "opencube.json".into())
        .into();
    let main_world = std::env::args()
        .skip_while(|a| a != "--world")
        .nth(1)
        .unwrap_or_else(|| "main".into());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    tracing::info!("OpenCube -- classic voxel world server");

    let cfg = match ServerConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Cannot start: {e:#}");
            return;
        }
    };

    let registry = Arc::new(BlockRegistry::standard());
    let manager = Arc::new(WorldManager::new(cfg.clone(), registry));

    // The entry world stays loaded for the lifetime of the process.
    let world = manager.register_with(
        &main_world,
        WorldOptions { never_unload: true, ..Default::default() },
    );
    if let Err(e) = world.load_map().await {
        tracing::error!("Could not prepare world {}: {e:#}", world.name());
        return;
    }

    // ── Background loops: tick drain, autosave, timed backups ──────────
    let policy: Arc<dyn BudgetPolicy> = Arc::new(cfg.budget_policy());
    let tick = spawn_tick_loop(Arc::clone(&world), policy, cfg.tick_interval());
    let save = spawn_save_loop(Arc::clone(&world), Duration::from_secs(cfg.save_interval_secs));
    let backup = (cfg.backup_interval_secs > 0).then(|| {
        spawn_backup_loop(Arc::clone(&world), Duration::from_secs(cfg.backup_interval_secs))
    });

    tracing::info!("World {} ready ({} ms ticks)", world.name(), cfg.tick_interval_ms);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {e}");
    }
    tracing::info!("Ctrl+C received, shutting down...");

    tick.abort();
    save.abort();
    if let Some(backup) = backup {
        backup.abort();
    }

    // ── Save on shutdown ────────────────────────────────────────────────
    match world.save_map().await {
        Ok(()) => tracing::info!("Shutdown save complete"),
        Err(e) => tracing::error!("Shutdown save failed: {e:#}"),
    }
    world.unload(false).await;
}
