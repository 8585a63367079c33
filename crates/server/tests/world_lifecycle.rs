//! End-to-end lifecycle scenarios: queue drain pacing, draw budget sharing,
//! lock/flush transitions, capacity handling and backup rotation, exercised
//! through the public `World` surface.

use std::sync::Arc;
use std::time::Duration;

use opencube_engine::block::{self, BlockRegistry};
use opencube_engine::draw::CuboidFill;
use opencube_engine::queue::BlockUpdate;
use opencube_server::config::{FixedBudget, ServerConfig};
use opencube_server::session::{Packet, PlayerSession, Rank};
use opencube_server::world::{World, WorldError};

fn test_config(key: &str) -> ServerConfig {
    let dir = std::env::temp_dir().join("opencube_test_lifecycle").join(key);
    let _ = std::fs::remove_dir_all(&dir);
    ServerConfig {
        map_dir: dir.join("maps"),
        backup_dir: dir.join("backups"),
        ..Default::default()
    }
}

fn world(key: &str) -> Arc<World> {
    World::new("main", test_config(key), Arc::new(BlockRegistry::standard()))
}

#[tokio::test]
async fn budget_paces_the_drain_without_losing_updates() {
    let world = world("drain");
    world.load_map().await.unwrap();

    // 2500 updates: two conflicting writes to one cell, then 2498 distinct
    // cells (the default map is 128x128, so a 50x50 patch fits).
    world.queue_update(BlockUpdate::new(0, 0, 40, block::STONE));
    world.queue_update(BlockUpdate::new(0, 0, 40, block::OBSIDIAN));
    let mut queued = 2;
    'fill: for x in 0..50 {
        for y in 0..50 {
            if (x, y) == (0, 0) {
                continue;
            }
            world.queue_update(BlockUpdate::new(x, y, 40, block::BRICK));
            queued += 1;
            if queued == 2500 {
                break 'fill;
            }
        }
    }
    assert_eq!(world.update_queue_len(), 2500);

    // Budget 100 per tick: exactly 25 ticks to drain.
    let mut ticks = 0;
    while world.update_queue_len() > 0 {
        assert_eq!(world.update_tick(&FixedBudget(100)).await, 100);
        ticks += 1;
        assert!(ticks <= 25, "drain took more ticks than the budget allows");
    }
    assert_eq!(ticks, 25);

    // Nothing lost, and the conflicting cell holds the later write.
    assert_eq!(world.block_at(0, 0, 40), block::OBSIDIAN);
    assert_eq!(world.block_at(49, 48, 40), block::BRICK);
    assert_eq!(world.block_at(1, 1, 40), block::BRICK);
}

#[tokio::test]
async fn draw_budget_splits_evenly_and_reflows_after_cancel() {
    let world = world("drawsplit");
    world.load_map().await.unwrap();

    // Three 300-block fills (10x10x3) above the flat surface, over air.
    let mut ids = Vec::new();
    for x0 in [0, 20, 40] {
        ids.push(world.queue_draw_operation(Box::new(CuboidFill::new(
            1,
            block::BRICK,
            (x0, 0, 50),
            (x0 + 9, 9, 52),
        ))));
    }
    assert_eq!(world.draw_queue_block_count(), 900);

    // Empty queue: the whole tick budget of 90 goes to drawing, 30 each.
    world.update_tick(&FixedBudget(90)).await;
    assert_eq!(world.draw_queue_block_count(), 810);

    // Cancel the first; the two survivors split the next 90 as 45/45.
    assert!(world.cancel_draw_operation(ids[0]));
    world.update_tick(&FixedBudget(90)).await;
    assert_eq!(world.draw_queue_block_count(), 810 - 270 - 90);
}

#[tokio::test]
async fn lock_stays_clear_after_unlock() {
    let world = world("lockcycle");
    world.load_map().await.unwrap();

    for i in 0..20 {
        world.queue_update(BlockUpdate::new(i, 0, 40, block::STONE));
    }
    world.lock().await.unwrap();
    assert_eq!(world.update_queue_len(), 0);

    world.unlock().await.unwrap();
    assert_eq!(world.update_queue_len(), 0); // discarded edits stay discarded
    assert_eq!(world.block_at(0, 0, 40), block::AIR);

    // New edits after unlocking land normally.
    world.queue_update(BlockUpdate::new(0, 0, 40, block::STONE));
    assert_eq!(world.update_tick(&FixedBudget(10)).await, 1);
    assert_eq!(world.block_at(0, 0, 40), block::STONE);
}

#[tokio::test]
async fn flush_suppresses_broadcasts_until_the_single_rejoin() {
    let world = world("flushonce");
    let (alice, mut alice_rx) = PlayerSession::new(1, "alice", Rank::BUILDER, true);
    let (bob, mut bob_rx) = PlayerSession::new(2, "bob", Rank::BUILDER, true);
    world.admit_player(alice).await.unwrap();
    world.admit_player(bob).await.unwrap();
    while alice_rx.try_recv().is_ok() {}
    while bob_rx.try_recv().is_ok() {}

    world.flush().await.unwrap();
    for i in 0..120 {
        world.queue_update(BlockUpdate::new(i % 50, i / 50, 40, block::STONE));
    }

    // Budget 50: two full ticks apply 100 silently, the third drains the
    // remaining 20 and completes the flush.
    let mut rejoin_ticks = 0;
    for _ in 0..3 {
        world.update_tick(&FixedBudget(50)).await;
        let packets: Vec<Packet> = std::iter::from_fn(|| alice_rx.try_recv().ok()).collect();
        assert!(!packets.iter().any(|p| matches!(p, Packet::BlockChange { .. })));
        if packets.iter().any(|p| matches!(p, Packet::Rejoin { .. })) {
            rejoin_ticks += 1;
        }
    }
    assert_eq!(rejoin_ticks, 1);
    assert!(!world.status().await.is_flushing);

    // Both players got exactly one rejoin.
    let bob_rejoins = std::iter::from_fn(|| bob_rx.try_recv().ok())
        .filter(|p| matches!(p, Packet::Rejoin { .. }))
        .count();
    assert_eq!(bob_rejoins, 1);

    // All 120 updates applied despite the suppressed broadcasts.
    assert_eq!(world.block_at(19, 2, 40), block::STONE);
}

#[tokio::test]
async fn capacity_is_enforced_with_reserved_slot_eviction() {
    let mut cfg = test_config("capacity");
    cfg.max_players_per_world = 2;
    let world = World::new("main", cfg, Arc::new(BlockRegistry::standard()));

    let (idle, mut idle_rx) = PlayerSession::new(1, "idle", Rank::GUEST, true);
    let (busy, _busy_rx) = PlayerSession::new(2, "busy", Rank::GUEST, true);
    world.admit_player(Arc::clone(&idle)).await.unwrap();
    world.admit_player(busy).await.unwrap();
    idle.set_last_active(std::time::Instant::now() - Duration::from_secs(600));

    let (guest, _guest_rx) = PlayerSession::new(3, "guest", Rank::GUEST, true);
    assert!(matches!(
        world.admit_player(guest).await,
        Err(WorldError::WorldFull(_)),
    ));

    let (op, _op_rx) = PlayerSession::new(4, "op", Rank::OPERATOR, true);
    world.admit_player(op).await.unwrap();
    assert_eq!(world.player_count().await, 2);

    let kicked = std::iter::from_fn(|| idle_rx.try_recv().ok())
        .any(|p| matches!(p, Packet::Kick(_)));
    assert!(kicked);
}

#[tokio::test]
async fn backups_are_taken_when_dirty_and_rotated_by_count() {
    let mut cfg = test_config("backups");
    cfg.max_backups = Some(1);
    let backup_dir = cfg.backup_dir.clone();
    let world = World::new("main", cfg, Arc::new(BlockRegistry::standard()));

    // A save/reload cycle yields a clean map (fresh synthesis is dirty).
    world.load_map().await.unwrap();
    assert!(world.unload(false).await);
    world.load_map().await.unwrap();

    // Clean map: backup is a no-op.
    world.backup_now().await.unwrap();
    assert!(!backup_dir.exists());

    world.queue_update(BlockUpdate::new(1, 1, 40, block::TNT));
    world.update_tick(&FixedBudget(10)).await;
    world.backup_now().await.unwrap();

    world.queue_update(BlockUpdate::new(2, 2, 40, block::TNT));
    world.update_tick(&FixedBudget(10)).await;
    world.backup_now().await.unwrap();

    // Rotation keeps the single newest file.
    let backups: Vec<_> = std::fs::read_dir(&backup_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("main_"))
        .collect();
    assert_eq!(backups.len(), 1);
}

#[tokio::test]
async fn map_survives_unload_and_reload() {
    let world = world("persist");
    world.load_map().await.unwrap();
    world.queue_update(BlockUpdate::new(7, 7, 40, block::GOLD));
    world.update_tick(&FixedBudget(10)).await;

    assert!(world.unload(false).await);
    assert!(!world.is_loaded());
    assert_eq!(world.block_at(7, 7, 40), block::BlockId::UNDEFINED);

    world.load_map().await.unwrap();
    assert_eq!(world.block_at(7, 7, 40), block::GOLD);
    // Surviving flat terrain from the original synthesis.
    assert_eq!(world.block_at(7, 7, 31), block::GRASS);
}
