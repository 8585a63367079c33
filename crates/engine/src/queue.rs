//! The pending block-update queue.
//!
//! Every mutation source (player edits, physics tasks, scripted jobs) funnels
//! through one [`UpdateQueue`] per world. Enqueueing is lock-free and never
//! blocks a producer; the world's tick drain is the consumer. Entries keep
//! FIFO order per producer, but concurrent producers may interleave
//! arbitrarily -- the grid converges, exact cross-actor ordering is not a
//! guarantee anyone gets.

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::block::BlockId;

/// Identifies the actor that originated an update, so broadcasts can skip
/// echoing it back. Opaque to the engine.
pub type ActorId = u64;

/// One pending block change. Immutable value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockUpdate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub block: BlockId,
    /// Originating actor, if any. `None` for system-generated updates.
    pub origin: Option<ActorId>,
}

impl BlockUpdate {
    pub const fn new(x: i32, y: i32, z: i32, block: BlockId) -> Self {
        Self { x, y, z, block, origin: None }
    }

    pub const fn from_actor(x: i32, y: i32, z: i32, block: BlockId, origin: ActorId) -> Self {
        Self { x, y, z, block, origin: Some(origin) }
    }
}

/// Unbounded multi-producer queue of pending updates.
pub struct UpdateQueue {
    tx: Sender<BlockUpdate>,
    rx: Receiver<BlockUpdate>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Enqueue from any thread. Never blocks.
    pub fn enqueue(&self, update: BlockUpdate) {
        // The receiver lives as long as self, so this cannot fail.
        let _ = self.tx.send(update);
    }

    /// Take the next pending update, if any.
    pub fn try_dequeue(&self) -> Option<BlockUpdate> {
        self.rx.try_recv().ok()
    }

    /// Number of updates currently pending.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Discard every queued entry. Used when a world is locked, so mid-flight
    /// edits stop landing. Returns the number discarded.
    pub fn clear_pending(&self) -> usize {
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;

    #[test]
    fn fifo_per_producer() {
        let q = UpdateQueue::new();
        for i in 0..100 {
            q.enqueue(BlockUpdate::new(i, 0, 0, block::STONE));
        }
        assert_eq!(q.len(), 100);
        for i in 0..100 {
            assert_eq!(q.try_dequeue().unwrap().x, i);
        }
        assert!(q.try_dequeue().is_none());
    }

    #[test]
    fn clear_pending_discards_everything() {
        let q = UpdateQueue::new();
        for _ in 0..42 {
            q.enqueue(BlockUpdate::new(0, 0, 0, block::AIR));
        }
        assert_eq!(q.clear_pending(), 42);
        assert!(q.is_empty());
        // Still usable afterwards.
        q.enqueue(BlockUpdate::new(1, 2, 3, block::SAND));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        use std::sync::Arc;
        let q = Arc::new(UpdateQueue::new());
        let mut handles = Vec::new();
        for t in 0..8i32 {
            let q = Arc::clone(&q);
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    q.enqueue(BlockUpdate::from_actor(t, i, 0, block::STONE, t as u64));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 4000);

        // Per-producer order survives the interleaving.
        let mut last_seen = [-1i32; 8];
        while let Some(u) = q.try_dequeue() {
            let t = u.x as usize;
            assert!(u.y > last_seen[t], "producer {t} order violated");
            last_seen[t] = u.y;
        }
    }
}
