//! Connected-player sessions and the semantic packet shapes.
//!
//! Wire encoding is not this crate's concern: a [`Packet`] is the semantic
//! payload ("a block change at (x,y,z)"), handed to each session's outbound
//! channel. Sends are fire-and-forget and never block -- backpressure toward
//! a slow client is the transport layer's problem, not the tick loop's.

use std::sync::Mutex;
use std::time::Instant;

use opencube_engine::queue::ActorId;
use tokio::sync::mpsc;

/// Session identifier; doubles as the update-queue origin id.
pub type SessionId = ActorId;

/// Rank capabilities consumed by admission: eviction priority, whether the
/// holder may claim a reserved slot on a full world, and whether the holder
/// may be evicted to make room for someone who can.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rank {
    pub priority: u8,
    pub reserved_slot: bool,
    pub evictable: bool,
}

impl Rank {
    pub const GUEST: Rank = Rank { priority: 10, reserved_slot: false, evictable: true };
    pub const BUILDER: Rank = Rank { priority: 30, reserved_slot: false, evictable: false };
    pub const OPERATOR: Rank = Rank { priority: 80, reserved_slot: true, evictable: false };
    pub const OWNER: Rank = Rank { priority: 100, reserved_slot: true, evictable: false };
}

/// Semantic shape of an outbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    BlockChange { x: i32, y: i32, z: i32, block: u8 },
    Message(String),
    /// Instructs the client to rejoin the named world (map flush or swap).
    Rejoin { world: String },
    Kick(String),
}

/// In-progress selection marks and undo history, cleared when the player
/// leaves a world.
#[derive(Debug, Default)]
pub struct TransientState {
    pub selection_marks: Vec<(i32, i32, i32)>,
    pub undo_buffer: Vec<(i32, i32, i32, u8)>,
}

/// One connected player.
pub struct PlayerSession {
    pub id: SessionId,
    pub name: String,
    pub rank: Rank,
    /// Whether this client understands the extended block set. Drives which
    /// of the two broadcast variants it receives.
    pub supports_extended_blocks: bool,
    last_active: Mutex<Instant>,
    transient: Mutex<TransientState>,
    outbound: mpsc::UnboundedSender<Packet>,
}

impl PlayerSession {
    /// Create a session and the receiving half of its outbound channel (the
    /// transport layer drains the receiver).
    pub fn new(
        id: SessionId,
        name: impl Into<String>,
        rank: Rank,
        supports_extended_blocks: bool,
    ) -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = std::sync::Arc::new(Self {
            id,
            name: name.into(),
            rank,
            supports_extended_blocks,
            last_active: Mutex::new(Instant::now()),
            transient: Mutex::new(TransientState::default()),
            outbound: tx,
        });
        (session, rx)
    }

    /// Queue a packet at low priority. Never blocks; a closed transport just
    /// drops the packet.
    pub fn send_low_priority(&self, packet: Packet) {
        let _ = self.outbound.send(packet);
    }

    pub fn message(&self, text: impl Into<String>) {
        self.send_low_priority(Packet::Message(text.into()));
    }

    /// Record activity for idle-eviction ordering.
    pub fn touch(&self) {
        *self.last_active.lock().expect("session state poisoned") = Instant::now();
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().expect("session state poisoned")
    }

    /// Mark the session idle since `when`. Test/admin hook for eviction
    /// ordering.
    pub fn set_last_active(&self, when: Instant) {
        *self.last_active.lock().expect("session state poisoned") = when;
    }

    pub fn transient(&self) -> std::sync::MutexGuard<'_, TransientState> {
        self.transient.lock().expect("session state poisoned")
    }

    /// Drop selection marks and undo history (player left the world).
    pub fn clear_transient_state(&self) {
        *self.transient.lock().expect("session state poisoned") = TransientState::default();
    }
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rank", &self.rank)
            .field("cpe", &self.supports_extended_blocks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_are_fire_and_forget() {
        let (session, mut rx) = PlayerSession::new(1, "alice", Rank::BUILDER, true);
        session.message("hello");
        assert_eq!(rx.try_recv().unwrap(), Packet::Message("hello".into()));

        // Dropping the receiver must not make sends fail or panic.
        drop(rx);
        session.send_low_priority(Packet::Kick("bye".into()));
    }

    #[test]
    fn transient_state_clears() {
        let (session, _rx) = PlayerSession::new(2, "bob", Rank::GUEST, false);
        session.transient().selection_marks.push((1, 2, 3));
        session.transient().undo_buffer.push((1, 2, 3, 0));
        session.clear_transient_state();
        assert!(session.transient().selection_marks.is_empty());
        assert!(session.transient().undo_buffer.is_empty());
    }
}
