//! Long-running bulk edits, time-sliced across ticks.
//!
//! A [`DrawOperation`] produces a bounded, restartable sequence of block
//! writes; the [`DrawScheduler`] pulls a caller-specified number of blocks
//! per pass so a million-block fill never stalls a tick. The scheduler's
//! lock is its own -- distinct from the owning world's root -- and a failing
//! operation is isolated: logged, reported to its owner, terminated, with
//! siblings drawn on the next tick.

use std::sync::Mutex;

use slotmap::{SlotMap, new_key_type};
use thiserror::Error;

use crate::block::BlockId;
use crate::queue::{ActorId, BlockUpdate};
use crate::store::BlockStore;

new_key_type! {
    /// Stable handle for a registered draw operation.
    pub struct DrawOpId;
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DrawError(pub String);

/// A bulk edit executed in batches. Implementations must be restartable per
/// call: `draw_batch` may be invoked any number of times with any budget.
pub trait DrawOperation: Send {
    /// Human-readable label for logs and player messages.
    fn description(&self) -> String;

    /// The player that started this operation.
    fn owner(&self) -> ActorId;

    fn total_planned(&self) -> u64;

    fn processed(&self) -> u64;

    fn is_done(&self) -> bool;

    /// Draw up to `max_blocks` blocks: write them into the store and emit one
    /// [`BlockUpdate`] per written block for broadcasting. Returns the number
    /// actually drawn.
    fn draw_batch(
        &mut self,
        store: &mut BlockStore,
        emit: &mut dyn FnMut(BlockUpdate),
        max_blocks: usize,
    ) -> Result<usize, DrawError>;

    /// Finalization hook, called exactly once when the operation is removed
    /// (done, cancelled, or failed).
    fn end(&mut self) {}
}

struct Entry {
    op: Box<dyn DrawOperation>,
    cancelled: bool,
}

struct Ops {
    slots: SlotMap<DrawOpId, Entry>,
    /// Registration order; earlier operations get first claim on the budget.
    order: Vec<DrawOpId>,
}

/// Manages the set of active draw operations for one world.
pub struct DrawScheduler {
    inner: Mutex<Ops>,
}

impl DrawScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Ops {
                slots: SlotMap::with_key(),
                order: Vec::new(),
            }),
        }
    }

    /// Register an operation. It starts drawing on the next pass.
    pub fn queue(&self, op: Box<dyn DrawOperation>) -> DrawOpId {
        let mut inner = self.inner.lock().expect("draw scheduler poisoned");
        let id = inner.slots.insert(Entry { op, cancelled: false });
        inner.order.push(id);
        id
    }

    /// Mark one operation cancelled. It is finalized at the start of the
    /// next pass, before any drawing. Returns false for unknown ids.
    pub fn cancel(&self, id: DrawOpId) -> bool {
        let mut inner = self.inner.lock().expect("draw scheduler poisoned");
        match inner.slots.get_mut(id) {
            Some(entry) => {
                entry.cancelled = true;
                true
            }
            None => false,
        }
    }

    /// Synchronously cancel everything: every operation's end-hook has run
    /// and the list is empty when this returns. Used when a world is locked.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock().expect("draw scheduler poisoned");
        let ids: Vec<DrawOpId> = inner.order.drain(..).collect();
        for id in ids {
            if let Some(mut entry) = inner.slots.remove(id) {
                entry.op.end();
            }
        }
    }

    pub fn op_count(&self) -> usize {
        self.inner.lock().expect("draw scheduler poisoned").order.len()
    }

    /// Total blocks still to be drawn across all active operations.
    pub fn pending_block_count(&self) -> u64 {
        let inner = self.inner.lock().expect("draw scheduler poisoned");
        inner
            .slots
            .values()
            .map(|e| e.op.total_planned().saturating_sub(e.op.processed()))
            .sum()
    }

    /// Run one scheduling pass with `budget` blocks to distribute. The i-th
    /// of N remaining operations is allotted `budget / (N - i)` -- an even,
    /// order-sensitive split that hands skipped shares to earlier entries.
    /// Returns the number of blocks drawn; the caller marks the store dirty.
    pub fn draw_pass(
        &self,
        store: &mut BlockStore,
        emit: &mut dyn FnMut(BlockUpdate),
        notify: &mut dyn FnMut(ActorId, String),
        budget: usize,
    ) -> usize {
        let mut inner = self.inner.lock().expect("draw scheduler poisoned");

        // Finalize cancellations before drawing.
        let cancelled: Vec<DrawOpId> = inner
            .order
            .iter()
            .copied()
            .filter(|&id| inner.slots[id].cancelled)
            .collect();
        for id in cancelled {
            inner.order.retain(|&o| o != id);
            if let Some(mut entry) = inner.slots.remove(id) {
                entry.op.end();
                tracing::debug!("Draw operation '{}' cancelled", entry.op.description());
            }
        }

        let ids: Vec<DrawOpId> = inner.order.clone();
        let total_ops = ids.len();
        let mut remaining = budget;
        let mut drawn_total = 0;

        for (i, id) in ids.into_iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let allotment = remaining / (total_ops - i);
            if allotment == 0 {
                continue;
            }
            let entry = match inner.slots.get_mut(id) {
                Some(entry) => entry,
                None => continue,
            };

            match entry.op.draw_batch(store, emit, allotment) {
                Ok(drawn) => {
                    remaining -= drawn.min(remaining);
                    drawn_total += drawn;
                    if entry.op.is_done() {
                        inner.order.retain(|&o| o != id);
                        if let Some(mut entry) = inner.slots.remove(id) {
                            entry.op.end();
                            tracing::debug!(
                                "Draw operation '{}' finished ({} blocks)",
                                entry.op.description(),
                                entry.op.processed(),
                            );
                        }
                    }
                }
                Err(e) => {
                    // Isolate the failure: terminate this operation only and
                    // let the siblings draw next tick.
                    tracing::error!(
                        "Draw operation '{}' failed: {}",
                        entry.op.description(),
                        e,
                    );
                    notify(entry.op.owner(), format!("Draw operation failed: {e}"));
                    inner.order.retain(|&o| o != id);
                    if let Some(mut entry) = inner.slots.remove(id) {
                        entry.op.end();
                    }
                    break;
                }
            }
        }

        if drawn_total > 0 {
            store.mark_changed();
        }
        drawn_total
    }
}

impl Default for DrawScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// -- Concrete operations ------------------------------------------------

/// Fill an axis-aligned box with one block type.
pub struct CuboidFill {
    owner: ActorId,
    block: BlockId,
    origin: (i32, i32, i32),
    size: (i32, i32, i32),
    cursor: u64,
    total: u64,
}

impl CuboidFill {
    /// Bounds are inclusive and normalized, then clipped against nothing --
    /// out-of-range cells are skipped by the store's own bounds check.
    pub fn new(owner: ActorId, block: BlockId, corner_a: (i32, i32, i32), corner_b: (i32, i32, i32)) -> Self {
        let origin = (
            corner_a.0.min(corner_b.0),
            corner_a.1.min(corner_b.1),
            corner_a.2.min(corner_b.2),
        );
        let size = (
            (corner_a.0 - corner_b.0).abs() + 1,
            (corner_a.1 - corner_b.1).abs() + 1,
            (corner_a.2 - corner_b.2).abs() + 1,
        );
        let total = size.0 as u64 * size.1 as u64 * size.2 as u64;
        Self { owner, block, origin, size, cursor: 0, total }
    }
}

impl DrawOperation for CuboidFill {
    fn description(&self) -> String {
        format!("cuboid fill {}x{}x{}", self.size.0, self.size.1, self.size.2)
    }

    fn owner(&self) -> ActorId {
        self.owner
    }

    fn total_planned(&self) -> u64 {
        self.total
    }

    fn processed(&self) -> u64 {
        self.cursor
    }

    fn is_done(&self) -> bool {
        self.cursor >= self.total
    }

    fn draw_batch(
        &mut self,
        store: &mut BlockStore,
        emit: &mut dyn FnMut(BlockUpdate),
        max_blocks: usize,
    ) -> Result<usize, DrawError> {
        let mut drawn = 0;
        // Decompose in u64: a full-size cuboid holds more cells than i32.
        let (sx, sy) = (self.size.0 as u64, self.size.1 as u64);
        while drawn < max_blocks && self.cursor < self.total {
            let i = self.cursor;
            let x = self.origin.0 + (i % sx) as i32;
            let y = self.origin.1 + ((i / sx) % sy) as i32;
            let z = self.origin.2 + (i / (sx * sy)) as i32;
            self.cursor += 1;
            if store.get(x, y, z) == self.block {
                continue; // already the target block, no packet needed
            }
            store.set(x, y, z, self.block);
            emit(BlockUpdate::from_actor(x, y, z, self.block, self.owner));
            drawn += 1;
        }
        Ok(drawn)
    }
}
