//! World substrate for a classic voxel server: the block registry, the
//! authoritative block grid, the pending-update queue, and the bulk-draw
//! scheduler. Everything here is synchronous; the server crate supplies the
//! tick loops, lifecycle, and async scheduling around it.

pub mod block;
pub mod draw;
pub mod queue;
pub mod store;
