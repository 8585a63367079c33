//! Async lifecycle layer of the OpenCube server: player sessions, physics
//! scheduling, world lifecycle and the persistence/backup machinery around
//! the synchronous engine crate.

pub mod backup;
pub mod config;
pub mod manager;
pub mod persistence;
pub mod physics;
pub mod session;
pub mod world;
