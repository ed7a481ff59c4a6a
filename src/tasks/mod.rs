//! Background Tasks Module
//!
//! Contains the tasks that run alongside the cache engine.
//!
//! # Tasks
//! - Disk writer pool: makes `put` durable without blocking the caller
//! - Expiry sweep: removes expired entries from both tiers at a fixed interval

mod sweep;
mod writer;

pub(crate) use sweep::spawn_sweep_task;
pub(crate) use writer::{DiskWriter, WriteJob};
