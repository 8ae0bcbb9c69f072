//! Background Tasks Module
//!
//! Timers and detached tasks that drive cells and caches between reads.
//!
//! # Tasks
//! - Deferred loads and invalidation reloads
//! - Next-tick gate openings and TTL reversions
//! - Expiry window firing

mod scheduler;

pub use scheduler::{next_tick, spawn_after, spawn_at, spawn_detached};
