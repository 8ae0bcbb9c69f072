//! Lazy State - on-demand values that load themselves
//!
//! Provides gated lazy cells with TTL and stale-while-revalidate invalidation,
//! and a keyed cache of such cells with batched expiry.

pub mod cache;
pub mod cell;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheOptions, CacheStats, KeyedLazyCache};
pub use cell::{Delay, Gate, KeyLoader, LazyCell, Load, Loader};
pub use config::Config;
pub use error::{LazyError, Result};
