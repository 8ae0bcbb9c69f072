//! Cache Module
//!
//! A keyed map of lazily loaded values with batched TTL expiry.

mod expiry;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use expiry::{BatchAccumulator, ExpiryWindow, WindowTiming};
pub use stats::CacheStats;
pub use store::{CacheOptions, KeyedLazyCache};
