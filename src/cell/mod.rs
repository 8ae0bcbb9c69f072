//! Cell Module
//!
//! Lazily loaded values: per-attempt state, the loader contract, activation
//! gates and the cell itself.

mod gate;
mod lazy;
mod loader;
mod state;

// Re-export public types
pub use gate::{Delay, Gate};
pub use lazy::{CellBuilder, FailureHook, LazyCell};
pub use loader::{KeyLoader, Load, Loader};
pub use state::{Completion, Generation, PendingLoad, ValueState};
