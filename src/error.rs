//! Error types for lazy values
//!
//! Provides unified error handling using thiserror.
//!
//! None of these ever reach a reader: a failed load reads as an absent value.
//! They surface through logs and the opt-in failure hook only.

use thiserror::Error;

// == Lazy Error Enum ==
/// Unified error type for cells, caches and their background tasks.
#[derive(Error, Debug)]
pub enum LazyError {
    /// The loader returned an error, synchronously or from its deferred computation
    #[error("Loader failed: {0}")]
    LoadFailed(#[source] anyhow::Error),

    /// The loader panicked while producing a value
    #[error("Loader panicked: {0}")]
    LoadPanicked(String),

    /// Background work was requested outside of a tokio runtime
    #[error("No async runtime: {0}")]
    NoRuntime(String),
}

impl LazyError {
    /// Builds a `LoadPanicked` from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        LazyError::LoadPanicked(message)
    }
}

// == Result Type Alias ==
/// Convenience Result type for this crate.
pub type Result<T> = std::result::Result<T, LazyError>;
