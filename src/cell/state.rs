//! Value State Module
//!
//! Tracks a single load attempt: its settled value (if any) and the
//! generation that identifies it among overlapping attempts.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::cell::loader::{Load, Loader};
use crate::error::LazyError;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

// == Generation ==
/// Process-wide, strictly increasing attempt id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    /// Draws the next id.
    pub fn next() -> Self {
        Generation(NEXT_GENERATION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// == Value State ==
/// One load attempt or explicit write.
#[derive(Debug, Clone)]
pub struct ValueState<T> {
    value: Option<T>,
    generation: Generation,
}

impl<T> ValueState<T> {
    // == Constructor ==
    /// Direct construction, e.g. for explicit sets or a reserved attempt.
    pub fn new(value: Option<T>, generation: Generation) -> Self {
        Self { value, generation }
    }

    // == Run Loader ==
    /// Invokes `loader` synchronously under `generation`.
    ///
    /// A ready value is stored before this returns. A deferred computation
    /// leaves the value absent and comes back as [`Completion::Pending`]; its
    /// result belongs to this state only, identified by `generation`.
    /// Failures (errors and panics) leave the value absent for good and are
    /// logged here; they never propagate to readers.
    pub fn run_loader(generation: Generation, loader: &Loader<T>) -> (Self, Completion<T>) {
        debug!("Calling loader for attempt {}", generation);
        let load = match panic::catch_unwind(AssertUnwindSafe(|| loader.call())) {
            Ok(load) => load,
            Err(payload) => {
                let err = LazyError::from_panic(payload);
                warn!("Attempt {} failed: {}", generation, err);
                return (Self::new(None, generation), Completion::Failed(err));
            }
        };

        match load {
            Load::Ready(Ok(value)) => {
                debug!("Attempt {} settled synchronously", generation);
                (Self::new(Some(value), generation), Completion::Settled)
            }
            Load::Ready(Err(e)) => {
                let err = LazyError::LoadFailed(e);
                warn!("Attempt {} failed: {}", generation, err);
                (Self::new(None, generation), Completion::Failed(err))
            }
            Load::Deferred(future) => {
                debug!("Attempt {} is deferred", generation);
                (
                    Self::new(None, generation),
                    Completion::Pending(PendingLoad { generation, future }),
                )
            }
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Stores a resolved value into this attempt.
    pub fn settle(&mut self, value: T) {
        self.value = Some(value);
    }
}

// == Completion ==
/// What remains to be done for an attempt after the loader returned.
pub enum Completion<T> {
    /// The value is already stored.
    Settled,
    /// The attempt failed synchronously; the value stays absent.
    Failed(LazyError),
    /// The value arrives when the pending load resolves.
    Pending(PendingLoad<T>),
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Settled => f.write_str("Settled"),
            Completion::Failed(e) => write!(f, "Failed({})", e),
            Completion::Pending(p) => write!(f, "Pending({})", p.generation),
        }
    }
}

// == Pending Load ==
/// The deferred half of an attempt.
pub struct PendingLoad<T> {
    generation: Generation,
    future: BoxFuture<'static, anyhow::Result<T>>,
}

impl<T> PendingLoad<T> {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Awaits the deferred computation. Errors and panics are logged and
    /// converted into [`LazyError`].
    pub async fn resolve(self) -> Result<T, LazyError> {
        let generation = self.generation;
        let outcome = match AssertUnwindSafe(self.future).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LazyError::LoadFailed(e)),
            Err(payload) => Err(LazyError::from_panic(payload)),
        };
        match &outcome {
            Ok(_) => debug!("Attempt {} resolved", generation),
            Err(e) => warn!("Attempt {} failed: {}", generation, e),
        }
        outcome
    }
}
