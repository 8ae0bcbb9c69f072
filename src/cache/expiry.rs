//! Expiry Window Module
//!
//! Groups cache keys into time-boxed batches so that expiry removes many
//! entries in one sweep instead of running one timer per entry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::tasks::spawn_at;

// == Batch Accumulator ==
/// Contract the cache relies on for batched expiry.
pub trait BatchAccumulator<T> {
    /// Adds an item to the batch. Returns `false` if the batch already fired.
    fn add(&self, item: T) -> bool;

    /// True once the batch has fired and delivered its items.
    fn is_ready(&self) -> bool;

    /// Advisory: while true, new items should go to this batch. Once false,
    /// callers should open a fresh one.
    fn is_loadable(&self) -> bool;
}

// == Window Timing ==
/// How long a window accepts items and when it fires, both measured from
/// the moment it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTiming {
    pub fire_after: Duration,
    pub loadable_for: Duration,
}

impl WindowTiming {
    /// Timing for a cache TTL: loadable for `ttl`, firing at `1.5 × ttl`.
    ///
    /// Items therefore wait between `0.5 × ttl` and `1.5 × ttl` before removal.
    pub fn for_ttl(ttl: Duration) -> Self {
        Self {
            fire_after: ttl + ttl / 2,
            loadable_for: ttl,
        }
    }
}

struct WindowInner<T> {
    items: Vec<T>,
    ready: bool,
}

// == Expiry Window ==
/// Tokio-timed [`BatchAccumulator`].
pub struct ExpiryWindow<T> {
    inner: Arc<Mutex<WindowInner<T>>>,
    loadable_until: Instant,
}

impl<T> ExpiryWindow<T>
where
    T: Send + 'static,
{
    // == Open ==
    /// Opens a window and schedules its firing. `on_fire` receives the
    /// accumulated items exactly once.
    ///
    /// Fails with `NoRuntime` outside a tokio runtime.
    pub fn open<F>(timing: WindowTiming, on_fire: F) -> Result<Self>
    where
        F: FnOnce(Vec<T>) + Send + 'static,
    {
        let opened_at = Instant::now();
        let inner = Arc::new(Mutex::new(WindowInner {
            items: Vec::new(),
            ready: false,
        }));

        let firing = inner.clone();
        spawn_at(opened_at + timing.fire_after, move || {
            let items = {
                let mut window = firing.lock();
                window.ready = true;
                std::mem::take(&mut window.items)
            };
            debug!("Expiry window fired with {} items", items.len());
            on_fire(items);
        })?;

        debug!("Expiry window opened: {:?}", timing);
        Ok(Self {
            inner,
            loadable_until: opened_at + timing.loadable_for,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> BatchAccumulator<T> for ExpiryWindow<T> {
    fn add(&self, item: T) -> bool {
        let mut window = self.inner.lock();
        if window.ready {
            return false;
        }
        window.items.push(item);
        true
    }

    fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    fn is_loadable(&self) -> bool {
        !self.is_ready() && Instant::now() < self.loadable_until
    }
}
