//! Scheduler Helpers
//!
//! Background work for cells and caches: deferred loads, next-tick gate
//! openings, TTL reversions and expiry windows.
//!
//! Every helper looks up the current tokio runtime instead of assuming one, so
//! purely synchronous use of cells (ready loaders, no TTL) works without a
//! runtime at all.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{LazyError, Result};

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| LazyError::NoRuntime(e.to_string()))
}

/// Spawns a detached task on the current runtime.
///
/// Nothing awaits the returned handle in this crate; it is returned so callers
/// can abort the task if they need to.
pub fn spawn_detached<F>(task: F) -> Result<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = current_runtime()?;
    Ok(handle.spawn(task))
}

/// Runs `f` on the runtime once `delay` has elapsed, counted from this call.
///
/// # Example
/// ```ignore
/// let handle = spawn_after(Duration::from_millis(100), || println!("later"))?;
/// // Later, if the work is no longer wanted:
/// handle.abort();
/// ```
pub fn spawn_after<F>(delay: Duration, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    spawn_at(Instant::now() + delay, f)
}

/// Runs `f` on the runtime at `deadline`.
pub fn spawn_at<F>(deadline: Instant, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    spawn_detached(async move {
        tokio::time::sleep_until(deadline).await;
        debug!("Timer fired at {:?}", deadline);
        f();
    })
}

/// Runs `f` on the next scheduler pass, after the current task yields.
pub fn next_tick<F>(f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    spawn_detached(async move { f() })
}
