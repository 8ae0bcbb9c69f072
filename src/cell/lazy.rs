//! Lazy Cell Module
//!
//! A cached value produced on demand by a loader, behind an activation gate,
//! with optional TTL reversion and stale-while-revalidate invalidation.
//!
//! All state lives behind one mutex per cell. The loader is never called with
//! that mutex held, and reads never wait for in-flight work: a read returns
//! whatever is known right now.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cell::gate::{Delay, Gate, GateCheck, GateState};
use crate::cell::loader::Loader;
use crate::cell::state::{Completion, Generation, PendingLoad, ValueState};
use crate::error::LazyError;
use crate::tasks::{next_tick, spawn_after, spawn_detached};

/// Out-of-band receiver for loader failures.
pub type FailureHook = Arc<dyn Fn(&LazyError) + Send + Sync>;

struct Inner<T> {
    /// `None` means no attempt has been made yet.
    state: Option<ValueState<T>>,
    gate: GateState,
    invalid: bool,
    /// Generation of the background reload currently in flight, if any.
    reloading: Option<Generation>,
}

struct Shared<T> {
    loader: Loader<T>,
    ttl: Option<Duration>,
    on_failure: Option<FailureHook>,
    inner: Mutex<Inner<T>>,
}

/// Result of a tracked read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Read<T> {
    pub(crate) value: Option<T>,
    /// Set when this read started a load attempt or a reload.
    pub(crate) started: Option<Generation>,
}

// == Lazy Cell ==
/// A lazily loaded value.
///
/// Reading with [`value`](Self::value) triggers the loader according to the
/// cell's [`Gate`]; until the load settles the read returns `None`. A load
/// that fails also reads as `None`, indistinguishable from "still loading";
/// register [`CellBuilder::on_failure`] to observe failures.
///
/// # Example
/// ```ignore
/// let cell = LazyCell::immediate(Loader::from_fn(|| "X"));
/// assert_eq!(cell.value(), Some("X"));
/// ```
pub struct LazyCell<T> {
    shared: Arc<Shared<T>>,
}

impl<T> LazyCell<T>
where
    T: Clone + Send + 'static,
{
    /// Starts configuring a cell around `loader`.
    pub fn builder(loader: Loader<T>) -> CellBuilder<T> {
        CellBuilder::new(loader)
    }

    /// A cell that loads on first read.
    pub fn immediate(loader: Loader<T>) -> Self {
        Self::builder(loader).build()
    }

    /// A cell that loads only after [`activate`](Self::activate).
    pub fn inactive(loader: Loader<T>) -> Self {
        Self::builder(loader).gate(Gate::Inactive).build()
    }

    /// A cell whose loading is held back by `delay`.
    pub fn delayed(loader: Loader<T>, delay: Delay) -> Self {
        Self::builder(loader).gate(Gate::Delayed(delay)).build()
    }

    // == Value ==
    /// Reads the value, starting a load if the gate allows and none exists.
    pub fn value(&self) -> Option<T> {
        self.read().value
    }

    // == Peek ==
    /// Current value without gating, loading or invalidation side effects.
    pub fn peek(&self) -> Option<T> {
        let inner = self.shared.inner.lock();
        inner.state.as_ref().and_then(|s| s.value().cloned())
    }

    // == Set Value ==
    /// `Some(v)` settles the cell to `v` at once and opens its gate; any
    /// in-flight attempt or reload is discarded when it lands.
    /// `None` reverts to "not attempted" and leaves the gate as it is.
    pub fn set_value(&self, value: Option<T>) {
        let mut inner = self.shared.inner.lock();
        inner.reloading = None;
        match value {
            Some(v) => {
                let generation = Generation::next();
                debug!("Explicit write {}", generation);
                inner.state = Some(ValueState::new(Some(v), generation));
                inner.gate.open();
                inner.invalid = false;
            }
            None => {
                debug!("Cleared");
                inner.state = None;
            }
        }
    }

    /// Same as `set_value(None)`.
    pub fn clear(&self) {
        self.set_value(None);
    }

    // == Activate ==
    /// Opens the gate now, whatever its policy. Idempotent.
    pub fn activate(&self) {
        self.shared.inner.lock().gate.open();
    }

    // == Invalidate ==
    /// Marks the value stale. The next read that finds a value returns it and
    /// reloads in the background. Idempotent.
    pub fn invalidate(&self) {
        self.shared.inner.lock().invalid = true;
    }

    // == Load Value ==
    /// Runs the loader now under a fresh generation and waits for it, whatever
    /// the gate or invalidation state. The held value stays readable until
    /// the new one lands; a failure keeps it. An explicit write made while
    /// this is in flight wins. Returns the value held afterwards.
    pub async fn load_value(&self) -> Option<T> {
        let generation = Generation::next();
        {
            let mut inner = self.shared.inner.lock();
            inner.reloading = Some(generation);
            inner.invalid = false;
        }
        debug!("Explicit reload {}", generation);
        Shared::run_reload(self.shared.clone(), generation).await;
        self.peek()
    }

    /// True once the gate has opened, by policy, activation or a write.
    pub fn is_active(&self) -> bool {
        self.shared.inner.lock().gate.is_open()
    }

    /// True while an invalidation is waiting for the next read.
    pub fn is_invalid(&self) -> bool {
        self.shared.inner.lock().invalid
    }

    /// Generation of the current state, or `None` before any attempt.
    pub fn generation(&self) -> Option<Generation> {
        self.shared.inner.lock().state.as_ref().map(|s| s.generation())
    }

    /// Second handle onto the same cell, for owners that must read outside
    /// their own lock.
    pub(crate) fn handle(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }

    // == Read ==
    pub(crate) fn read(&self) -> Read<T> {
        let mut inner = self.shared.inner.lock();

        match inner.gate.check() {
            GateCheck::Open => {}
            GateCheck::Closed => return Read::empty(),
            GateCheck::Arm => {
                drop(inner);
                self.arm_next_tick();
                return Read::empty();
            }
        }

        let Some(state) = inner.state.as_ref() else {
            let generation = Generation::next();
            inner.state = Some(ValueState::new(None, generation));
            inner.invalid = false;
            drop(inner);
            return self.attempt(generation);
        };

        let value = state.value().cloned();
        if !inner.invalid {
            return Read {
                value,
                started: None,
            };
        }

        if value.is_none() {
            // The pending settlement supersedes the invalidation.
            inner.invalid = false;
            return Read::empty();
        }
        if inner.reloading.is_some() {
            // Left flagged; the next read after the reload settles goes again.
            return Read {
                value,
                started: None,
            };
        }

        inner.invalid = false;
        let generation = Generation::next();
        inner.reloading = Some(generation);
        drop(inner);
        debug!("Invalidated, reloading as {}", generation);
        self.reload(generation);
        Read {
            value,
            started: Some(generation),
        }
    }

    fn arm_next_tick(&self) {
        let weak = Arc::downgrade(&self.shared);
        let armed = next_tick(move || {
            if let Some(shared) = weak.upgrade() {
                debug!("Next tick, opening gate");
                shared.inner.lock().gate.open();
            }
        });
        if let Err(e) = armed {
            debug!("{}; gate opens on the following read", e);
            self.activate();
        }
    }

    // == Attempt ==
    /// Runs the loader for the attempt reserved under `generation`.
    fn attempt(&self, generation: Generation) -> Read<T> {
        let (attempt, completion) = ValueState::run_loader(generation, &self.shared.loader);

        let superseded = {
            let mut inner = self.shared.inner.lock();
            let current = inner.state.as_ref().map(|s| s.generation());
            if current == Some(generation) {
                inner.state = Some(attempt);
                None
            } else {
                debug!("Attempt {} superseded before it returned", generation);
                Some(inner.state.as_ref().and_then(|s| s.value().cloned()))
            }
        };

        if let Some(value) = superseded {
            // Deferred work still runs; `settle` drops its result by generation.
            match completion {
                Completion::Settled => {}
                Completion::Failed(err) => self.shared.report(&err),
                Completion::Pending(pending) => Shared::drive_pending(&self.shared, pending),
            }
            return Read {
                value,
                started: Some(generation),
            };
        }

        match completion {
            Completion::Settled => Shared::schedule_ttl(&self.shared, generation),
            Completion::Failed(err) => {
                self.shared.report(&err);
                Shared::schedule_ttl(&self.shared, generation);
            }
            Completion::Pending(pending) => Shared::drive_pending(&self.shared, pending),
        }

        Read {
            value: self.peek(),
            started: Some(generation),
        }
    }

    // == Reload ==
    /// Background reload for an invalidated cell; the held value stays
    /// visible until the reload lands.
    fn reload(&self, generation: Generation) {
        let weak = Arc::downgrade(&self.shared);
        let spawned = spawn_detached(async move {
            if let Some(shared) = weak.upgrade() {
                Shared::run_reload(shared, generation).await;
            }
        });
        if let Err(e) = spawned {
            warn!("Reload {} not started: {}", generation, e);
            let mut inner = self.shared.inner.lock();
            if inner.reloading == Some(generation) {
                inner.reloading = None;
            }
        }
    }
}

impl<T> Shared<T>
where
    T: Clone + Send + 'static,
{
    fn report(&self, err: &LazyError) {
        if let Some(hook) = &self.on_failure {
            hook(err);
        }
    }

    fn drive_pending(this: &Arc<Self>, pending: PendingLoad<T>) {
        let generation = pending.generation();
        let weak = Arc::downgrade(this);
        let spawned = spawn_detached(async move {
            let outcome = pending.resolve().await;
            if let Some(shared) = weak.upgrade() {
                shared.settle(generation, outcome);
            }
        });
        if let Err(e) = spawned {
            warn!("Attempt {} can never settle: {}", generation, e);
            this.report(&e);
        }
    }

    /// Applies a deferred result to the attempt it belongs to.
    fn settle(self: Arc<Self>, generation: Generation, outcome: Result<T, LazyError>) {
        let applied = {
            let mut inner = self.inner.lock();
            match inner.state.as_mut() {
                Some(state) if state.generation() == generation => {
                    if let Ok(value) = &outcome {
                        state.settle(value.clone());
                    }
                    true
                }
                _ => {
                    debug!("Discarding result of superseded attempt {}", generation);
                    false
                }
            }
        };
        if let Err(err) = &outcome {
            self.report(err);
        }
        if applied {
            Shared::schedule_ttl(&self, generation);
        }
    }

    async fn run_reload(this: Arc<Self>, generation: Generation) {
        let (attempt, completion) = ValueState::run_loader(generation, &this.loader);
        let outcome = match completion {
            Completion::Settled => match attempt.value() {
                Some(value) => Ok(value.clone()),
                None => return,
            },
            Completion::Failed(err) => Err(err),
            Completion::Pending(pending) => {
                let weak = Arc::downgrade(&this);
                drop(this);
                let outcome = pending.resolve().await;
                match weak.upgrade() {
                    Some(shared) => return Shared::finish_reload(shared, generation, outcome),
                    None => return,
                }
            }
        };
        Shared::finish_reload(this, generation, outcome);
    }

    fn finish_reload(this: Arc<Self>, generation: Generation, outcome: Result<T, LazyError>) {
        {
            let mut inner = this.inner.lock();
            if inner.reloading != Some(generation) {
                debug!("Discarding superseded reload {}", generation);
                return;
            }
            inner.reloading = None;
            match &outcome {
                Ok(value) => {
                    debug!("Reload {} replaced the held value", generation);
                    inner.state = Some(ValueState::new(Some(value.clone()), generation));
                    inner.gate.open();
                }
                Err(_) => debug!("Reload {} failed, keeping the held value", generation),
            }
        }
        match outcome {
            Ok(_) => Shared::schedule_ttl(&this, generation),
            Err(err) => this.report(&err),
        }
    }

    /// Reverts to "not attempted" after the TTL, unless the state has moved on.
    fn schedule_ttl(this: &Arc<Self>, generation: Generation) {
        let Some(ttl) = this.ttl else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(this);
        let scheduled = spawn_after(ttl, move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut inner = shared.inner.lock();
            if inner.state.as_ref().map(|s| s.generation()) == Some(generation) {
                debug!("TTL elapsed for {}, reverting", generation);
                inner.state = None;
            }
        });
        if let Err(e) = scheduled {
            warn!("TTL for {} not scheduled: {}", generation, e);
        }
    }
}

impl<T> Read<T> {
    fn empty() -> Self {
        Self {
            value: None,
            started: None,
        }
    }
}

impl<T> fmt::Debug for LazyCell<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("LazyCell")
            .field("value", &inner.state.as_ref().and_then(|s| s.value()))
            .field("generation", &inner.state.as_ref().map(|s| s.generation()))
            .field("gate", &inner.gate)
            .field("invalid", &inner.invalid)
            .finish()
    }
}

// == Cell Builder ==
/// Configures a [`LazyCell`].
pub struct CellBuilder<T> {
    loader: Loader<T>,
    gate: Gate,
    ttl: Option<Duration>,
    on_failure: Option<FailureHook>,
}

impl<T> CellBuilder<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(loader: Loader<T>) -> Self {
        Self {
            loader,
            gate: Gate::Immediate,
            ttl: None,
            on_failure: None,
        }
    }

    pub fn gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    /// Discard each loaded value (or failure) this long after it settles.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Receives every loader failure. Readers still see `None`.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LazyError) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> LazyCell<T> {
        LazyCell {
            shared: Arc::new(Shared {
                loader: self.loader,
                ttl: self.ttl,
                on_failure: self.on_failure,
                inner: Mutex::new(Inner {
                    state: None,
                    gate: GateState::from_gate(&self.gate),
                    invalid: false,
                    reloading: None,
                }),
            }),
        }
    }
}
