//! Loader Module
//!
//! The unit of work a cell evaluates. A loader returns either a ready result or
//! a deferred computation, and may choose differently on every call.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

// == Load ==
/// The outcome of one loader invocation.
pub enum Load<T> {
    /// The value (or failure) is already known.
    Ready(anyhow::Result<T>),
    /// The value arrives once this future resolves.
    Deferred(BoxFuture<'static, anyhow::Result<T>>),
}

impl<T> Load<T> {
    /// A successful ready value.
    pub fn ready(value: T) -> Self {
        Load::Ready(Ok(value))
    }

    /// A ready failure.
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Load::Ready(Err(error.into()))
    }

    /// A value produced later by `future`.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Load::Deferred(future.boxed())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Load::Deferred(_))
    }
}

impl<T> fmt::Debug for Load<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Load::Ready(Ok(_)) => f.write_str("Load::Ready(Ok)"),
            Load::Ready(Err(e)) => write!(f, "Load::Ready(Err({}))", e),
            Load::Deferred(_) => f.write_str("Load::Deferred"),
        }
    }
}

// == Loader ==
/// Shared handle to a zero-argument loader function.
///
/// Cloning is cheap; every clone calls the same function.
pub struct Loader<T> {
    f: Arc<dyn Fn() -> Load<T> + Send + Sync>,
}

impl<T> Loader<T> {
    /// Wraps a function that decides per call whether it is ready or deferred.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Load<T> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Wraps an infallible synchronous function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new(move || Load::ready(f()))
    }

    /// Wraps an async function; every call produces a deferred load.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(move || Load::deferred(f()))
    }

    // == Call ==
    /// Invokes the loader once.
    pub fn call(&self) -> Load<T> {
        (self.f)()
    }
}

impl<T> Clone for Loader<T> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<T> fmt::Debug for Loader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader").finish_non_exhaustive()
    }
}

// == Key Loader ==
/// Shared handle to a per-key loader, used by the keyed cache.
pub struct KeyLoader<K, V> {
    f: Arc<dyn Fn(&K) -> Load<V> + Send + Sync>,
}

impl<K, V> KeyLoader<K, V>
where
    K: Send + Sync + 'static,
    V: 'static,
{
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&K) -> Load<V> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Wraps an infallible synchronous per-key function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Self::new(move |k| Load::ready(f(k)))
    }

    /// Wraps an async per-key function.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(&K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        Self::new(move |k| Load::deferred(f(k)))
    }

    /// Binds the loader to one key, producing the loader for that key's cell.
    pub fn bind(&self, key: K) -> Loader<V> {
        let f = self.f.clone();
        Loader::new(move || f(&key))
    }
}

impl<K, V> Clone for KeyLoader<K, V> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}
