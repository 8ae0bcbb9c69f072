//! Keyed Cache Module
//!
//! A map from key to lazily loaded value, one [`LazyCell`] per key, with
//! TTL expiry swept in batches rather than per entry.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::expiry::{BatchAccumulator, ExpiryWindow, WindowTiming};
use crate::cache::CacheStats;
use crate::cell::{Gate, Generation, KeyLoader, LazyCell};
use crate::config::Config;

// == Cache Options ==
/// Settings for a [`KeyedLazyCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Batched expiry TTL; `None` keeps entries until removed.
    pub ttl: Option<Duration>,
    /// Gate given to every entry's cell.
    pub gate: Gate,
}

impl CacheOptions {
    /// No TTL, immediate gates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables batched expiry with the given TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Gate policy for every entry created by `get`.
    pub fn gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    /// Options taken from configuration: the TTL only, immediate gates.
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.cache_ttl(),
            gate: Gate::Immediate,
        }
    }
}

type ExpiryItem<K> = (K, Generation);

struct CacheInner<K, V> {
    entries: HashMap<K, LazyCell<V>>,
    /// Newest window first. Only the front one may still be loadable.
    windows: VecDeque<ExpiryWindow<ExpiryItem<K>>>,
    stats: CacheStats,
}

struct CacheShared<K, V> {
    loader: KeyLoader<K, V>,
    options: CacheOptions,
    inner: Mutex<CacheInner<K, V>>,
}

// == Keyed Lazy Cache ==
/// A lazily populated map.
///
/// Entries are created on first [`get`](Self::get) and loaded through the
/// key loader according to the configured gate. Enumeration only yields
/// entries whose value is present.
///
/// # Example
/// ```ignore
/// let cache = KeyedLazyCache::new(
///     KeyLoader::from_async(|id: &u32| fetch_object(*id)),
///     CacheOptions::new().ttl(Duration::from_secs(30)),
/// );
/// let maybe_object = cache.get(&42);
/// ```
pub struct KeyedLazyCache<K, V> {
    shared: Arc<CacheShared<K, V>>,
}

impl<K, V> KeyedLazyCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates an empty cache.
    pub fn new(loader: KeyLoader<K, V>, options: CacheOptions) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                loader,
                options,
                inner: Mutex::new(CacheInner {
                    entries: HashMap::new(),
                    windows: VecDeque::new(),
                    stats: CacheStats::new(),
                }),
            }),
        }
    }

    /// Creates a cache with options taken from the Config.
    pub fn from_config(loader: KeyLoader<K, V>, config: &Config) -> Self {
        Self::new(loader, CacheOptions::from_config(config))
    }

    pub fn options(&self) -> &CacheOptions {
        &self.shared.options
    }

    // == Get ==
    /// Returns the current value for `key`, creating and loading its entry
    /// on first access. Never waits: a loading entry reads as `None`.
    pub fn get(&self, key: &K) -> Option<V> {
        let cell = {
            let mut inner = self.shared.inner.lock();
            let existing = inner.entries.get(key).map(LazyCell::handle);
            match existing {
                Some(cell) => {
                    inner.stats.record_hit();
                    cell
                }
                None => {
                    let cell = self.shared.new_cell(key.clone());
                    let handle = cell.handle();
                    inner.entries.insert(key.clone(), cell);
                    inner.stats.record_miss();
                    handle
                }
            }
        };

        let read = cell.read();
        if let Some(generation) = read.started {
            CacheShared::track_attempt(&self.shared, key, generation);
        }
        read.value
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any entry. Entries set this way
    /// are not swept by TTL expiry until a reload replaces the written value;
    /// remove them with [`delete`](Self::delete).
    pub fn set(&self, key: K, value: V) {
        let cell = self.shared.new_cell(key.clone());
        cell.set_value(Some(value));
        let mut inner = self.shared.inner.lock();
        inner.entries.insert(key, cell);
    }

    /// True if an entry exists for `key`, loading or not.
    pub fn has(&self, key: &K) -> bool {
        self.shared.inner.lock().entries.contains_key(key)
    }

    // == Delete ==
    /// Removes the entry. Returns whether one existed.
    pub fn delete(&self, key: &K) -> bool {
        self.shared.inner.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.shared.inner.lock().entries.clear();
    }

    /// Number of entries, loading ones included.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Invalidate ==
    /// Marks the entry stale; the next `get` serves the held value and reloads
    /// it in the background. Returns whether the entry existed.
    ///
    /// The reload counts as a loader attempt, so with a TTL an entry written
    /// by [`set`](Self::set) becomes subject to expiry once invalidated.
    pub fn invalidate(&self, key: &K) -> bool {
        match self.cell(key) {
            Some(cell) => {
                cell.invalidate();
                true
            }
            None => false,
        }
    }

    /// Opens the gate of an existing entry. Returns whether the entry existed.
    pub fn activate(&self, key: &K) -> bool {
        match self.cell(key) {
            Some(cell) => {
                cell.activate();
                true
            }
            None => false,
        }
    }

    // == Enumeration ==
    /// Every key, including entries that are still loading.
    pub fn keys(&self) -> Vec<K> {
        self.shared.inner.lock().entries.keys().cloned().collect()
    }

    /// Values of entries whose value is present.
    pub fn values(&self) -> Vec<V> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Key/value pairs of entries whose value is present.
    pub fn entries(&self) -> Vec<(K, V)> {
        let inner = self.shared.inner.lock();
        inner
            .entries
            .iter()
            .filter_map(|(k, cell)| cell.peek().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Calls `f` for each entry whose value is present. The cache is not
    /// locked while `f` runs.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for (k, v) in self.entries() {
            f(&k, &v);
        }
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.shared.inner.lock();
        let mut stats = inner.stats.clone();
        stats.set_total_entries(inner.entries.len());
        stats
    }

    fn cell(&self, key: &K) -> Option<LazyCell<V>> {
        self.shared.inner.lock().entries.get(key).map(LazyCell::handle)
    }
}

impl<K, V> CacheShared<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    fn new_cell(&self, key: K) -> LazyCell<V> {
        LazyCell::builder(self.loader.bind(key))
            .gate(self.options.gate.clone())
            .build()
    }

    /// Counts the attempt and registers it with the open expiry window.
    fn track_attempt(this: &Arc<Self>, key: &K, generation: Generation) {
        let mut inner = this.inner.lock();
        inner.stats.record_load();

        let Some(ttl) = this.options.ttl else {
            return;
        };

        let needs_window = !inner.windows.front().is_some_and(|w| w.is_loadable());
        if needs_window {
            let weak: Weak<Self> = Arc::downgrade(this);
            let opened = ExpiryWindow::open(WindowTiming::for_ttl(ttl), move |items| {
                if let Some(shared) = weak.upgrade() {
                    shared.sweep(items);
                }
            });
            match opened {
                Ok(window) => inner.windows.push_front(window),
                Err(e) => {
                    warn!("Entry {} will not expire: {}", generation, e);
                    return;
                }
            }
        }

        if let Some(window) = inner.windows.front() {
            window.add((key.clone(), generation));
        }
    }

    /// Removes each swept key whose entry still carries the scheduled
    /// generation, then drops windows that have fired.
    fn sweep(&self, items: Vec<ExpiryItem<K>>) {
        let mut inner = self.inner.lock();
        let mut removed = 0u64;
        for (key, generation) in items {
            let current = inner.entries.get(&key).and_then(|cell| cell.generation());
            if current == Some(generation) {
                inner.entries.remove(&key);
                removed += 1;
            }
        }
        inner.windows.retain(|w| !w.is_ready());
        inner.stats.record_expirations(removed);
        let remaining = inner.entries.len();
        inner.stats.set_total_entries(remaining);
        debug!("Expiry sweep removed {} entries, {} remain", removed, remaining);
    }
}

impl<K, V> fmt::Debug for KeyedLazyCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("KeyedLazyCache")
            .field("entries", &inner.entries.len())
            .field("windows", &inner.windows.len())
            .field("options", &self.shared.options)
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Load;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn counting_loader(calls: &Arc<AtomicUsize>) -> KeyLoader<String, usize> {
        let calls = calls.clone();
        KeyLoader::from_fn(move |k: &String| {
            calls.fetch_add(1, Ordering::SeqCst);
            k.len()
        })
    }

    fn async_loader() -> KeyLoader<String, String> {
        KeyLoader::new(|k: &String| {
            let k = k.clone();
            Load::deferred(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, anyhow::Error>(k.to_uppercase())
            })
        })
    }

    #[test]
    fn test_get_loads_once_per_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(counting_loader(&calls), CacheOptions::new());

        assert_eq!(cache.get(&"abc".to_string()), Some(3));
        assert_eq!(cache.get(&"abc".to_string()), Some(3));
        assert_eq!(cache.get(&"hello".to_string()), Some(5));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_set_skips_loader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(counting_loader(&calls), CacheOptions::new());

        cache.set("key".to_string(), 100);
        assert_eq!(cache.get(&"key".to_string()), Some(100));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delete_and_fresh_miss() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(counting_loader(&calls), CacheOptions::new());
        let key = "k".to_string();

        cache.get(&key);
        assert!(cache.delete(&key));
        assert!(!cache.delete(&key));
        assert!(!cache.has(&key));

        assert_eq!(cache.get(&key), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(counting_loader(&calls), CacheOptions::new());
        cache.get(&"a".to_string());
        cache.set("b".to_string(), 9);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_skips_loading_entries() {
        let cache = KeyedLazyCache::new(async_loader(), CacheOptions::new());
        cache.set("ready".to_string(), "R".to_string());
        assert_eq!(cache.get(&"slow".to_string()), None);

        assert!(cache.has(&"slow".to_string()));
        assert_eq!(cache.keys().len(), 2);
        assert_eq!(cache.entries(), vec![("ready".to_string(), "R".to_string())]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut values = cache.values();
        values.sort();
        assert_eq!(values, vec!["R".to_string(), "SLOW".to_string()]);

        let mut seen = Vec::new();
        cache.for_each(|k, _| seen.push(k.clone()));
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_sweep_window() {
        let cache = KeyedLazyCache::new(
            async_loader(),
            CacheOptions::new().ttl(Duration::from_millis(100)),
        );
        let key = "a".to_string();

        cache.get(&key);
        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(cache.has(&key));
        assert_eq!(cache.get(&key), Some("A".to_string()));

        tokio::time::sleep(Duration::from_millis(61)).await;
        assert!(!cache.has(&key), "Swept by 1.5 × ttl");
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_key_goes_to_new_window() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(
            counting_loader(&calls),
            CacheOptions::new().ttl(Duration::from_millis(100)),
        );

        cache.get(&"early".to_string());
        tokio::time::sleep(Duration::from_millis(120)).await;
        cache.get(&"late".to_string());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cache.has(&"early".to_string()));
        assert!(cache.has(&"late".to_string()), "Late key waits for its own window");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!cache.has(&"late".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_entries_are_not_swept() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(
            counting_loader(&calls),
            CacheOptions::new().ttl(Duration::from_millis(100)),
        );

        cache.get(&"loaded".to_string());
        cache.set("manual".to_string(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!cache.has(&"loaded".to_string()));
        assert!(cache.has(&"manual".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_set_entry_becomes_sweepable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(
            counting_loader(&calls),
            CacheOptions::new().ttl(Duration::from_millis(100)),
        );
        let key = "manual".to_string();

        cache.set(key.clone(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.has(&key), "Written value is not swept");

        cache.invalidate(&key);
        assert_eq!(cache.get(&key), Some(1));
        tick().await;
        assert_eq!(cache.get(&key), Some(6), "Reloaded through the loader");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!cache.has(&key), "Reloaded value expires like any load");
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwritten_entry_survives_sweep() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(
            counting_loader(&calls),
            CacheOptions::new().ttl(Duration::from_millis(100)),
        );
        let key = "abc".to_string();

        cache.get(&key);
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.set(key.clone(), 42);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get(&key), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = KeyedLazyCache::new(
            KeyLoader::from_fn(move |_: &u8| counter.fetch_add(1, Ordering::SeqCst)),
            CacheOptions::new(),
        );

        assert_eq!(cache.get(&1), Some(0));
        assert!(cache.invalidate(&1));
        assert!(!cache.invalidate(&2));
        assert_eq!(cache.get(&1), Some(0));
        tick().await;
        assert_eq!(cache.get(&1), Some(1));
        assert_eq!(cache.stats().loads, 2);
    }

    #[test]
    fn test_inactive_gate_needs_activation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(
            counting_loader(&calls),
            CacheOptions::new().gate(Gate::Inactive),
        );
        let key = "xy".to_string();

        assert_eq!(cache.get(&key), None);
        assert!(cache.activate(&key));
        assert_eq!(cache.get(&key), Some(2));
    }

    #[test]
    fn test_stats() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(counting_loader(&calls), CacheOptions::new());

        cache.get(&"a".to_string()); // miss
        cache.get(&"a".to_string()); // hit
        cache.get(&"b".to_string()); // miss

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.loads, 2);
        assert_eq!(stats.total_entries, 2);
    }

    #[test]
    fn test_ttl_without_runtime_keeps_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = KeyedLazyCache::new(
            counting_loader(&calls),
            CacheOptions::new().ttl(Duration::from_millis(1)),
        );
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert!(cache.has(&"a".to_string()));
    }

    #[test]
    fn test_options_from_config() {
        let config = Config {
            cache_ttl_ms: 500,
            ..Config::default()
        };
        let options = CacheOptions::from_config(&config);
        assert_eq!(options.ttl, Some(Duration::from_millis(500)));
        assert_eq!(options.gate, Gate::Immediate);
    }
}
