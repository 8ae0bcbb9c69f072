//! Lazy State - demo binary
//!
//! Walks through a keyed cache and a host object backed by lazy cells,
//! then prints the cache statistics as JSON.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lazy_state::{Config, Delay, Gate, KeyLoader, KeyedLazyCache, LazyCell, Loader};

/// A host object whose fields load themselves.
struct Profile {
    display_name: LazyCell<String>,
    follower_count: LazyCell<u64>,
}

impl Profile {
    fn new(user_id: u32, config: &Config) -> Self {
        let load_time = Duration::from_millis(config.demo_load_ms);
        let fetches = Arc::new(AtomicU64::new(0));

        let display_name = LazyCell::builder(Loader::from_fn(move || format!("user-{}", user_id)))
            .gate(Gate::Delayed(Delay::from_millis(config.activation_delay_ms)))
            .build();

        let follower_count = LazyCell::builder(Loader::from_async(move || {
            let fetches = fetches.clone();
            async move {
                sleep(load_time).await;
                Ok::<_, anyhow::Error>(100 + fetches.fetch_add(1, Ordering::SeqCst) * 10)
            }
        }))
        .on_failure(|e| warn!("Follower count unavailable: {}", e))
        .build();

        Self {
            display_name,
            follower_count,
        }
    }

    fn display_name(&self) -> Option<String> {
        self.display_name.value()
    }

    fn rename(&self, name: &str) {
        self.display_name.set_value(Some(name.to_string()));
    }

    fn follower_count(&self) -> Option<u64> {
        self.follower_count.value()
    }

    fn refresh_followers(&self) {
        self.follower_count.invalidate();
    }
}

/// Main entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Fill a keyed cache through a deferred loader, then invalidate one key
/// 4. Wait out the TTL, if one is configured
/// 5. Read, rename and refresh a lazily loaded profile
/// 6. Print cache statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lazy_state=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Lazy State demo");

    let config = Config::from_env();
    info!(
        "Configuration loaded: cache_ttl={}ms, activation_delay={}ms, demo_keys={}, demo_load={}ms",
        config.cache_ttl_ms, config.activation_delay_ms, config.demo_keys, config.demo_load_ms
    );

    let load_time = Duration::from_millis(config.demo_load_ms);
    let settle_time = load_time + Duration::from_millis(10);

    // == Keyed cache ==
    let versions = Arc::new(AtomicU64::new(0));
    let cache = KeyedLazyCache::from_config(
        KeyLoader::from_async(move |id: &u32| {
            let id = *id;
            let version = versions.fetch_add(1, Ordering::SeqCst);
            async move {
                sleep(load_time).await;
                Ok::<_, anyhow::Error>(format!("object-{}-v{}", id, version))
            }
        }),
        &config,
    );

    let keys: Vec<u32> = (0..config.demo_keys as u32).collect();
    let first_pass = keys.iter().filter(|k| cache.get(k).is_some()).count();
    info!("First pass: {}/{} values ready", first_pass, keys.len());

    sleep(settle_time).await;
    let second_pass = keys.iter().filter(|k| cache.get(k).is_some()).count();
    info!("Second pass: {}/{} values ready", second_pass, keys.len());

    if let Some(&key) = keys.first() {
        cache.invalidate(&key);
        info!("Invalidated {}, serving {:?}", key, cache.get(&key));
        sleep(settle_time).await;
        info!("After reload {} holds {:?}", key, cache.get(&key));
    }

    if let Some(ttl) = config.cache_ttl() {
        sleep(ttl + ttl / 2 + Duration::from_millis(10)).await;
        info!("After expiry window: {} entries remain", cache.len());
    }

    // == Host object ==
    let profile = Profile::new(7, &config);
    info!("Display name before activation: {:?}", profile.display_name());
    sleep(Duration::from_millis(config.activation_delay_ms) + Duration::from_millis(1)).await;
    info!("Display name: {:?}", profile.display_name());
    profile.rename("seven");
    info!("Display name after rename: {:?}", profile.display_name());

    profile.follower_count();
    sleep(settle_time).await;
    info!("Followers: {:?}", profile.follower_count());
    profile.refresh_followers();
    info!("Followers while refreshing: {:?}", profile.follower_count());
    sleep(settle_time).await;
    info!("Followers after refresh: {:?}", profile.follower_count());

    let stats = cache.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!("Hit rate: {:.2}", stats.hit_rate());

    Ok(())
}
