//! Property-Based Tests for Cache Module
//!
//! Runs random operation sequences against the keyed cache and a plain
//! `HashMap` model. Loaders are synchronous and no runtime is present, so
//! every load settles on the read that starts it.

use proptest::prelude::*;
use std::collections::HashMap;

use crate::cache::{CacheOptions, KeyedLazyCache};
use crate::cell::{Generation, KeyLoader, LazyCell, Loader};

// == Strategies ==
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-e]{1,2}"
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[A-Z]{1,8}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Get { key: String },
    Set { key: String, value: String },
    Delete { key: String },
    Invalidate { key: String },
    Clear,
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        4 => key_strategy().prop_map(|key| CacheOp::Get { key }),
        2 => (key_strategy(), value_strategy()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        2 => key_strategy().prop_map(|key| CacheOp::Delete { key }),
        1 => key_strategy().prop_map(|key| CacheOp::Invalidate { key }),
        1 => Just(CacheOp::Clear),
    ]
}

fn loaded(key: &str) -> String {
    format!("loaded:{}", key)
}

fn new_cache() -> KeyedLazyCache<String, String> {
    KeyedLazyCache::new(KeyLoader::from_fn(|k: &String| loaded(k)), CacheOptions::new())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // The cache agrees with a map that fills misses from the same loader.
    #[test]
    fn prop_cache_matches_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let cache = new_cache();
        let mut model: HashMap<String, String> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Get { key } => {
                    let expected = model.entry(key.clone()).or_insert_with(|| loaded(&key)).clone();
                    prop_assert_eq!(cache.get(&key), Some(expected));
                }
                CacheOp::Set { key, value } => {
                    cache.set(key.clone(), value.clone());
                    model.insert(key, value);
                }
                CacheOp::Delete { key } => {
                    prop_assert_eq!(cache.delete(&key), model.remove(&key).is_some());
                }
                CacheOp::Invalidate { key } => {
                    prop_assert_eq!(cache.invalidate(&key), model.contains_key(&key));
                }
                CacheOp::Clear => {
                    cache.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(cache.len(), model.len());
            for key in model.keys() {
                prop_assert!(cache.has(key));
            }
        }

        let mut entries = cache.entries();
        entries.sort();
        let mut expected: Vec<_> = model.into_iter().collect();
        expected.sort();
        prop_assert_eq!(entries, expected);
    }

    // Every get is either a hit or a miss, and each miss starts one load.
    #[test]
    fn prop_statistics_accuracy(keys in prop::collection::vec(key_strategy(), 1..50)) {
        let cache = new_cache();
        let mut seen = std::collections::HashSet::new();
        let mut expected_misses = 0u64;

        for key in &keys {
            if seen.insert(key.clone()) {
                expected_misses += 1;
            }
            cache.get(key);
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits + stats.misses, keys.len() as u64);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.loads, expected_misses);
        prop_assert_eq!(stats.total_entries, seen.len());
    }

    // Generations only ever increase across writes and reloads.
    #[test]
    fn prop_generations_increase(writes in prop::collection::vec(any::<Option<u8>>(), 1..30)) {
        let cell = LazyCell::immediate(Loader::from_fn(|| 0u8));
        let mut last: Option<Generation> = None;

        for write in writes {
            cell.set_value(write);
            cell.value();
            let current = cell.generation();
            prop_assert!(current.is_some());
            if let (Some(prev), Some(now)) = (last, current) {
                prop_assert!(now > prev);
            }
            last = current;
        }
    }
}
