//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check entry store, key and write-behind behavior over
//! generated inputs.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{BackendAdapter, InMemoryBackend};
use crate::cache::{CacheKey, EntryStore, MAX_KEY_LENGTH, RESERVED_PREFIXES};
use crate::strategy::{saver_fn, FlushPolicy, WriteBehindQueue};

// == Test Configuration ==
const TEST_NAMESPACE: &str = "prop";
const TEST_TIMEOUT: Duration = Duration::from_millis(500);

fn new_store() -> EntryStore {
    let backend = Arc::new(InMemoryBackend::new());
    EntryStore::new(BackendAdapter::new(backend, TEST_TIMEOUT), TEST_NAMESPACE).unwrap()
}

// == Strategies ==
/// Generates valid `tag:id` cache keys
fn valid_key_strategy() -> impl Strategy<Value = CacheKey> {
    ("[a-z]{1,8}", "[a-zA-Z0-9_]{1,32}").prop_filter_map("reserved tag", |(tag, id)| {
        CacheKey::new(&tag, id).ok()
    })
}

/// Generates cache values
fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

#[derive(Debug, Clone)]
enum StoreOp {
    Write { key: CacheKey, value: Vec<u8> },
    Read { key: CacheKey },
    Remove { key: CacheKey },
}

/// Small key space so operations collide
fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    let key = (0u8..6).prop_map(|id| CacheKey::new("item", id).unwrap());
    prop_oneof![
        (key.clone(), value_strategy()).prop_map(|(key, value)| StoreOp::Write { key, value }),
        key.clone().prop_map(|key| StoreOp::Read { key }),
        key.prop_map(|key| StoreOp::Remove { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Storing a value and reading it back before expiry returns the same bytes.
    #[test]
    fn prop_roundtrip_storage(key in valid_key_strategy(), value in value_strategy()) {
        let store = new_store();
        let read = tokio_test::block_on(async {
            store.write(&key, value.clone(), None).await.unwrap();
            store.read(&key).await.unwrap()
        });

        prop_assert_eq!(read.map(|entry| entry.value), Some(value));
    }

    // A removed key reads as a miss.
    #[test]
    fn prop_remove_deletes_entry(key in valid_key_strategy(), value in value_strategy()) {
        let store = new_store();
        let (removed, read) = tokio_test::block_on(async {
            store.write(&key, value, None).await.unwrap();
            let removed = store.remove(&key).await.unwrap();
            (removed, store.read(&key).await.unwrap())
        });

        prop_assert!(removed);
        prop_assert!(read.is_none(), "Key should not exist after remove");
    }

    // The last write to a key wins.
    #[test]
    fn prop_overwrite_semantics(
        key in valid_key_strategy(),
        first in value_strategy(),
        second in value_strategy()
    ) {
        let store = new_store();
        let read = tokio_test::block_on(async {
            store.write(&key, first, None).await.unwrap();
            store.write(&key, second.clone(), None).await.unwrap();
            store.read(&key).await.unwrap()
        });

        prop_assert_eq!(read.map(|entry| entry.value), Some(second));
    }

    // Hit and miss counters match a model of the store contents.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(store_op_strategy(), 1..50)) {
        let store = new_store();
        let mut model: HashMap<CacheKey, Vec<u8>> = HashMap::new();
        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;

        tokio_test::block_on(async {
            for op in ops {
                match op {
                    StoreOp::Write { key, value } => {
                        store.write(&key, value.clone(), None).await.unwrap();
                        model.insert(key, value);
                    }
                    StoreOp::Read { key } => {
                        let read = store.read(&key).await.unwrap();
                        assert_eq!(read.map(|entry| entry.value), model.get(&key).cloned());
                        if model.contains_key(&key) {
                            expected_hits += 1;
                        } else {
                            expected_misses += 1;
                        }
                    }
                    StoreOp::Remove { key } => {
                        let removed = store.remove(&key).await.unwrap();
                        assert_eq!(removed, model.remove(&key).is_some());
                    }
                }
            }
        });

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
    }

    // Group eviction removes exactly the keys written under that tag.
    #[test]
    fn prop_group_eviction_is_exact(
        products in prop::collection::hash_set(0u32..1000, 0..20),
        users in prop::collection::hash_set(0u32..1000, 0..20)
    ) {
        let store = new_store();
        let (removed, survivors) = tokio_test::block_on(async {
            for id in &products {
                store.write(&CacheKey::new("product", id).unwrap(), b"p".to_vec(), None).await.unwrap();
            }
            for id in &users {
                store.write(&CacheKey::new("user", id).unwrap(), b"u".to_vec(), None).await.unwrap();
            }

            let removed = store.remove_group("product").await.unwrap();
            let mut survivors = 0;
            for id in &users {
                if store.read(&CacheKey::new("user", id).unwrap()).await.unwrap().is_some() {
                    survivors += 1;
                }
            }
            for id in &products {
                assert!(store.read(&CacheKey::new("product", id).unwrap()).await.unwrap().is_none());
            }
            (removed, survivors)
        });

        prop_assert_eq!(removed, products.len());
        prop_assert_eq!(survivors, users.len());
    }
}

// == Key Validation ==
proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Keys with a reserved prefix are always rejected.
    #[test]
    fn prop_reserved_prefix_rejected(
        prefix_index in 0usize..RESERVED_PREFIXES.len(),
        rest in "[a-z0-9:]{0,32}"
    ) {
        let raw = format!("{}{}", RESERVED_PREFIXES[prefix_index], rest);
        prop_assert!(CacheKey::parse(raw).is_err());
    }

    // Non-empty keys within the length limit and without a reserved prefix parse unchanged.
    #[test]
    fn prop_plain_keys_accepted(raw in "[a-k][a-z0-9:_]{0,200}") {
        prop_assume!(raw.len() <= MAX_KEY_LENGTH);
        prop_assume!(!RESERVED_PREFIXES.iter().any(|p| raw.starts_with(*p)));

        let key = CacheKey::parse(raw.clone()).unwrap();
        prop_assert_eq!(key.as_str(), raw.as_str());
    }

    #[test]
    fn prop_overlong_keys_rejected(extra in 1usize..64) {
        let raw = "k".repeat(MAX_KEY_LENGTH + extra);
        prop_assert!(CacheKey::parse(raw).is_err());
    }
}

// == Write-Behind Coalescing ==
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // For any enqueue sequence, draining persists each key once with its last value.
    #[test]
    fn prop_write_behind_last_write_wins(
        writes in prop::collection::vec((0u8..5, any::<u8>()), 1..40)
    ) {
        let queue = WriteBehindQueue::new(FlushPolicy {
            batch_size: 3,
            ..FlushPolicy::default()
        });
        let saved: Arc<Mutex<Vec<(CacheKey, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let saver = {
            let saved = saved.clone();
            saver_fn(move |key: CacheKey, value: Vec<u8>| {
                let saved = saved.clone();
                async move {
                    saved.lock().unwrap().push((key, value));
                    anyhow::Ok(())
                }
            })
        };

        let mut expected: HashMap<CacheKey, Vec<u8>> = HashMap::new();
        for (id, byte) in &writes {
            let key = CacheKey::new("item", id).unwrap();
            queue.enqueue(key.clone(), vec![*byte]);
            expected.insert(key, vec![*byte]);
        }

        let report = tokio_test::block_on(queue.drain(&saver));
        let saved = saved.lock().unwrap().clone();

        prop_assert!(queue.is_empty());
        prop_assert_eq!(report.persisted, expected.len());
        let distinct: HashSet<&CacheKey> = saved.iter().map(|(key, _)| key).collect();
        prop_assert_eq!(distinct.len(), saved.len(), "A key was persisted twice");
        let persisted: HashMap<CacheKey, Vec<u8>> = saved.into_iter().collect();
        prop_assert_eq!(persisted, expected);
    }
}
