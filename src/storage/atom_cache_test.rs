use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[test]
fn second_hit_promotes_to_protected_and_survives_probation_eviction() {
    let cache: TwoQCache<u64, u64> = TwoQCache::new(/* max_entries */ 1, /* max_bytes */ 1024);
    cache.put(1, 100, 8);
    assert_eq!(cache.get(&1), Some(100));
    // Second insertion at capacity 1 should evict probation entries
    // before touching a promoted (protected) key.
    cache.put(2, 200, 8);
    assert_eq!(cache.get(&1), Some(100));
}

#[test]
fn miss_then_hit_are_reflected_in_metrics() {
    let cache: TwoQCache<u64, u64> = TwoQCache::new(16, 4096);
    assert!(cache.get(&42).is_none());
    cache.put(42, 999, 8);
    assert_eq!(cache.get(&42), Some(999));
    let metrics = cache.metrics();
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.puts, 1);
}

#[test]
fn single_flight_loader_runs_exactly_once_for_concurrent_waiters() {
    let cache: Arc<TwoQCache<u64, u64>> = Arc::new(TwoQCache::new(16, 4096));
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let calls = calls.clone();
        handles.push(std::thread::spawn(move || {
            cache
                .get_or_load(7, |_| 8, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    Ok(777)
                })
                .unwrap()
        }));
    }

    for h in handles {
        assert_eq!(h.join().unwrap(), 777);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn eviction_respects_byte_size_cap() {
    let cache: TwoQCache<u64, Vec<u8>> = TwoQCache::new(100, 16);
    cache.put(1, vec![0u8; 10], 10);
    cache.put(2, vec![0u8; 10], 10);
    let metrics = cache.metrics();
    assert!(metrics.size_bytes <= 16);
    assert!(metrics.evictions >= 1);
}
