//! Striped 2Q caches with single-flight load deduplication (spec §4.3):
//! a bytes cache keyed by `(wal_id, offset)` and an object cache keyed by
//! `(wal_id, offset, schema_epoch)`, both built on the same generic
//! [`TwoQCache`].

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use parking_lot::Mutex as PLMutex;

use crate::error::Result;
use crate::storage::block_provider::WalId;

const STRIPES: usize = 16;

fn stripe_of<K: Hash>(key: &K) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % STRIPES
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub size_entries: usize,
    pub size_bytes: u64,
    pub single_flight_dedups: u64,
}

/// Rolling sample of observed latencies, enough to report approximate
/// p50/p95/p99 (spec §4.3 metrics) without a full histogram library.
#[derive(Default)]
struct LatencySamples {
    samples: Vec<Duration>,
}

impl LatencySamples {
    fn record(&mut self, d: Duration) {
        if self.samples.len() >= 4096 {
            self.samples.remove(0);
        }
        self.samples.push(d);
    }

    fn percentile(&self, p: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted = self.samples.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx]
    }
}

struct Shard<K, V> {
    probation: HashMap<K, V>,
    protected: HashMap<K, V>,
    seen_once: std::collections::HashSet<K>,
    byte_size: HashMap<K, u64>,
}

impl<K: Eq + Hash + Clone, V> Default for Shard<K, V> {
    fn default() -> Self {
        Shard {
            probation: HashMap::new(),
            protected: HashMap::new(),
            seen_once: std::collections::HashSet::new(),
            byte_size: HashMap::new(),
        }
    }
}

enum FlightState<V> {
    InFlight,
    Done(Result<V>),
}

/// Generic striped 2Q cache (spec §4.3): first touch lands in
/// `probation`; a second hit promotes a key to `protected`. Eviction
/// drains probation before protected and enforces both entry-count and
/// byte-size caps.
pub struct TwoQCache<K, V> {
    shards: Vec<PLMutex<Shard<K, V>>>,
    max_entries: usize,
    max_bytes: u64,
    metrics: Mutex<CacheMetrics>,
    object_latency: Mutex<LatencySamples>,
    in_flight: Mutex<HashMap<K, Arc<(Mutex<Option<FlightState<V>>>, Condvar)>>>,
}

impl<K, V> TwoQCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        let mut shards = Vec::with_capacity(STRIPES);
        for _ in 0..STRIPES {
            shards.push(PLMutex::new(Shard::default()));
        }
        TwoQCache {
            shards,
            max_entries: max_entries.max(1),
            max_bytes: max_bytes.max(1),
            metrics: Mutex::new(CacheMetrics::default()),
            object_latency: Mutex::new(LatencySamples::default()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        *self.metrics.lock().unwrap()
    }

    pub fn percentile_latency(&self, p: f64) -> Duration {
        self.object_latency.lock().unwrap().percentile(p)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let shard_idx = stripe_of(key);
        let mut shard = self.shards[shard_idx].lock();
        if let Some(v) = shard.protected.get(key).cloned() {
            self.metrics.lock().unwrap().hits += 1;
            return Some(v);
        }
        if let Some(v) = shard.probation.remove(key) {
            // Second hit: promote probation -> protected.
            shard.protected.insert(key.clone(), v.clone());
            self.metrics.lock().unwrap().hits += 1;
            return Some(v);
        }
        self.metrics.lock().unwrap().misses += 1;
        None
    }

    pub fn put(&self, key: K, value: V, byte_size: u64) {
        let shard_idx = stripe_of(&key);
        {
            let mut shard = self.shards[shard_idx].lock();
            if shard.seen_once.contains(&key) {
                shard.protected.insert(key.clone(), value);
            } else {
                shard.seen_once.insert(key.clone());
                shard.probation.insert(key.clone(), value);
            }
            shard.byte_size.insert(key.clone(), byte_size);
        }
        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.puts += 1;
        }
        self.evict_if_needed();
        self.recompute_size_metrics();
    }

    fn total_entries(&self) -> usize {
        self.shards.iter().map(|s| {
            let s = s.lock();
            s.probation.len() + s.protected.len()
        }).sum()
    }

    fn total_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().byte_size.values().sum::<u64>()).sum()
    }

    fn recompute_size_metrics(&self) {
        let entries = self.total_entries();
        let bytes = self.total_bytes();
        let mut metrics = self.metrics.lock().unwrap();
        metrics.size_entries = entries;
        metrics.size_bytes = bytes;
    }

    /// Drains probation first, then protected, until both the
    /// entry-count and byte-size caps are satisfied (spec §4.3:
    /// "Eviction: drain probation first, then protected").
    fn evict_if_needed(&self) {
        let mut evicted = 0u64;
        while self.total_entries() > self.max_entries || self.total_bytes() > self.max_bytes {
            let mut removed_any = false;
            for shard in &self.shards {
                let mut shard = shard.lock();
                if let Some(key) = shard.probation.keys().next().cloned() {
                    shard.probation.remove(&key);
                    shard.byte_size.remove(&key);
                    removed_any = true;
                    evicted += 1;
                    break;
                }
            }
            if removed_any {
                continue;
            }
            for shard in &self.shards {
                let mut shard = shard.lock();
                if let Some(key) = shard.protected.keys().next().cloned() {
                    shard.protected.remove(&key);
                    shard.byte_size.remove(&key);
                    removed_any = true;
                    evicted += 1;
                    break;
                }
            }
            if !removed_any {
                break;
            }
        }
        if evicted > 0 {
            self.metrics.lock().unwrap().evictions += evicted;
        }
    }

    /// Loads `key` via `loader` with single-flight deduplication: the
    /// first caller for a key becomes the leader and runs `loader`,
    /// everyone else blocks on the leader's result (spec §4.3
    /// `SingleFlight`).
    pub fn get_or_load<F>(&self, key: K, byte_size_of: impl Fn(&V) -> u64, loader: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }

        let (flight, is_leader) = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(existing) = in_flight.get(&key) {
                (existing.clone(), false)
            } else {
                let flight = Arc::new((Mutex::new(Some(FlightState::InFlight)), Condvar::new()));
                in_flight.insert(key.clone(), flight.clone());
                (flight, true)
            }
        };

        if is_leader {
            let start = Instant::now();
            let result = loader();
            self.object_latency.lock().unwrap().record(start.elapsed());

            if let Ok(v) = &result {
                self.put(key.clone(), v.clone(), byte_size_of(v));
            }

            let (lock, cvar) = &*flight;
            let mut slot = lock.lock().unwrap();
            *slot = Some(FlightState::Done(clone_result(&result)));
            cvar.notify_all();
            drop(slot);

            self.in_flight.lock().unwrap().remove(&key);
            result
        } else {
            self.metrics.lock().unwrap().single_flight_dedups += 1;
            let (lock, cvar) = &*flight;
            let mut slot = lock.lock().unwrap();
            while matches!(*slot, Some(FlightState::InFlight)) {
                slot = cvar.wait(slot).unwrap();
            }
            // Read, don't consume: more than one follower can be parked
            // on the same leader, and each needs its own copy of the
            // result once it wakes.
            match slot.as_ref() {
                Some(FlightState::Done(result)) => clone_result(result),
                _ => unreachable!("single-flight follower woke with no result"),
            }
        }
    }
}

fn clone_result<V: Clone>(r: &Result<V>) -> Result<V> {
    match r {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(crate::error::Error::unexpected(e.to_string())),
    }
}

/// Key for the bytes cache (spec §4.3: `(wal_id, offset)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BytesCacheKey {
    pub wal_id: WalId,
    pub offset: u64,
}

/// Key for the object cache (spec §4.3: `(wal_id, offset, schema_epoch)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectCacheKey {
    pub wal_id: WalId,
    pub offset: u64,
    pub schema_epoch: u64,
}

#[cfg(test)]
#[path = "atom_cache_test.rs"]
mod atom_cache_test;
