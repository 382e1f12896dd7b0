//! C7 — Compilation Cache.
//!
//! A bounded in-memory LRU keyed by the Compilation Input Key (`spec.md` §3), with a
//! single-flight in-flight table so concurrent requests sharing a key observe exactly one
//! compilation (§8 quantified invariant 2).

use crate::types::CompilationArtifact;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::broadcast;

/// A cryptographic digest over the tuple in §3: bundle-or-unit content, compiler build id,
/// contract name, optimizer flag+runs, libraries map, evm target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputKey([u8; 32]);

impl InputKey {
    pub fn compute(
        source_digest_input: &str,
        compiler_build_id: &str,
        contract_name: &str,
        optimizer_enabled: bool,
        optimizer_runs: u32,
        libraries: &BTreeMap<String, String>,
        evm_target: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_digest_input.as_bytes());
        hasher.update(b"\0");
        hasher.update(compiler_build_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(contract_name.as_bytes());
        hasher.update(b"\0");
        hasher.update([optimizer_enabled as u8]);
        hasher.update(optimizer_runs.to_le_bytes());
        for (name, address) in libraries {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(address.as_bytes());
            hasher.update(b";");
        }
        hasher.update(evm_target.as_bytes());
        Self(hasher.finalize().into())
    }
}

struct LruEntry {
    artifact: Arc<CompilationArtifact>,
    order: u64,
}

enum Slot {
    Ready(Arc<CompilationArtifact>),
    InFlight(broadcast::Sender<Arc<CompilationArtifact>>),
}

/// Size-bounded (default 256) LRU mapping from [`InputKey`] to artifact, with single-flight
/// coordination for concurrent misses on the same key.
pub struct CompileCache {
    capacity: usize,
    entries: Mutex<BTreeMap<InputKey, LruEntry>>,
    in_flight: Mutex<BTreeMap<InputKey, broadcast::Sender<Arc<CompilationArtifact>>>>,
    tick: Mutex<u64>,
}

pub enum Lookup {
    Hit(Arc<CompilationArtifact>),
    /// No entry and no in-flight compile; caller must compile and call `complete`.
    Miss,
    /// Another caller is already compiling this key; await the receiver for the result.
    Await(broadcast::Receiver<Arc<CompilationArtifact>>),
}

impl CompileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(BTreeMap::new()),
            tick: Mutex::new(0),
        }
    }

    /// Looks up `key`, registering the caller as the sole compiler on a miss so subsequent
    /// concurrent lookups become `Await` instead of a second `Miss`.
    pub fn get_or_claim(&self, key: InputKey) -> Lookup {
        if let Some(entry) = self.entries.lock().get(&key) {
            return Lookup::Hit(entry.artifact.clone());
        }

        let mut in_flight = self.in_flight.lock();
        if let Some(sender) = in_flight.get(&key) {
            return Lookup::Await(sender.subscribe());
        }

        let (sender, _receiver) = broadcast::channel(1);
        in_flight.insert(key, sender);
        Lookup::Miss
    }

    /// Called by the single claimant of a `Miss` once compilation succeeds: stores the
    /// artifact, evicts if over capacity, and wakes any awaiting callers.
    pub fn complete(&self, key: InputKey, artifact: Arc<CompilationArtifact>) {
        let order = {
            let mut tick = self.tick.lock();
            *tick += 1;
            *tick
        };

        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity && !entries.contains_key(&key) {
                if let Some(evict_key) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.order)
                    .map(|(k, _)| *k)
                {
                    entries.remove(&evict_key);
                }
            }
            entries.insert(
                key,
                LruEntry {
                    artifact: artifact.clone(),
                    order,
                },
            );
        }

        if let Some(sender) = self.in_flight.lock().remove(&key) {
            let _ = sender.send(artifact);
        }
    }

    /// Called by the single claimant of a `Miss` if compilation fails or is cancelled: releases
    /// the in-flight slot without writing a cache entry (§5 cancellation invariant).
    pub fn abandon(&self, key: InputKey) {
        self.in_flight.lock().remove(&key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn artifact() -> Arc<CompilationArtifact> {
        Arc::new(CompilationArtifact {
            abi: serde_json::json!([]),
            deploy_bytecode: "60".to_string(),
            runtime_bytecode: "60".to_string(),
            metadata_json: "{}".to_string(),
            main_unit_name: "Main.sol".to_string(),
            was_flattened: false,
            warnings: vec![],
            source_map: None,
            library_offsets: vec![],
        })
    }

    #[test]
    fn equal_inputs_produce_equal_keys() {
        let libs = BTreeMap::new();
        let a = InputKey::compute("content", "0.8.20", "A", true, 200, &libs, "paris");
        let b = InputKey::compute("content", "0.8.20", "A", true, 200, &libs, "paris");
        assert_eq!(a, b);
    }

    #[test]
    fn differing_inputs_produce_different_keys() {
        let libs = BTreeMap::new();
        let a = InputKey::compute("content", "0.8.20", "A", true, 200, &libs, "paris");
        let b = InputKey::compute("content", "0.8.20", "A", true, 201, &libs, "paris");
        assert_ne!(a, b);
    }

    #[test]
    fn miss_then_hit_after_complete() {
        let cache = CompileCache::new(256);
        let libs = BTreeMap::new();
        let key = InputKey::compute("content", "0.8.20", "A", true, 200, &libs, "paris");

        assert!(matches!(cache.get_or_claim(key), Lookup::Miss));
        cache.complete(key, artifact());
        assert!(matches!(cache.get_or_claim(key), Lookup::Hit(_)));
    }

    #[test]
    fn second_concurrent_miss_becomes_await() {
        let cache = CompileCache::new(256);
        let libs = BTreeMap::new();
        let key = InputKey::compute("content", "0.8.20", "A", true, 200, &libs, "paris");

        assert!(matches!(cache.get_or_claim(key), Lookup::Miss));
        assert!(matches!(cache.get_or_claim(key), Lookup::Await(_)));
    }

    #[test]
    fn abandon_releases_slot_without_caching() {
        let cache = CompileCache::new(256);
        let libs = BTreeMap::new();
        let key = InputKey::compute("content", "0.8.20", "A", true, 200, &libs, "paris");

        assert!(matches!(cache.get_or_claim(key), Lookup::Miss));
        cache.abandon(key);
        assert!(cache.is_empty());
        assert!(matches!(cache.get_or_claim(key), Lookup::Miss));
    }

    #[test]
    fn eviction_bounds_capacity() {
        let cache = CompileCache::new(1);
        let libs = BTreeMap::new();
        let key_a = InputKey::compute("a", "0.8.20", "A", true, 200, &libs, "paris");
        let key_b = InputKey::compute("b", "0.8.20", "A", true, 200, &libs, "paris");

        cache.get_or_claim(key_a);
        cache.complete(key_a, artifact());
        cache.get_or_claim(key_b);
        cache.complete(key_b, artifact());

        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.get_or_claim(key_a), Lookup::Miss));
    }
}
