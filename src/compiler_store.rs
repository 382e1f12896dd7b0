//! C2 — Compiler Store.
//!
//! Wraps `foundry_compilers::Solc` — the teacher's actual compiler-binary abstraction — adding
//! the warm LRU layer and single-flight loading the upstream crate does not provide, the way
//! the teacher's own `Compilers<C>` type layers over `ethers_solc`/`foundry_compilers::Solc`.

use crate::{
    error::{CatalogError, CompilerStoreError},
    types::CompilerDescriptor,
    version_catalog::VersionCatalog,
};
use foundry_compilers::Solc;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{broadcast, OnceCell};

/// A runtime handle over a compiler binary. Thread-hostile: the inner `Mutex` serializes use,
/// matching §3's "single-threaded use per handle" invariant.
pub struct Handle {
    pub version: semver::Version,
    pub canonical_build_id: String,
    solc: Mutex<Solc>,
    use_count: AtomicU64,
    last_used: AtomicU64,
}

impl Handle {
    /// Runs `f` against the underlying `Solc` binary under the handle's mutex, recording use
    /// statistics. The blocking work itself is the caller's responsibility to dispatch via
    /// `tokio::task::spawn_blocking`.
    pub fn with_solc<R>(&self, f: impl FnOnce(&Solc) -> R) -> R {
        let guard = self.solc.lock();
        self.use_count.fetch_add(1, Ordering::Relaxed);
        self.last_used.store(now_tick(), Ordering::Relaxed);
        f(&guard)
    }

    pub fn use_count(&self) -> u64 {
        self.use_count.load(Ordering::Relaxed)
    }

    fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }
}

/// Abstraction over a loaded compiler's invocation surface, letting `compile::invoke`'s
/// retry-over-bytecode-hash-options and diagnostic-classification logic be unit-tested
/// against a mock rather than a real `solc` binary.
#[cfg_attr(test, mockall::automock)]
pub trait CompilerBackend {
    fn compile(&self, input: &serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

impl CompilerBackend for Handle {
    fn compile(&self, input: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.with_solc(|solc| solc.compile(input))
            .map_err(anyhow::Error::new)
    }
}

fn now_tick() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct WarmEntry {
    handle: Arc<Handle>,
}

/// Acquires, caches on disk, loads into process, and evicts compiler binaries under the
/// `MAX_WARM` bounded LRU policy of §4.2.
pub struct CompilerStore {
    catalog: VersionCatalog,
    cache_dir: PathBuf,
    max_warm: usize,
    warm: Mutex<HashMap<String, WarmEntry>>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<Result<Arc<Handle>, String>>>>>,
}

impl CompilerStore {
    pub fn new(release_index_url: url::Url, cache_dir: PathBuf, max_warm: usize) -> Self {
        Self {
            catalog: VersionCatalog::new(release_index_url),
            cache_dir,
            max_warm,
            warm: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent: concurrent callers requesting the same shorthand within this process
    /// observe exactly one download/load and share the resulting handle (single-flight).
    pub async fn load(&self, shorthand: &str) -> Result<Arc<Handle>, CompilerStoreError> {
        if let Some(entry) = self.warm.lock().get(shorthand) {
            return Ok(entry.handle.clone());
        }

        let cell = {
            let mut in_flight = self.in_flight.lock();
            in_flight
                .entry(shorthand.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| async {
                self.load_uncached(shorthand)
                    .await
                    .map_err(|err| err.to_string())
            })
            .await
            .clone();

        self.in_flight.lock().remove(shorthand);

        result.map_err(|message| CompilerStoreError::Download(anyhow::anyhow!(message)))
    }

    async fn load_uncached(&self, shorthand: &str) -> Result<Arc<Handle>, CompilerStoreError> {
        let descriptor = self
            .catalog
            .resolve(shorthand)
            .await
            .map_err(CompilerStoreError::from)?;

        let solc = self.acquire_binary(&descriptor).await?;
        let handle = Arc::new(Handle {
            version: descriptor.version.clone(),
            canonical_build_id: descriptor.canonical_build_id.clone(),
            solc: Mutex::new(solc),
            use_count: AtomicU64::new(0),
            last_used: AtomicU64::new(now_tick()),
        });

        self.insert_warm(shorthand, handle.clone());
        Ok(handle)
    }

    async fn acquire_binary(
        &self,
        descriptor: &CompilerDescriptor,
    ) -> Result<Solc, CompilerStoreError> {
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|err| CompilerStoreError::DiskCache(anyhow::Error::new(err)))?;

        let version = descriptor.version.clone();
        let cache_dir = self.cache_dir.clone();
        tokio::task::spawn_blocking(move || {
            // `svm`, the version manager behind `find_or_install_svm_version`, persists
            // downloaded binaries under `SVM_HOME` rather than taking a directory argument.
            std::env::set_var("SVM_HOME", &cache_dir);
            Solc::find_or_install_svm_version(version.to_string())
        })
        .await
        .map_err(|err| CompilerStoreError::Download(anyhow::Error::new(err)))?
        .map_err(|err| CompilerStoreError::Download(anyhow::anyhow!(err.to_string())))
    }

    fn insert_warm(&self, shorthand: &str, handle: Arc<Handle>) {
        let mut warm = self.warm.lock();
        if warm.len() >= self.max_warm && !warm.contains_key(shorthand) {
            let ages: Vec<(String, u64)> = warm
                .iter()
                .map(|(key, entry)| (key.clone(), entry.handle.last_used()))
                .collect();
            if let Some(evict_key) = lru_victim(&ages) {
                warm.remove(&evict_key);
            }
        }
        warm.insert(shorthand.to_string(), WarmEntry { handle });
    }

    pub fn warm_count(&self) -> usize {
        self.warm.lock().len()
    }

    pub fn catalog_error_is_unknown(err: &CatalogError) -> bool {
        matches!(err, CatalogError::UnknownVersion(_))
    }
}

/// Conservative upper bound on how long a single `load` may block on network I/O before a
/// caller should treat the compiler as unavailable; enforced by the caller (C9), not here.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Picks the key with the smallest `last_used` tick, i.e. the least-recently-used entry.
fn lru_victim(ages: &[(String, u64)]) -> Option<String> {
    ages.iter()
        .min_by_key(|(_, last_used)| *last_used)
        .map(|(key, _)| key.clone())
}
