//! Environment-level configuration (`spec.md` §6).
//!
//! This crate carries no global mutable singleton for configuration (see the redesign note
//! in `spec.md` §9): a caller constructs one [`EngineConfig`] at startup and threads it
//! through the [`crate::verifier::Verifier`] it builds.

use std::{path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_MAX_WARM: usize = 10;
const DEFAULT_COMPILE_TIMEOUT_SEC: u64 = 120;
const DEFAULT_MAX_SOURCE_BYTES: u64 = 20_000_000;
const DEFAULT_RELEASE_INDEX_URL: &str = "https://binaries.soliditylang.org/linux-amd64/list.json";
const DEFAULT_CACHE_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `COMPILER_CACHE_DIR` — directory holding downloaded compiler binaries, auto-created.
    pub compiler_cache_dir: PathBuf,
    /// `COMPILER_MAX_WARM` — bound on the number of warm (in-memory loaded) compiler handles.
    pub compiler_max_warm: usize,
    /// `COMPILER_COMPILE_TIMEOUT_SEC` — wall-clock deadline for a single compilation.
    pub compile_timeout: Duration,
    /// `MAX_SOURCE_BYTES` — total size cap across all source units in a bundle.
    pub max_source_bytes: u64,
    /// `RELEASE_INDEX_URL` — authoritative version list endpoint.
    pub release_index_url: String,
    /// Bound on the number of memoized compilation artifacts (C7); not named by an
    /// individual env var in the spec's §6 table, defaulted per §4.7.
    pub compilation_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compiler_cache_dir: std::env::temp_dir().join("contract-verifier").join("compilers"),
            compiler_max_warm: DEFAULT_MAX_WARM,
            compile_timeout: Duration::from_secs(DEFAULT_COMPILE_TIMEOUT_SEC),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            release_index_url: DEFAULT_RELEASE_INDEX_URL.to_string(),
            compilation_cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Reads overrides from the environment, falling back to spec-mandated defaults for any
    /// variable that is absent or fails to parse.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            compiler_cache_dir: std::env::var("COMPILER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.compiler_cache_dir),
            compiler_max_warm: env_parsed("COMPILER_MAX_WARM").unwrap_or(default.compiler_max_warm),
            compile_timeout: env_parsed::<u64>("COMPILER_COMPILE_TIMEOUT_SEC")
                .map(Duration::from_secs)
                .unwrap_or(default.compile_timeout),
            max_source_bytes: env_parsed("MAX_SOURCE_BYTES").unwrap_or(default.max_source_bytes),
            release_index_url: std::env::var("RELEASE_INDEX_URL")
                .unwrap_or(default.release_index_url),
            compilation_cache_size: default.compilation_cache_size,
        }
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.compiler_max_warm, 10);
        assert_eq!(config.compile_timeout, Duration::from_secs(120));
        assert_eq!(config.max_source_bytes, 20_000_000);
        assert_eq!(config.compilation_cache_size, 256);
    }
}
