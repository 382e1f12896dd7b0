//! C1 — Version Catalog.
//!
//! Resolves a user-supplied compiler shorthand (`"X.Y.Z"` or `"X.Y.Z+commit.<hex>"`) against
//! the authoritative release index, memoizing results in-process. Network failure is retried
//! with exponential backoff before surfacing as fatal, using the same `reqwest-middleware` +
//! `reqwest-retry` stack the teacher carries in `smart-contract-verifier`'s `Cargo.toml`.

use crate::{error::CatalogError, types::CompilerDescriptor};
use parking_lot::RwLock;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::{collections::HashMap, time::Duration};

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(2);
const MAX_RETRIES: u32 = 3;

/// One entry in the upstream release index: shorthand -> (semver, build path/url fragment).
#[derive(Debug, Clone, serde::Deserialize)]
struct ReleaseEntry {
    shorthand: String,
    build: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ReleaseIndex {
    releases: Vec<ReleaseEntry>,
}

/// Queries the authoritative compiler release list and maps shorthands to canonical
/// descriptors, memoizing resolved entries for the lifetime of the process.
pub struct VersionCatalog {
    release_index_url: url::Url,
    http: ClientWithMiddleware,
    memo: RwLock<HashMap<String, CompilerDescriptor>>,
}

impl VersionCatalog {
    pub fn new(release_index_url: url::Url) -> Self {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(RETRY_BASE, RETRY_CAP)
            .build_with_max_retries(MAX_RETRIES);
        let http = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Self {
            release_index_url,
            http,
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves `shorthand` to a [`CompilerDescriptor`], consulting the memo table first.
    pub async fn resolve(&self, shorthand: &str) -> Result<CompilerDescriptor, CatalogError> {
        validate_shorthand(shorthand)?;

        if let Some(descriptor) = self.memo.read().get(shorthand) {
            return Ok(descriptor.clone());
        }

        let index = self.fetch_index().await?;
        let entry = index
            .releases
            .into_iter()
            .find(|r| r.shorthand == shorthand)
            .ok_or_else(|| CatalogError::UnknownVersion(shorthand.to_string()))?;

        let descriptor = to_descriptor(shorthand, &entry)?;
        self.memo
            .write()
            .insert(shorthand.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    async fn fetch_index(&self) -> Result<ReleaseIndex, CatalogError> {
        let response = self
            .http
            .get(self.release_index_url.clone())
            .send()
            .await
            .map_err(|err| CatalogError::Unreachable(anyhow::Error::new(err)))?;
        let body = response
            .bytes()
            .await
            .map_err(|err| CatalogError::Unreachable(anyhow::Error::new(err)))?;
        let mut deserializer = serde_json::Deserializer::from_slice(&body);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|err| CatalogError::Unreachable(anyhow::anyhow!("{err} at {}", err.path())))
    }
}

fn validate_shorthand(shorthand: &str) -> Result<(), CatalogError> {
    let version_part = shorthand.split('+').next().unwrap_or(shorthand);
    semver::Version::parse(version_part)
        .map_err(|_| CatalogError::MalformedShorthand(shorthand.to_string()))?;
    Ok(())
}

fn to_descriptor(
    shorthand: &str,
    entry: &ReleaseEntry,
) -> Result<CompilerDescriptor, CatalogError> {
    let version_part = shorthand.split('+').next().unwrap_or(shorthand);
    let version = semver::Version::parse(version_part)
        .map_err(|_| CatalogError::MalformedShorthand(shorthand.to_string()))?;
    let source_url = url::Url::parse(&entry.build)
        .map_err(|_| CatalogError::MalformedShorthand(entry.build.clone()))?;
    Ok(CompilerDescriptor {
        version,
        canonical_build_id: entry.shorthand.clone(),
        source_url,
    })
}
