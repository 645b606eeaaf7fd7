//! Versioned bundle cache.
//!
//! Stores decrypted bundle payloads keyed by (bundle name, content hash).
//! Several hashes of one bundle may coexist until evicted. Integrity is
//! checked on every read.
//!
//! # Cache Structure
//!
//! ```text
//! <cache_dir>/{bundle_name}/{hash}/
//!   bundle.bin       # Decrypted payload
//!   metadata.json    # Cache metadata (written last)
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WorkflowConfig;
use crate::error::AssetResult;
use crate::types::CachedBundle;

mod evict;
mod io;
mod keys;
mod put;
mod read;

pub(crate) const PAYLOAD_FILE: &str = "bundle.bin";
pub(crate) const META_FILE: &str = "metadata.json";

/// Cache metadata stored alongside a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    /// When the payload was stored.
    pub cached_at: DateTime<Utc>,

    /// Last read; drives LRU eviction.
    pub last_used: DateTime<Utc>,

    /// Payload digest (sha256:...).
    pub digest: String,

    /// Payload size in bytes.
    pub size: u64,

    /// CRC32 of the payload.
    pub crc: u32,
}

/// Cached payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub metadata: CacheMeta,
}

/// Bundle cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct BundleCache {
    cache_dir: PathBuf,
    /// Size limit in bytes; 0 means unlimited.
    max_bytes: u64,
}

impl BundleCache {
    /// Create a cache at the default location.
    ///
    /// Default: `<platform cache dir>/asset-workflow/bundles`
    pub fn new() -> AssetResult<Self> {
        Ok(Self::with_dir(io::default_cache_dir_impl()?))
    }

    /// Create a cache with a custom directory.
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_bytes: 0,
        }
    }

    pub fn from_config(config: &WorkflowConfig) -> AssetResult<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => Self::with_dir(dir),
            None => Self::new()?,
        };
        Ok(cache.with_max_bytes(config.max_cache_bytes))
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn bundle_dir(&self, bundle: &CachedBundle) -> AssetResult<PathBuf> {
        keys::bundle_dir_impl(&self.cache_dir, bundle)
    }

    /// Whether this exact version is fully committed.
    pub async fn is_version_cached(&self, bundle: &CachedBundle) -> bool {
        self.get_metadata(bundle).await.is_some()
    }

    /// Read a cached payload, verifying integrity.
    ///
    /// Returns `None` if not cached. Returns `Err` if the payload does not
    /// match its recorded digest; the caller should evict and re-fetch.
    pub async fn get(&self, bundle: &CachedBundle) -> AssetResult<Option<CacheEntry>> {
        read::get_impl(self, bundle).await
    }

    /// Metadata without the payload.
    pub async fn get_metadata(&self, bundle: &CachedBundle) -> Option<CacheMeta> {
        read::get_metadata_impl(self, bundle).await
    }

    /// Store a payload, then evict least-recently-used versions while over
    /// the size limit. The version just stored is never evicted by this call.
    pub async fn put(&self, bundle: &CachedBundle, payload: &[u8]) -> AssetResult<Vec<CachedBundle>> {
        put::put_impl(self, bundle, payload).await?;
        evict::enforce_limit_impl(self, Some(bundle)).await
    }

    /// Remove one version.
    pub async fn evict(&self, bundle: &CachedBundle) -> AssetResult<()> {
        evict::evict_impl(self, bundle).await
    }

    /// Remove every cached version of `bundle.name` except `bundle.hash`.
    pub async fn evict_other_versions(&self, bundle: &CachedBundle) -> AssetResult<Vec<CachedBundle>> {
        evict::evict_other_versions_impl(self, bundle).await
    }

    /// Evict least-recently-used versions until under the size limit.
    pub async fn enforce_limit(&self) -> AssetResult<Vec<CachedBundle>> {
        evict::enforce_limit_impl(self, None).await
    }

    /// Remove everything.
    pub async fn clear(&self) -> AssetResult<()> {
        evict::clear_impl(self).await
    }

    /// All committed versions.
    pub async fn list(&self) -> AssetResult<Vec<(CachedBundle, CacheMeta)>> {
        read::list_impl(self).await
    }

    /// Sum of committed payload sizes.
    pub async fn total_size(&self) -> AssetResult<u64> {
        Ok(self.list().await?.iter().map(|(_, meta)| meta.size).sum())
    }
}
