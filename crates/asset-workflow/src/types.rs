//! Value types shared by the catalog, providers and the asset provider.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-bundle request options, supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRequestOptions {
    /// Bundle name (also the key-derivation salt for encrypted bundles).
    pub bundle_name: String,

    /// Content hash identifying this build of the bundle.
    pub hash: String,

    /// CRC32 of the (decrypted) bundle payload; 0 disables the check.
    #[serde(default)]
    pub crc: u32,

    /// Whether the CRC is also checked when the bundle comes from the cache.
    #[serde(default)]
    pub use_crc_for_cached_bundle: bool,

    /// Maximum HTTP redirects; -1 means not specified.
    #[serde(default = "default_redirect_limit")]
    pub redirect_limit: i32,

    /// Request timeout in seconds; 0 uses the configured default.
    #[serde(default)]
    pub timeout_secs: u64,

    /// Size in bytes of the payload as served (used for download estimates).
    #[serde(default)]
    pub bundle_size: u64,

    /// Whether remote fetches are stored in the versioned cache.
    #[serde(default = "default_true")]
    pub use_asset_bundle_cache: bool,

    /// Whether local bundles go through the fetch + cache path like remote ones.
    #[serde(default)]
    pub use_web_request_for_local_bundle: bool,

    /// Evict every other cached hash of this bundle once this one is loaded.
    #[serde(default)]
    pub clear_other_cached_versions_when_loaded: bool,
}

fn default_redirect_limit() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

impl BundleRequestOptions {
    /// Options with defaults for everything but identity.
    pub fn new(bundle_name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            hash: hash.into(),
            crc: 0,
            use_crc_for_cached_bundle: false,
            redirect_limit: default_redirect_limit(),
            timeout_secs: 0,
            bundle_size: 0,
            use_asset_bundle_cache: true,
            use_web_request_for_local_bundle: false,
            clear_other_cached_versions_when_loaded: false,
        }
    }

    /// Cached identity of this bundle build.
    pub fn cached_bundle(&self) -> CachedBundle {
        CachedBundle::new(&self.bundle_name, &self.hash)
    }

    /// Effective CRC policy.
    pub fn crc_policy(&self) -> CrcPolicy {
        CrcPolicy::from_options(self)
    }

    /// Explicit redirect limit, if any.
    pub fn redirect_limit(&self) -> Option<u32> {
        u32::try_from(self.redirect_limit).ok()
    }

    /// Explicit timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn with_crc(mut self, crc: u32, include_cached: bool) -> Self {
        self.crc = crc;
        self.use_crc_for_cached_bundle = include_cached;
        self
    }

    pub fn with_redirect_limit(mut self, limit: i32) -> Self {
        self.redirect_limit = limit;
        self
    }

    pub fn with_bundle_size(mut self, size: u64) -> Self {
        self.bundle_size = size;
        self
    }

    pub fn with_asset_bundle_cache(mut self, enabled: bool) -> Self {
        self.use_asset_bundle_cache = enabled;
        self
    }

    pub fn with_web_request_for_local(mut self, enabled: bool) -> Self {
        self.use_web_request_for_local_bundle = enabled;
        self
    }

    pub fn with_clear_other_versions(mut self, enabled: bool) -> Self {
        self.clear_other_cached_versions_when_loaded = enabled;
        self
    }
}

/// Compression applied when encoding a bundle; the payload header records it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    #[default]
    Uncompressed,
    Lz4,
}

/// One cached version of a bundle: (bundle name, content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CachedBundle {
    pub name: String,
    pub hash: String,
}

impl CachedBundle {
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }
}

impl fmt::Display for CachedBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.hash)
    }
}

/// Effective CRC policy derived from `crc` and `use_crc_for_cached_bundle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcPolicy {
    Disabled,
    EnabledExcludingCached,
    EnabledIncludingCached,
}

impl CrcPolicy {
    pub fn from_options(options: &BundleRequestOptions) -> Self {
        match (options.crc, options.use_crc_for_cached_bundle) {
            (0, _) => Self::Disabled,
            (_, false) => Self::EnabledExcludingCached,
            (_, true) => Self::EnabledIncludingCached,
        }
    }

    /// Whether a payload read from the given source must be CRC-checked.
    pub fn applies(self, from_cache: bool) -> bool {
        match self {
            Self::Disabled => false,
            Self::EnabledExcludingCached => !from_cache,
            Self::EnabledIncludingCached => true,
        }
    }
}

impl fmt::Display for CrcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "Disabled"),
            Self::EnabledExcludingCached => write!(f, "Enabled, Excluding Cached"),
            Self::EnabledIncludingCached => write!(f, "Enabled, Including Cached"),
        }
    }
}

/// Progress of one download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStatus {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub is_done: bool,
}

impl DownloadStatus {
    /// Fraction downloaded; exactly 1.0 once done.
    pub fn percent(&self) -> f32 {
        if self.is_done {
            return 1.0;
        }
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0) as f32
    }

    /// Terminal status for `total_bytes`.
    pub fn completed(total_bytes: u64) -> Self {
        Self {
            downloaded_bytes: total_bytes,
            total_bytes,
            is_done: true,
        }
    }
}

/// Download status tagged with the asset it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetDownloadStatus {
    pub asset_name: String,
    pub status: DownloadStatus,
}
