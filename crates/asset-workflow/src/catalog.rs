//! Content catalog: which assets exist, which bundles hold them, and how to
//! fetch each bundle.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": "2024.06.01",
//!   "bundles": {
//!     "cube_bundle": {
//!       "uris": ["https://cdn.example.com/bundles/cube_bundle"],
//!       "provider": "aes-cbc",
//!       "options": { "bundle_name": "cube_bundle", "hash": "9f1c..", "bundle_size": 4096 }
//!     }
//!   },
//!   "assets": {
//!     "Cube": { "type_name": "GameObject", "bundle": "cube_bundle", "dependencies": [] }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AssetError, AssetResult};
use crate::types::{BundleRequestOptions, CachedBundle};

/// Provider id of the plain (unencrypted) bundle provider.
pub const DEFAULT_PROVIDER_ID: &str = "bundle";

/// Parsed catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Free-form catalog build identifier.
    #[serde(default)]
    pub version: String,

    /// Bundles by name.
    #[serde(default)]
    pub bundles: BTreeMap<String, BundleEntry>,

    /// Assets by key.
    #[serde(default)]
    pub assets: BTreeMap<String, AssetEntry>,
}

/// One bundle in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Where the bundle can be fetched, tried in order.
    pub uris: Vec<String>,

    /// Provider that turns the raw bytes into a loaded bundle.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Request options; absent options are a catalog error at load time.
    #[serde(default)]
    pub options: Option<BundleRequestOptions>,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

/// One asset in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Asset type name, matched against `AssetType::TYPE_NAME`.
    pub type_name: String,

    /// Bundle containing the asset.
    pub bundle: String,

    /// Bundles that must be loaded before `bundle`.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A resolved bundle: name, sources, provider and options.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleLocation {
    pub bundle_name: String,
    pub uris: Vec<String>,
    pub provider_id: String,
    pub options: Option<BundleRequestOptions>,
}

impl BundleLocation {
    /// Identifier used in diagnostics: the primary URI, else the bundle name.
    pub fn internal_id(&self) -> &str {
        self.uris
            .first()
            .map(String::as_str)
            .unwrap_or(&self.bundle_name)
    }

    /// Whether the primary source is served over HTTP(S).
    pub fn is_remote(&self) -> bool {
        is_remote_uri(self.internal_id())
    }

    /// Cache identity, when options are present.
    pub fn cached_bundle(&self) -> Option<CachedBundle> {
        self.options.as_ref().map(BundleRequestOptions::cached_bundle)
    }

    /// Whether a fetched payload goes into the versioned cache.
    ///
    /// Remote bundles are cached unless the options opt out; local bundles
    /// only when they are routed through the web-request path.
    pub fn is_cacheable(&self) -> bool {
        match &self.options {
            None => false,
            Some(opts) if self.is_remote() => opts.use_asset_bundle_cache,
            Some(opts) => opts.use_web_request_for_local_bundle && opts.use_asset_bundle_cache,
        }
    }
}

pub(crate) fn is_remote_uri(uri: &str) -> bool {
    let lower = uri.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A resolved asset: key, type and every bundle it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLocation {
    pub key: String,
    pub type_name: String,
    pub bundle: BundleLocation,
    pub dependencies: Vec<BundleLocation>,
}

impl ResourceLocation {
    /// Dependencies first, then the primary bundle. Duplicates removed.
    pub fn bundles(&self) -> Vec<&BundleLocation> {
        let mut seen = Vec::<&str>::new();
        let mut out = Vec::new();
        for loc in self.dependencies.iter().chain(std::iter::once(&self.bundle)) {
            if !seen.contains(&loc.bundle_name.as_str()) {
                seen.push(&loc.bundle_name);
                out.push(loc);
            }
        }
        out
    }
}

/// A bundle whose identity differs between two catalogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleChange {
    pub bundle_name: String,
    pub previous: Option<CachedBundle>,
    pub current: Option<CachedBundle>,
}

/// Result of swapping catalogs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogUpdate {
    pub changed: Vec<BundleChange>,
}

impl CatalogUpdate {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Identities that are no longer referenced by the new catalog.
    pub fn superseded(&self) -> impl Iterator<Item = &CachedBundle> {
        self.changed.iter().filter_map(|c| c.previous.as_ref())
    }
}

impl Catalog {
    /// Parse and validate a catalog from JSON.
    pub fn from_json(json: &str) -> AssetResult<Self> {
        let catalog: Catalog = serde_json::from_str(json).map_err(|e| AssetError::Catalog {
            message: format!("failed to parse catalog: {}", e),
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read a catalog file.
    pub async fn load(path: impl AsRef<Path>) -> AssetResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AssetError::Catalog {
                message: format!("failed to read catalog {}: {}", path.display(), e),
            })?;
        let catalog = Self::from_json(&content)?;
        debug!(
            path = %path.display(),
            bundles = catalog.bundles.len(),
            assets = catalog.assets.len(),
            "loaded catalog"
        );
        Ok(catalog)
    }

    pub fn to_json(&self) -> AssetResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| AssetError::Catalog {
            message: format!("failed to serialize catalog: {}", e),
        })
    }

    /// Every asset's bundle and dependencies must exist and have a source.
    pub fn validate(&self) -> AssetResult<()> {
        for (name, bundle) in &self.bundles {
            if bundle.uris.is_empty() {
                return Err(AssetError::Catalog {
                    message: format!("bundle {} has no uris", name),
                });
            }
        }
        for (key, asset) in &self.assets {
            for bundle in std::iter::once(&asset.bundle).chain(&asset.dependencies) {
                if !self.bundles.contains_key(bundle) {
                    return Err(AssetError::Catalog {
                        message: format!("asset {} references unknown bundle {}", key, bundle),
                    });
                }
            }
        }
        Ok(())
    }

    fn bundle_location(&self, name: &str) -> Option<BundleLocation> {
        self.bundles.get(name).map(|entry| BundleLocation {
            bundle_name: name.to_string(),
            uris: entry.uris.clone(),
            provider_id: entry.provider.clone(),
            options: entry.options.clone(),
        })
    }

    /// Resolve an asset key. `None` when the key is unknown.
    pub fn resolve(&self, key: &str) -> Option<ResourceLocation> {
        let asset = self.assets.get(key)?;
        let bundle = self.bundle_location(&asset.bundle)?;
        let dependencies = asset
            .dependencies
            .iter()
            .filter_map(|dep| self.bundle_location(dep))
            .collect();
        Some(ResourceLocation {
            key: key.to_string(),
            type_name: asset.type_name.clone(),
            bundle,
            dependencies,
        })
    }

    /// Resolve the single asset of `type_name`.
    pub fn resolve_by_type(&self, type_name: &str) -> AssetResult<ResourceLocation> {
        let matches: Vec<&String> = self
            .assets
            .iter()
            .filter(|(_, asset)| asset.type_name == type_name)
            .map(|(key, _)| key)
            .collect();

        match matches.as_slice() {
            [key] => self.resolve(key).ok_or_else(|| AssetError::InvalidKey {
                key: (*key).clone(),
            }),
            _ => Err(AssetError::NoUniqueTypeMatch {
                type_name: type_name.to_string(),
                matches: matches.len(),
            }),
        }
    }

    /// Bundles whose cache identity differs in `next`.
    pub fn diff(&self, next: &Catalog) -> CatalogUpdate {
        let identity = |catalog: &Catalog, name: &str| {
            catalog
                .bundles
                .get(name)
                .and_then(|b| b.options.as_ref())
                .map(BundleRequestOptions::cached_bundle)
        };

        let mut names: Vec<&String> = self.bundles.keys().chain(next.bundles.keys()).collect();
        names.sort();
        names.dedup();

        let changed = names
            .into_iter()
            .filter_map(|name| {
                let previous = identity(self, name);
                let current = identity(next, name);
                (previous != current).then(|| BundleChange {
                    bundle_name: name.clone(),
                    previous,
                    current,
                })
            })
            .collect();

        CatalogUpdate { changed }
    }
}
