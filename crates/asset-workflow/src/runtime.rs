//! Addressable asset runtime.
//!
//! Resolves keys through the catalog, loads the bundles behind them through
//! registered providers, and keeps loaded bundles alive while any
//! [`OperationHandle`] references them.
//!
//! Bundles are keyed in memory by cache identity (`name@hash`). Concurrent
//! loads of one identity await the same in-flight future, so a bundle is
//! fetched at most once at a time. Nothing is spawned: loads make progress
//! while a caller awaits them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::task::{Context, Poll};

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::BundleCache;
use crate::catalog::{BundleLocation, Catalog, CatalogUpdate, ResourceLocation};
use crate::config::WorkflowConfig;
use crate::error::{AssetError, AssetResult};
use crate::fetch::BundleFetcher;
use crate::provider::{AssetBundleProvider, LoadedBundle, ProvideContext, ResourceProvider};
use crate::types::{CachedBundle, DownloadStatus};

type LoadFuture = Shared<BoxFuture<'static, AssetResult<Arc<LoadedBundle>>>>;

/// One asset taken out of a loaded bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAsset {
    pub key: String,
    pub type_name: String,
    /// Bundle the asset came from.
    pub bundle: String,
    pub data: serde_json::Value,
}

impl LoadedAsset {
    /// Decode the asset data into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> AssetResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| AssetError::InvalidBundle {
            bundle: self.bundle.clone(),
            message: format!("failed to decode asset {}: {}", self.key, e),
        })
    }
}

struct BundleSlot {
    location: BundleLocation,
    provider: Arc<dyn ResourceProvider>,
    refs: usize,
    load: LoadFuture,
    received: watch::Receiver<u64>,
}

struct Inner {
    config: WorkflowConfig,
    catalog: RwLock<Arc<Catalog>>,
    providers: RwLock<HashMap<String, Arc<dyn ResourceProvider>>>,
    fetcher: BundleFetcher,
    cache: BundleCache,
    decrypted_dir: PathBuf,
    slots: Mutex<HashMap<String, BundleSlot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn slot_key(location: &BundleLocation) -> String {
    location
        .cached_bundle()
        .map(|identity| identity.to_string())
        .unwrap_or_else(|| location.bundle_name.clone())
}

/// Addressable asset runtime. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Addressables {
    inner: Arc<Inner>,
}

impl fmt::Debug for Addressables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addressables")
            .field("cache_dir", &self.inner.cache.cache_dir())
            .field("loaded_bundles", &lock(&self.inner.slots).len())
            .finish()
    }
}

impl Addressables {
    /// Create a runtime over `catalog`, with the plain bundle provider
    /// registered under `"bundle"`.
    pub fn new(config: WorkflowConfig, catalog: Catalog) -> AssetResult<Self> {
        let fetcher = BundleFetcher::new(&config)?;
        Self::with_fetcher(config, catalog, fetcher)
    }

    /// Create a runtime with a preconfigured fetcher.
    pub fn with_fetcher(
        config: WorkflowConfig,
        catalog: Catalog,
        fetcher: BundleFetcher,
    ) -> AssetResult<Self> {
        config.validate()?;
        catalog.validate()?;

        let cache = BundleCache::from_config(&config)?;
        let default_provider: Arc<dyn ResourceProvider> = Arc::new(AssetBundleProvider::new());
        let mut providers = HashMap::new();
        providers.insert(default_provider.id().to_string(), default_provider);

        info!(
            cache_dir = %cache.cache_dir().display(),
            catalog_version = %catalog.version,
            assets = catalog.assets.len(),
            "asset runtime ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                decrypted_dir: config.decrypted_dir(),
                config,
                catalog: RwLock::new(Arc::new(catalog)),
                providers: RwLock::new(providers),
                fetcher,
                cache,
                slots: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Register `provider` under its id, replacing any previous one.
    pub fn register_provider(&self, provider: Arc<dyn ResourceProvider>) {
        let id = provider.id().to_string();
        debug!(provider = %id, "registered resource provider");
        self.inner
            .providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, provider);
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &BundleCache {
        &self.inner.cache
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.inner
            .catalog
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Resolve `key`; `None` when the catalog has no such asset.
    pub fn resolve_location(&self, key: &str) -> Option<ResourceLocation> {
        self.catalog().resolve(key)
    }

    /// Resolve the only asset of `type_name`.
    pub fn resolve_by_type(&self, type_name: &str) -> AssetResult<ResourceLocation> {
        self.catalog().resolve_by_type(type_name)
    }

    fn require_location(&self, key: &str) -> AssetResult<ResourceLocation> {
        self.resolve_location(key)
            .ok_or_else(|| AssetError::InvalidKey {
                key: key.to_string(),
            })
    }

    /// Whether this exact bundle version is committed to the cache.
    pub async fn is_version_cached(&self, bundle_name: &str, hash: &str) -> bool {
        self.inner
            .cache
            .is_version_cached(&CachedBundle::new(bundle_name, hash))
            .await
    }

    /// Bundles of `location` that a download would fetch: remote and not
    /// served from the cache. Bundles with the cache disabled always count.
    async fn pending_bundles(&self, location: &ResourceLocation) -> Vec<BundleLocation> {
        let mut pending = Vec::new();
        for bundle in location.bundles() {
            if !bundle.is_remote() {
                continue;
            }
            let Some(identity) = bundle.cached_bundle() else {
                continue;
            };
            if !bundle.is_cacheable() || !self.inner.cache.is_version_cached(&identity).await {
                pending.push(bundle.clone());
            }
        }
        pending
    }

    /// Declared bytes still to download for `key`; 0 when fully cached.
    pub async fn get_download_size(&self, key: &str) -> AssetResult<u64> {
        let location = self.require_location(key)?;
        let size: u64 = self
            .pending_bundles(&location)
            .await
            .iter()
            .filter_map(|b| b.options.as_ref())
            .map(|o| o.bundle_size)
            .sum();
        debug!(key, size, "download size");
        Ok(size)
    }

    /// Check that every bundle `key` still needs is reachable.
    ///
    /// Returns the number of bundles probed.
    pub async fn probe(&self, key: &str) -> AssetResult<usize> {
        let location = self.require_location(key)?;
        let pending = self.pending_bundles(&location).await;
        for bundle in &pending {
            self.inner.fetcher.probe(bundle).await?;
        }
        Ok(pending.len())
    }

    /// Start fetching and caching every bundle `key` depends on.
    ///
    /// The returned operation reports progress through
    /// [`DownloadOperation::progress`] and resolves once every bundle is
    /// loaded. Bundle references taken here are released when it completes
    /// or is dropped.
    pub async fn download_dependencies(&self, key: &str) -> AssetResult<DownloadOperation> {
        let location = self.require_location(key)?;
        let pending = self.pending_bundles(&location).await;
        let total_bytes: u64 = pending
            .iter()
            .filter_map(|b| b.options.as_ref())
            .map(|o| o.bundle_size)
            .sum();

        let bundles: Vec<BundleLocation> = location.bundles().into_iter().cloned().collect();
        let (handle, loads) = self
            .acquire(key, &bundles)
            .map_err(|e| AssetError::operation(key, e))?;

        let pending_keys: Vec<String> = pending.iter().map(slot_key).collect();
        let counters = loads
            .iter()
            .filter(|load| pending_keys.contains(&load.key))
            .map(|load| load.received.clone())
            .collect();

        let owned_key = key.to_string();
        let completion = async move {
            let handle = handle;
            let results = future::try_join_all(loads.into_iter().map(|load| load.future)).await;
            handle.release();
            results
                .map(|loaded| loaded.iter().map(|b| b.transferred_bytes).sum::<u64>())
                .map_err(|e| AssetError::operation(owned_key, e))
        }
        .boxed();

        Ok(DownloadOperation {
            progress: DownloadProgress {
                total_bytes,
                counters,
            },
            completion,
        })
    }

    /// Load the asset at `key`, keeping its bundles loaded until the
    /// returned handle is released.
    pub async fn load_asset(&self, key: &str) -> AssetResult<(LoadedAsset, OperationHandle)> {
        let location = self.require_location(key)?;
        self.load_location(&location).await
    }

    /// Load a resolved location.
    pub async fn load_location(
        &self,
        location: &ResourceLocation,
    ) -> AssetResult<(LoadedAsset, OperationHandle)> {
        let key = location.key.as_str();
        let bundles: Vec<BundleLocation> = location.bundles().into_iter().cloned().collect();
        let (handle, loads) = self
            .acquire(key, &bundles)
            .map_err(|e| AssetError::operation(key, e))?;

        // Dependencies come first; the primary bundle is last.
        let loaded = match future::try_join_all(loads.into_iter().map(|load| load.future)).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(key, error = %e, "asset load failed");
                handle.release();
                return Err(AssetError::operation(key, e));
            }
        };

        let primary = loaded.last().ok_or_else(|| {
            AssetError::operation(
                key,
                AssetError::Catalog {
                    message: format!("asset {} resolves to no bundles", key),
                },
            )
        })?;

        let Some(asset) = primary.bundle.get(key) else {
            handle.release();
            return Err(AssetError::operation(
                key,
                AssetError::InvalidBundle {
                    bundle: location.bundle.bundle_name.clone(),
                    message: format!("bundle does not contain asset {}", key),
                },
            ));
        };

        debug!(key, bundle = %location.bundle.bundle_name, "asset loaded");
        Ok((
            LoadedAsset {
                key: key.to_string(),
                type_name: asset.type_name.clone(),
                bundle: location.bundle.bundle_name.clone(),
                data: asset.data.clone(),
            },
            handle,
        ))
    }

    /// Release the references held by `handle`. Releasing twice is a no-op.
    pub fn release(&self, handle: &OperationHandle) {
        handle.release();
    }

    /// Number of bundles currently held in memory.
    pub fn loaded_bundle_count(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    /// Swap in `catalog` and report which bundle identities changed.
    ///
    /// Cached versions of superseded identities stay on disk; they leave the
    /// cache through size pressure, or when a newer version that asks for it
    /// is loaded.
    pub fn update_catalog(&self, catalog: Catalog) -> AssetResult<CatalogUpdate> {
        catalog.validate()?;

        let update = {
            let mut current = self
                .inner
                .catalog
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let update = current.diff(&catalog);
            *current = Arc::new(catalog);
            update
        };

        let slots = lock(&self.inner.slots);
        for identity in update.superseded() {
            if let Some(slot) = slots.get(&identity.to_string()) {
                debug!(bundle = %identity, refs = slot.refs, "superseded bundle still referenced");
            }
        }
        drop(slots);

        info!(changed = update.changed.len(), "catalog updated");
        Ok(update)
    }

    /// Take one reference on each bundle, starting loads that are not
    /// already in flight.
    fn acquire(
        &self,
        key: &str,
        bundles: &[BundleLocation],
    ) -> AssetResult<(OperationHandle, Vec<SlotLoad>)> {
        let providers = {
            let registry = self
                .inner
                .providers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            bundles
                .iter()
                .map(|b| {
                    registry
                        .get(&b.provider_id)
                        .cloned()
                        .ok_or_else(|| AssetError::Config {
                            message: format!(
                                "no provider registered for id {} (bundle {})",
                                b.provider_id, b.bundle_name
                            ),
                        })
                })
                .collect::<AssetResult<Vec<_>>>()?
        };

        let mut slots = lock(&self.inner.slots);
        let mut loads = Vec::with_capacity(bundles.len());
        for (location, provider) in bundles.iter().zip(providers) {
            let skey = slot_key(location);
            let slot = slots
                .entry(skey.clone())
                .or_insert_with(|| self.start_load(location.clone(), provider));
            slot.refs += 1;
            loads.push(SlotLoad {
                key: skey,
                future: slot.load.clone(),
                received: slot.received.clone(),
            });
        }
        drop(slots);

        let handle = OperationHandle {
            key: key.to_string(),
            slots: loads.iter().map(|l| l.key.clone()).collect(),
            runtime: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        };
        Ok((handle, loads))
    }

    fn start_load(&self, location: BundleLocation, provider: Arc<dyn ResourceProvider>) -> BundleSlot {
        let (tx, received) = watch::channel(0u64);
        let fetcher = self.inner.fetcher.clone();
        let cache = self.inner.cache.clone();
        let decrypted_dir = self.inner.decrypted_dir.clone();
        let task_location = location.clone();
        let task_provider = provider.clone();

        let load = async move {
            let progress = move |bytes: u64| {
                tx.send_if_modified(|seen| {
                    let advanced = bytes > *seen;
                    if advanced {
                        *seen = bytes;
                    }
                    advanced
                });
            };
            let ctx = ProvideContext {
                fetcher: &fetcher,
                cache: &cache,
                decrypted_dir: &decrypted_dir,
                progress: &progress,
            };
            let loaded = task_provider.provide(&task_location, &ctx).await?;
            progress(loaded.transferred_bytes);

            if let Some(options) = &task_location.options {
                if options.clear_other_cached_versions_when_loaded && task_location.is_cacheable() {
                    cache.evict_other_versions(&options.cached_bundle()).await?;
                }
            }
            Ok::<_, AssetError>(Arc::new(loaded))
        }
        .boxed()
        .shared();

        BundleSlot {
            location,
            provider,
            refs: 0,
            load,
            received,
        }
    }
}

impl Inner {
    fn release_slots(&self, keys: &[String]) {
        let mut dropped = Vec::new();
        {
            let mut slots = lock(&self.slots);
            for key in keys {
                let Some(slot) = slots.get_mut(key) else {
                    continue;
                };
                slot.refs = slot.refs.saturating_sub(1);
                if slot.refs == 0 {
                    if let Some(slot) = slots.remove(key) {
                        dropped.push(slot);
                    }
                }
            }
        }

        // Provider release runs outside the lock.
        for slot in dropped {
            let result = match slot.load.peek() {
                Some(Ok(loaded)) => slot.provider.release(Some(&slot.location), Some(loaded)),
                Some(Err(_)) => slot.provider.release(Some(&slot.location), None),
                None => {
                    debug!(bundle = %slot.location.bundle_name, "dropping unfinished bundle load");
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!(bundle = %slot.location.bundle_name, error = %e, "bundle release failed");
            } else {
                debug!(bundle = %slot.location.bundle_name, "bundle unloaded");
            }
        }
    }
}

struct SlotLoad {
    key: String,
    future: LoadFuture,
    received: watch::Receiver<u64>,
}

/// References taken by one load or download.
///
/// Released exactly once: explicitly, or when dropped.
pub struct OperationHandle {
    key: String,
    slots: Vec<String>,
    runtime: Weak<Inner>,
    released: AtomicBool,
}

impl OperationHandle {
    /// Key the operation was started for.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release the references. Returns `false` if already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(inner) = self.runtime.upgrade() {
            inner.release_slots(&self.slots);
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn detached(key: &str) -> Self {
        Self {
            key: key.to_string(),
            slots: Vec::new(),
            runtime: Weak::new(),
            released: AtomicBool::new(false),
        }
    }
}

impl Drop for OperationHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("key", &self.key)
            .field("bundles", &self.slots)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Live byte counters of one download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    total_bytes: u64,
    counters: Vec<watch::Receiver<u64>>,
}

impl DownloadProgress {
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.counters.iter().map(|rx| *rx.borrow()).sum()
    }

    /// Snapshot; never marked done.
    pub fn status(&self) -> DownloadStatus {
        DownloadStatus {
            downloaded_bytes: self.downloaded_bytes(),
            total_bytes: self.total_bytes,
            is_done: false,
        }
    }
}

/// In-flight download of an asset's bundles.
///
/// Resolves to the terminal status.
pub struct DownloadOperation {
    progress: DownloadProgress,
    completion: BoxFuture<'static, AssetResult<u64>>,
}

impl DownloadOperation {
    pub fn progress(&self) -> DownloadProgress {
        self.progress.clone()
    }
}

impl Future for DownloadOperation {
    type Output = AssetResult<DownloadStatus>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        this.completion.poll_unpin(cx).map(|result| {
            result.map(|_| {
                let total = this.progress.total_bytes.max(this.progress.downloaded_bytes());
                DownloadStatus::completed(total)
            })
        })
    }
}

impl fmt::Debug for DownloadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOperation")
            .field("progress", &self.progress)
            .finish()
    }
}
