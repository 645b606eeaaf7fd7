//! Cache eviction and cleanup.

use tokio::fs;
use tracing::{debug, info};

use crate::error::{AssetError, AssetResult};
use crate::types::CachedBundle;

use super::{read, BundleCache};

pub(crate) async fn evict_impl(cache: &BundleCache, bundle: &CachedBundle) -> AssetResult<()> {
    let bundle_dir = cache.bundle_dir(bundle)?;

    if bundle_dir.exists() {
        fs::remove_dir_all(&bundle_dir)
            .await
            .map_err(|e| AssetError::Cache {
                message: format!("failed to evict cache entry: {}", e),
            })?;
        debug!(name = %bundle.name, hash = %bundle.hash, "evicted from cache");
    }

    // Drop the per-name directory once its last version is gone.
    if let Some(name_dir) = bundle_dir.parent() {
        let _ = fs::remove_dir(name_dir).await;
    }

    Ok(())
}

pub(crate) async fn evict_other_versions_impl(
    cache: &BundleCache,
    keep: &CachedBundle,
) -> AssetResult<Vec<CachedBundle>> {
    let mut evicted = Vec::new();
    for (bundle, _) in read::list_impl(cache).await? {
        if bundle.name == keep.name && bundle.hash != keep.hash {
            evict_impl(cache, &bundle).await?;
            evicted.push(bundle);
        }
    }
    if !evicted.is_empty() {
        info!(
            name = %keep.name,
            kept = %keep.hash,
            evicted = evicted.len(),
            "cleared other cached versions"
        );
    }
    Ok(evicted)
}

/// Evict least-recently-used versions until the total fits `max_bytes`.
pub(crate) async fn enforce_limit_impl(
    cache: &BundleCache,
    protect: Option<&CachedBundle>,
) -> AssetResult<Vec<CachedBundle>> {
    let max_bytes = cache.max_bytes();
    if max_bytes == 0 {
        return Ok(Vec::new());
    }

    let mut entries = read::list_impl(cache).await?;
    let mut total: u64 = entries.iter().map(|(_, meta)| meta.size).sum();
    if total <= max_bytes {
        return Ok(Vec::new());
    }

    entries.sort_by(|a, b| a.1.last_used.cmp(&b.1.last_used).then_with(|| a.0.cmp(&b.0)));

    let mut evicted = Vec::new();
    for (bundle, meta) in entries {
        if total <= max_bytes {
            break;
        }
        if Some(&bundle) == protect {
            continue;
        }
        evict_impl(cache, &bundle).await?;
        total = total.saturating_sub(meta.size);
        evicted.push(bundle);
    }

    if !evicted.is_empty() {
        info!(
            evicted = evicted.len(),
            total_bytes = total,
            max_bytes,
            "cache over size limit, evicted least recently used"
        );
    }
    Ok(evicted)
}

pub(crate) async fn clear_impl(cache: &BundleCache) -> AssetResult<()> {
    if cache.cache_dir().exists() {
        fs::remove_dir_all(cache.cache_dir())
            .await
            .map_err(|e| AssetError::Cache {
                message: format!("failed to clear cache: {}", e),
            })?;
        debug!("cleared bundle cache");
    }
    Ok(())
}
