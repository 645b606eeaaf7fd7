//! Cache read path.

use chrono::Utc;
use tokio::fs;
use tracing::{debug, warn};

use crate::digest::sha256_hex_bytes;
use crate::error::{AssetError, AssetResult};
use crate::types::CachedBundle;

use super::{put, BundleCache, CacheEntry, CacheMeta, META_FILE, PAYLOAD_FILE};

pub(crate) async fn get_impl(
    cache: &BundleCache,
    bundle: &CachedBundle,
) -> AssetResult<Option<CacheEntry>> {
    let Some(mut metadata) = get_metadata_impl(cache, bundle).await else {
        debug!(name = %bundle.name, hash = %bundle.hash, "bundle not in cache");
        return Ok(None);
    };

    let payload_path = cache.bundle_dir(bundle)?.join(PAYLOAD_FILE);
    let payload = match fs::read(&payload_path).await {
        Ok(payload) => payload,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(AssetError::Cache {
                message: format!("failed to read cached bundle: {}", e),
            })
        }
    };

    let computed_digest = sha256_hex_bytes(&payload);
    if computed_digest != metadata.digest {
        warn!(
            name = %bundle.name,
            hash = %bundle.hash,
            expected = %metadata.digest,
            actual = %computed_digest,
            "cache integrity check failed"
        );
        return Err(AssetError::Cache {
            message: format!(
                "integrity check failed for {}: expected {}, got {}",
                bundle, metadata.digest, computed_digest
            ),
        });
    }

    metadata.last_used = Utc::now();
    if let Err(e) = put::write_meta_impl(cache, bundle, &metadata).await {
        warn!(name = %bundle.name, hash = %bundle.hash, error = %e, "failed to touch cache entry");
    }

    debug!(name = %bundle.name, hash = %bundle.hash, "cache hit");
    Ok(Some(CacheEntry { payload, metadata }))
}

pub(crate) async fn get_metadata_impl(
    cache: &BundleCache,
    bundle: &CachedBundle,
) -> Option<CacheMeta> {
    let bundle_dir = cache.bundle_dir(bundle).ok()?;
    if !bundle_dir.join(PAYLOAD_FILE).exists() {
        return None;
    }
    let content = fs::read(bundle_dir.join(META_FILE)).await.ok()?;
    serde_json::from_slice(&content).ok()
}

pub(crate) async fn list_impl(cache: &BundleCache) -> AssetResult<Vec<(CachedBundle, CacheMeta)>> {
    let mut result = Vec::new();

    if !cache.cache_dir().exists() {
        return Ok(result);
    }

    let mut names = fs::read_dir(cache.cache_dir())
        .await
        .map_err(|e| AssetError::Cache {
            message: format!("failed to read cache directory: {}", e),
        })?;

    while let Some(name_entry) = names.next_entry().await.map_err(|e| AssetError::Cache {
        message: format!("failed to read directory entry: {}", e),
    })? {
        let name_path = name_entry.path();
        if !name_path.is_dir() {
            continue;
        }

        let name = name_entry.file_name().to_string_lossy().to_string();

        let mut hashes = fs::read_dir(&name_path)
            .await
            .map_err(|e| AssetError::Cache {
                message: format!("failed to read version directory: {}", e),
            })?;

        while let Some(hash_entry) = hashes.next_entry().await.map_err(|e| AssetError::Cache {
            message: format!("failed to read directory entry: {}", e),
        })? {
            if !hash_entry.path().is_dir() {
                continue;
            }

            let bundle = CachedBundle::new(
                name.clone(),
                hash_entry.file_name().to_string_lossy().to_string(),
            );
            if let Some(meta) = get_metadata_impl(cache, &bundle).await {
                result.push((bundle, meta));
            }
        }
    }

    result.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(result)
}
