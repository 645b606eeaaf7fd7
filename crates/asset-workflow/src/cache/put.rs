//! Cache put path.

use chrono::Utc;
use tokio::fs;
use tracing::debug;

use crate::digest::sha256_hex_bytes;
use crate::error::{AssetError, AssetResult};
use crate::types::CachedBundle;

use super::{io, BundleCache, CacheMeta, META_FILE, PAYLOAD_FILE};

/// Payload first, metadata last: a version is visible only once both exist.
pub(crate) async fn put_impl(
    cache: &BundleCache,
    bundle: &CachedBundle,
    payload: &[u8],
) -> AssetResult<()> {
    let bundle_dir = cache.bundle_dir(bundle)?;

    fs::create_dir_all(&bundle_dir)
        .await
        .map_err(|e| AssetError::Cache {
            message: format!("failed to create cache directory: {}", e),
        })?;

    let now = Utc::now();
    let metadata = CacheMeta {
        cached_at: now,
        last_used: now,
        digest: sha256_hex_bytes(payload),
        size: payload.len() as u64,
        crc: crc32fast::hash(payload),
    };

    io::write_atomic_impl(&bundle_dir.join(PAYLOAD_FILE), payload).await?;
    write_meta_impl(cache, bundle, &metadata).await?;

    debug!(
        name = %bundle.name,
        hash = %bundle.hash,
        size = metadata.size,
        "cached bundle"
    );
    Ok(())
}

pub(crate) async fn write_meta_impl(
    cache: &BundleCache,
    bundle: &CachedBundle,
    metadata: &CacheMeta,
) -> AssetResult<()> {
    let meta_json = serde_json::to_vec_pretty(metadata).map_err(|e| AssetError::Cache {
        message: format!("failed to serialize metadata: {}", e),
    })?;
    io::write_atomic_impl(&cache.bundle_dir(bundle)?.join(META_FILE), &meta_json).await
}
