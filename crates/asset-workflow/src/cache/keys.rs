//! Cache key to path derivation.

use std::path::{Path, PathBuf};

use crate::error::{AssetError, AssetResult};
use crate::types::CachedBundle;

pub(crate) fn bundle_dir_impl(cache_dir: &Path, bundle: &CachedBundle) -> AssetResult<PathBuf> {
    check_component(&bundle.name)?;
    check_component(&bundle.hash)?;
    Ok(cache_dir.join(&bundle.name).join(&bundle.hash))
}

/// Names and hashes become single path components; anything that could
/// escape the cache directory is refused.
fn check_component(part: &str) -> AssetResult<()> {
    if part.is_empty()
        || part == "."
        || part == ".."
        || part.contains(['/', '\\', '\0'])
    {
        return Err(AssetError::Cache {
            message: format!("invalid cache key component: {:?}", part),
        });
    }
    Ok(())
}
