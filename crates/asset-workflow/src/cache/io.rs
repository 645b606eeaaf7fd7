//! Filesystem helpers for the bundle cache.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{AssetError, AssetResult};

pub(crate) fn default_cache_dir_impl() -> AssetResult<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| AssetError::Cache {
            message: "could not determine cache directory".to_string(),
        })?;

    Ok(base.join("asset-workflow").join("bundles"))
}

/// Write `content` to `path` via a sibling temp file and rename.
pub(crate) async fn write_atomic_impl(path: &Path, content: &[u8]) -> AssetResult<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .await
        .map_err(|e| AssetError::Cache {
            message: format!("failed to write temp file: {}", e),
        })?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(AssetError::Cache {
            message: format!("failed to rename temp file: {}", e),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");

        write_atomic_impl(&path, b"first").await.unwrap();
        write_atomic_impl(&path, b"second").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_write_atomic_missing_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing").join("payload.bin");
        assert!(write_atomic_impl(&path, b"x").await.is_err());
    }
}
