//! Resource providers: turn a bundle location into a loaded bundle.
//!
//! Both shipped providers run the same acquisition pipeline:
//!
//! 1. require request options
//! 2. serve the committed cache version when present
//! 3. otherwise fetch raw bytes, optionally decrypt them into a private temp
//!    file, check the CRC, decode, then commit to the versioned cache
//!
//! They differ only in the decrypt step.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bundle::{verify_crc, AssetBundle};
use crate::cache::BundleCache;
use crate::catalog::BundleLocation;
use crate::crypto::{self, CryptoStreamFactory};
use crate::error::{AssetError, AssetResult};
use crate::fetch::{BundleFetcher, Progress};
use crate::types::{BundleRequestOptions, CachedBundle};

mod bundle;
mod crypto_bundle;

pub use bundle::AssetBundleProvider;
pub use crypto_bundle::CryptoAssetBundleProvider;

/// Everything a provider may use while acquiring one bundle.
pub struct ProvideContext<'a> {
    pub fetcher: &'a BundleFetcher,
    pub cache: &'a BundleCache,
    /// Directory for decrypted payloads awaiting load.
    pub decrypted_dir: &'a Path,
    pub progress: &'a Progress,
}

/// A bundle ready to serve assets.
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub bundle: AssetBundle,
    /// Cache identity, when the location carried options.
    pub identity: Option<CachedBundle>,
    /// Whether the payload came from the versioned cache.
    pub from_cache: bool,
    /// Bytes transferred to acquire it (0 for cache hits).
    pub transferred_bytes: u64,
    /// Private decrypted file to remove on release.
    pub temp_path: Option<PathBuf>,
}

/// Loads bundles for one provider id in the catalog.
#[async_trait]
pub trait ResourceProvider: fmt::Debug + Send + Sync {
    /// Provider id referenced by catalog bundle entries.
    fn id(&self) -> &str;

    async fn provide(
        &self,
        location: &BundleLocation,
        ctx: &ProvideContext<'_>,
    ) -> AssetResult<LoadedBundle>;

    /// Release a bundle this provider produced.
    ///
    /// A missing location is invalid input. A missing bundle means the load
    /// failed upstream; it is logged and otherwise ignored.
    fn release(
        &self,
        location: Option<&BundleLocation>,
        bundle: Option<&LoadedBundle>,
    ) -> AssetResult<()> {
        release_bundle(location, bundle)
    }
}

/// "The Asset Bundle CRC option is ..." diagnostic.
pub fn crc_option_message(options: &BundleRequestOptions) -> String {
    format!("The Asset Bundle CRC option is {}", options.crc_policy())
}

/// "HTTP Redirect Limit is ..." diagnostic.
pub fn redirect_limit_message(options: &BundleRequestOptions) -> String {
    match options.redirect_limit() {
        Some(limit) => format!("HTTP Redirect Limit is specified: {}", limit),
        None => "HTTP Redirect Limit is not specified".to_string(),
    }
}

pub(crate) fn release_bundle(
    location: Option<&BundleLocation>,
    bundle: Option<&LoadedBundle>,
) -> AssetResult<()> {
    let location = location.ok_or_else(|| AssetError::InvalidArgument {
        argument: "location".to_string(),
    })?;

    let Some(bundle) = bundle else {
        warn!(
            "Releasing null asset bundle from location {}.  This is an indication that the bundle failed to load.",
            location.internal_id()
        );
        return Ok(());
    };

    if let Some(path) = &bundle.temp_path {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed decrypted bundle"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove decrypted bundle"),
        }
    }
    Ok(())
}

/// Shared acquisition pipeline; `cipher` selects the decrypt step.
pub(crate) async fn acquire(
    location: &BundleLocation,
    ctx: &ProvideContext<'_>,
    cipher: Option<&dyn CryptoStreamFactory>,
) -> AssetResult<LoadedBundle> {
    let options = location
        .options
        .as_ref()
        .ok_or_else(|| AssetError::MissingOptions {
            bundle: location.bundle_name.clone(),
        })?;

    info!("{}", crc_option_message(options));
    info!("{}", redirect_limit_message(options));

    let identity = options.cached_bundle();
    let cacheable = location.is_cacheable();

    if cacheable {
        if let Some(loaded) = load_cached(location, options, ctx.cache, &identity).await? {
            return Ok(loaded);
        }
    }

    let raw = ctx.fetcher.fetch(location, ctx.progress).await?;
    let transferred_bytes = raw.len() as u64;

    let (payload, temp_path) = match cipher {
        Some(factory) => {
            let decrypted = crypto::decrypt_bytes(factory, &raw, options)?;
            let path = write_decrypted(ctx.decrypted_dir, &identity, &decrypted).await?;
            // Load through the file, as the plain path would.
            let payload = tokio::fs::read(&path).await.map_err(|e| AssetError::Cache {
                message: format!("failed to read decrypted bundle: {}", e),
            })?;
            (payload, Some(path))
        }
        None => (raw, None),
    };

    if options.crc_policy().applies(false) {
        verify_crc(&location.bundle_name, &payload, options.crc)?;
    }

    // Only payloads that decode are committed.
    let bundle = AssetBundle::decode(&location.bundle_name, &payload)?;

    if cacheable {
        let evicted = ctx.cache.put(&identity, &payload).await?;
        if !evicted.is_empty() {
            debug!(bundle = %identity, evicted = evicted.len(), "cache made room");
        }
    }

    debug!(
        bundle = %identity,
        assets = bundle.len(),
        bytes = transferred_bytes,
        "bundle acquired"
    );

    Ok(LoadedBundle {
        bundle,
        identity: Some(identity),
        from_cache: false,
        transferred_bytes,
        temp_path,
    })
}

async fn load_cached(
    location: &BundleLocation,
    options: &BundleRequestOptions,
    cache: &BundleCache,
    identity: &CachedBundle,
) -> AssetResult<Option<LoadedBundle>> {
    let entry = match cache.get(identity).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return Ok(None),
        Err(e) => {
            warn!(bundle = %identity, error = %e, "discarding corrupt cache entry");
            cache.evict(identity).await?;
            return Ok(None);
        }
    };

    if options.crc_policy().applies(true) {
        verify_crc(&location.bundle_name, &entry.payload, options.crc)?;
    }

    let bundle = AssetBundle::decode(&location.bundle_name, &entry.payload)?;
    debug!(bundle = %identity, "bundle served from cache");
    Ok(Some(LoadedBundle {
        bundle,
        identity: Some(identity.clone()),
        from_cache: true,
        transferred_bytes: 0,
        temp_path: None,
    }))
}

/// Decrypted payload path: `<dir>/<name>/<hash>`.
pub(crate) fn decrypted_path(dir: &Path, identity: &CachedBundle) -> PathBuf {
    dir.join(sanitize_file_name(&identity.name))
        .join(sanitize_file_name(&identity.hash))
}

async fn write_decrypted(
    dir: &Path,
    identity: &CachedBundle,
    payload: &[u8],
) -> AssetResult<PathBuf> {
    let io_err = |e: std::io::Error| AssetError::Cache {
        message: format!("failed to write decrypted bundle: {}", e),
    };

    let path = decrypted_path(dir, identity);
    let parent = path.parent().unwrap_or(dir);
    tokio::fs::create_dir_all(parent).await.map_err(io_err)?;

    // Unique per write so concurrent loads never share a temp file.
    let temp_path = parent.join(format!(
        ".{}.{:016x}.tmp",
        sanitize_file_name(&identity.hash),
        rand::random::<u64>()
    ));
    if let Err(e) = tokio::fs::write(&temp_path, payload).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(io_err(e));
    }
    tokio::fs::rename(&temp_path, &path).await.map_err(io_err)?;
    Ok(path)
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::types::CompressionMode;
    use serde_json::json;
    use tempfile::TempDir;

    pub(crate) struct Env {
        pub dir: TempDir,
        pub fetcher: BundleFetcher,
        pub cache: BundleCache,
    }

    impl Env {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let cache = BundleCache::with_dir(dir.path().join("cache"));
            let fetcher = BundleFetcher::new(&WorkflowConfig::default()).unwrap();
            Self {
                dir,
                fetcher,
                cache,
            }
        }

        pub fn decrypted_dir(&self) -> PathBuf {
            self.dir.path().join("Decrypted")
        }

        pub fn ctx<'a>(&'a self, decrypted_dir: &'a Path) -> ProvideContext<'a> {
            ProvideContext {
                fetcher: &self.fetcher,
                cache: &self.cache,
                decrypted_dir,
                progress: &noop_progress,
            }
        }

        /// Write `bytes` as a local bundle file and return its location.
        pub fn local_location(&self, name: &str, bytes: &[u8], options: BundleRequestOptions) -> BundleLocation {
            let path = self.dir.path().join(format!("{}.bundle", name));
            std::fs::write(&path, bytes).unwrap();
            BundleLocation {
                bundle_name: name.to_string(),
                uris: vec![path.display().to_string()],
                provider_id: "test".to_string(),
                options: Some(options),
            }
        }
    }

    fn noop_progress(_: u64) {}

    /// Formatted log output captured on the current thread.
    #[derive(Clone, Default)]
    pub(crate) struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        /// Route this thread's events at DEBUG and above into the buffer
        /// until the guard drops.
        pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
            let logs = Self::default();
            let writer = logs.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::DEBUG)
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .finish();
            let guard = tracing::subscriber::set_default(subscriber);
            (logs, guard)
        }

        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        /// Captured lines containing `needle`.
        pub fn lines_with(&self, needle: &str) -> Vec<String> {
            self.contents()
                .lines()
                .filter(|line| line.contains(needle))
                .map(str::to_string)
                .collect()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn cube_payload() -> Vec<u8> {
        let mut bundle = AssetBundle::new("cube_bundle");
        bundle
            .insert("Cube", "GameObject", &json!({"name": "Cube"}))
            .unwrap();
        bundle.encode(CompressionMode::Uncompressed).unwrap()
    }
}
