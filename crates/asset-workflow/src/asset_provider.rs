//! Asset provider: the public entry point for sizing, downloading and
//! loading assets.
//!
//! # Download
//!
//! ```text
//! Idle -> Connecting (retrying 0..N) -> Connected -> Downloading (ticks) -> Completed
//!                  \-> ConnectFailed
//! ```
//!
//! Only the connect step (probing the bundles that still need fetching) runs
//! under the retry strategy. Every other failure propagates unchanged.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{AssetError, AssetResult};
use crate::events::Subject;
use crate::handle::{AssetType, Disposable, Scene};
use crate::retry::{CountingRetryStrategy, RetryHandler, RetryOutcome, RetryStrategy};
use crate::runtime::Addressables;
use crate::types::{AssetDownloadStatus, DownloadStatus};

/// Phase of one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Idle,
    Connecting,
    Connected,
    Downloading,
    Completed,
    ConnectFailed,
}

impl fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::ConnectFailed => "connect_failed",
        };
        f.write_str(name)
    }
}

fn enter(asset: &str, phase: DownloadPhase) {
    debug!(asset, %phase, "download phase");
}

/// Public asset API over an [`Addressables`] runtime.
pub struct AssetProvider {
    runtime: Addressables,
    retry: RetryHandler,
    on_downloading: Subject<String>,
    on_downloaded: Subject<AssetDownloadStatus>,
    disposed: AtomicBool,
}

impl AssetProvider {
    /// Provider retrying the connect step with `strategy`.
    pub fn new(runtime: Addressables, strategy: Arc<dyn RetryStrategy>) -> Self {
        Self {
            runtime,
            retry: RetryHandler::new(strategy),
            on_downloading: Subject::new(),
            on_downloaded: Subject::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Provider retrying up to the runtime's configured `max_retries`.
    pub fn from_runtime(runtime: Addressables) -> Self {
        let strategy = CountingRetryStrategy::new(runtime.config().max_retries);
        Self::new(runtime, Arc::new(strategy))
    }

    pub fn runtime(&self) -> &Addressables {
        &self.runtime
    }

    /// Asset name, at the start of each download.
    pub fn on_downloading(&self) -> &Subject<String> {
        &self.on_downloading
    }

    /// Progress ticks and the terminal status of each download.
    pub fn on_downloaded(&self) -> &Subject<AssetDownloadStatus> {
        &self.on_downloaded
    }

    /// Retry number, before each connect retry.
    pub fn on_connect_retrying(&self) -> &Subject<u32> {
        self.retry.on_retrying()
    }

    /// Outcome of a connect step that needed retries.
    pub fn on_connect_retried(&self) -> &Subject<RetryOutcome> {
        self.retry.on_retried()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> AssetResult<()> {
        if self.is_disposed() {
            return Err(AssetError::Disposed);
        }
        Ok(())
    }

    /// Bytes still to download for `name`; 0 when fully cached.
    pub async fn get_download_size(&self, name: &str) -> AssetResult<u64> {
        self.ensure_live()?;
        self.runtime.get_download_size(name).await
    }

    /// Download every bundle `name` needs into the cache.
    ///
    /// Publishes one status per `interval` (default: the configured tick)
    /// and a terminal status, which is also returned.
    pub async fn download(&self, name: &str, interval: Option<Duration>) -> AssetResult<DownloadStatus> {
        self.ensure_live()?;
        enter(name, DownloadPhase::Idle);
        self.on_downloading.publish(&name.to_string());

        enter(name, DownloadPhase::Connecting);
        let probed = match self.retry.run(|| self.runtime.probe(name)).await {
            Ok(probed) => probed,
            Err(e) => {
                enter(name, DownloadPhase::ConnectFailed);
                return Err(e);
            }
        };
        enter(name, DownloadPhase::Connected);
        debug!(asset = name, bundles = probed, "connected");

        let mut op = self.runtime.download_dependencies(name).await?;
        let progress = op.progress();
        let interval = interval
            .unwrap_or_else(|| self.runtime.config().tick_interval())
            .max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        enter(name, DownloadPhase::Downloading);
        let status = loop {
            tokio::select! {
                biased;
                result = &mut op => break result?,
                _ = ticker.tick() => self.publish_status(name, progress.status()),
            }
        };

        self.publish_status(name, status);
        enter(name, DownloadPhase::Completed);
        info!(asset = name, bytes = status.total_bytes, "download complete");
        Ok(status)
    }

    /// [`download`](Self::download), then run `next`; its failure is the
    /// download's failure.
    pub async fn download_then<F, Fut>(
        &self,
        name: &str,
        interval: Option<Duration>,
        next: F,
    ) -> AssetResult<DownloadStatus>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AssetResult<()>>,
    {
        let status = self.download(name, interval).await?;
        next().await?;
        Ok(status)
    }

    fn publish_status(&self, name: &str, status: DownloadStatus) {
        self.on_downloaded.publish(&AssetDownloadStatus {
            asset_name: name.to_string(),
            status,
        });
    }

    /// Load an asset of type `T`.
    ///
    /// Without a name, the catalog must hold exactly one asset of
    /// `T::TYPE_NAME`.
    pub async fn load_asset<T: AssetType>(&self, name: Option<&str>) -> AssetResult<Disposable<T>> {
        self.ensure_live()?;
        let location = match name {
            Some(key) => self
                .runtime
                .resolve_location(key)
                .ok_or_else(|| AssetError::InvalidKey {
                    key: key.to_string(),
                })?,
            None => self.runtime.resolve_by_type(T::TYPE_NAME)?,
        };
        if location.type_name != T::TYPE_NAME {
            return Err(AssetError::TypeMismatch {
                key: location.key,
                expected: T::TYPE_NAME.to_string(),
                actual: location.type_name,
            });
        }

        let (asset, handle) = self.runtime.load_location(&location).await?;
        let result = T::from_asset(asset).map_err(|e| AssetError::operation(&location.key, e))?;
        Ok(Disposable::new(result, handle))
    }

    /// Load a scene additively.
    pub async fn load_scene(&self, name: &str) -> AssetResult<Disposable<Scene>> {
        self.load_asset::<Scene>(Some(name)).await
    }

    /// Detach every observer and dispose the retry handler.
    ///
    /// Operations already running finish normally; new calls fail with
    /// [`AssetError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.on_downloading.close();
        self.on_downloaded.close();
        self.retry.dispose();
        debug!("asset provider disposed");
    }
}

impl Drop for AssetProvider {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for AssetProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetProvider")
            .field("runtime", &self.runtime)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
