//! Addressable asset delivery: download, decrypt, cache and load asset bundles.
//!
//! This crate provides:
//!
//! - A catalog mapping asset keys to bundles, URIs and request options
//! - HTTP and file fetch of raw bundle bytes with token auth
//! - Pluggable bundle ciphers (AES-128-CBC with a random IV header)
//! - A versioned on-disk cache keyed by bundle name and content hash
//! - A runtime with shared in-flight loads and reference counting
//! - An asset provider with connect retries and download progress events
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use asset_workflow::{
//!     Addressables, AssetProvider, Catalog, CryptoAssetBundleProvider, GameObject, WorkflowConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let catalog = Catalog::load("catalog.json").await?;
//! let runtime = Addressables::new(WorkflowConfig::from_env(), catalog)?;
//! runtime.register_provider(Arc::new(CryptoAssetBundleProvider::aes_cbc()));
//!
//! let provider = AssetProvider::from_runtime(runtime);
//! let _progress = provider
//!     .on_downloaded()
//!     .subscribe(|s| println!("{}: {:.0}%", s.asset_name, s.status.percent() * 100.0));
//!
//! if provider.get_download_size("Cube").await? > 0 {
//!     provider.download("Cube", None).await?;
//! }
//! let cube = provider.load_asset::<GameObject>(Some("Cube")).await?;
//! println!("loaded {}", cube.name);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `ASSET_WORKFLOW_CACHE_DIR` | Bundle cache directory (default: platform cache dir) |
//! | `ASSET_WORKFLOW_TEMP_DIR` | Scratch directory for decrypted bundles |
//! | `ASSET_WORKFLOW_TOKEN` | Bearer token for the content host |
//! | `ASSET_WORKFLOW_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `ASSET_WORKFLOW_MAX_RETRIES` | Connect retries (default: 3) |
//! | `ASSET_WORKFLOW_MAX_CACHE_BYTES` | Cache size limit, 0 = unlimited |
//! | `ASSET_WORKFLOW_TICK_MS` | Download progress tick (default: 16) |

pub mod asset_provider;
pub mod auth;
pub mod bundle;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod crypto;
mod digest;
pub mod error;
pub mod events;
pub mod fetch;
pub mod handle;
pub mod provider;
pub mod retry;
pub mod runtime;
pub mod types;

// Re-export main types
pub use asset_provider::{AssetProvider, DownloadPhase};
pub use auth::TokenProvider;
pub use bundle::{AssetBundle, BundledAsset};
pub use cache::{BundleCache, CacheEntry, CacheMeta};
pub use catalog::{BundleLocation, Catalog, CatalogUpdate, ResourceLocation};
pub use config::WorkflowConfig;
pub use crypto::{AesCbcStreamFactory, CryptoError, CryptoStreamFactory};
pub use error::{AssetError, AssetResult};
pub use events::{Subject, Subscription};
pub use fetch::BundleFetcher;
pub use handle::{AssetType, Disposable, GameObject, LoadSceneMode, Scene};
pub use provider::{AssetBundleProvider, CryptoAssetBundleProvider, ResourceProvider};
pub use retry::{CountingRetryStrategy, NoRetryStrategy, RetryHandler, RetryOutcome, RetryStrategy};
pub use runtime::{Addressables, DownloadOperation, LoadedAsset, OperationHandle};
pub use types::{
    AssetDownloadStatus, BundleRequestOptions, CachedBundle, CompressionMode, CrcPolicy,
    DownloadStatus,
};
