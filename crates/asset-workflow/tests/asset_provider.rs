//! Integration tests for AssetProvider over a mocked content host.
//!
//! Covers download size, download progress, cache reuse, connect retries,
//! catalog updates with both cache policies, and key/type resolution.

use std::sync::{Arc, Mutex};

use asset_workflow::{
    Addressables, AssetBundle, AssetDownloadStatus, AssetError, AssetProvider, BundleRequestOptions,
    Catalog, CompressionMode, CountingRetryStrategy, GameObject, RetryOutcome, WorkflowConfig,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cube_payload() -> Vec<u8> {
    let mut bundle = AssetBundle::new("cube_bundle");
    bundle
        .insert("Cube", "GameObject", &json!({"name": "Cube", "mesh": "cube"}))
        .unwrap();
    bundle
        .insert("Sphere", "Mesh", &json!({"radius": 0.5}))
        .unwrap();
    bundle.encode(CompressionMode::Uncompressed).unwrap()
}

fn catalog(server: &MockServer, hash: &str, options: BundleRequestOptions) -> Catalog {
    let value = json!({
        "version": hash,
        "bundles": {
            "cube_bundle": {
                "uris": [format!("{}/bundles/{}/cube_bundle", server.uri(), hash)],
                "options": options,
            }
        },
        "assets": {
            "Cube": { "type_name": "GameObject", "bundle": "cube_bundle" },
            "Sphere": { "type_name": "Mesh", "bundle": "cube_bundle" }
        }
    });
    Catalog::from_json(&value.to_string()).unwrap()
}

fn options(hash: &str) -> BundleRequestOptions {
    BundleRequestOptions::new("cube_bundle", hash).with_bundle_size(cube_payload().len() as u64)
}

async fn mount_bundle(server: &MockServer, hash: &str) {
    let route = format!("/bundles/{}/cube_bundle", hash);
    Mock::given(method("HEAD"))
        .and(path(route.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(cube_payload()))
        .mount(server)
        .await;
}

fn config(dir: &TempDir) -> WorkflowConfig {
    WorkflowConfig::default()
        .with_cache_dir(dir.path().join("cache"))
        .with_temp_dir(dir.path().join("tmp"))
}

fn provider(dir: &TempDir, catalog: Catalog, max_retries: u32) -> AssetProvider {
    let runtime = Addressables::new(config(dir), catalog).expect("failed to create runtime");
    AssetProvider::new(runtime, Arc::new(CountingRetryStrategy::new(max_retries)))
}

type Recorded<T> = Arc<Mutex<Vec<T>>>;

fn record_retries(provider: &AssetProvider) -> (Recorded<u32>, Recorded<RetryOutcome>, Vec<asset_workflow::Subscription>) {
    let retrying = Arc::new(Mutex::new(Vec::new()));
    let retried = Arc::new(Mutex::new(Vec::new()));
    let subs = vec![
        {
            let retrying = retrying.clone();
            provider
                .on_connect_retrying()
                .subscribe(move |n| retrying.lock().unwrap().push(*n))
        },
        {
            let retried = retried.clone();
            provider
                .on_connect_retried()
                .subscribe(move |o| retried.lock().unwrap().push(*o))
        },
    ];
    (retrying, retried, subs)
}

#[tokio::test]
async fn test_download_size_then_cached() {
    let server = MockServer::start().await;
    mount_bundle(&server, "h1").await;
    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);

    let size = provider.get_download_size("Cube").await.unwrap();
    assert_eq!(size, cube_payload().len() as u64);

    provider.download("Cube", None).await.unwrap();

    assert_eq!(provider.get_download_size("Cube").await.unwrap(), 0);
    assert!(provider.runtime().is_version_cached("cube_bundle", "h1").await);
}

#[tokio::test]
async fn test_download_statuses_are_monotonic_and_terminal() {
    let server = MockServer::start().await;
    mount_bundle(&server, "h1").await;
    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);

    let statuses: Recorded<AssetDownloadStatus> = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let statuses = statuses.clone();
        provider
            .on_downloaded()
            .subscribe(move |s| statuses.lock().unwrap().push(s.clone()))
    };

    let returned = provider
        .download("Cube", Some(std::time::Duration::from_millis(1)))
        .await
        .unwrap();

    let statuses = statuses.lock().unwrap();
    let last = statuses.last().expect("expected a terminal status");
    assert_eq!(last.status, returned);
    assert!(last.status.is_done);
    assert_eq!(last.status.percent(), 1.0);
    assert_eq!(last.status.downloaded_bytes, last.status.total_bytes);
    assert_eq!(last.status.total_bytes, cube_payload().len() as u64);

    let percents: Vec<f32> = statuses.iter().map(|s| s.status.percent()).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(statuses.iter().filter(|s| s.status.is_done).count(), 1);
}

#[tokio::test]
async fn test_download_size_counts_uncached_remote_bundle() {
    let server = MockServer::start().await;
    mount_bundle(&server, "h1").await;
    let dir = TempDir::new().unwrap();
    let opts = options("h1").with_asset_bundle_cache(false);
    let provider = provider(&dir, catalog(&server, "h1", opts), 3);

    let expected = cube_payload().len() as u64;
    assert_eq!(provider.get_download_size("Cube").await.unwrap(), expected);

    let statuses: Recorded<AssetDownloadStatus> = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let statuses = statuses.clone();
        provider
            .on_downloaded()
            .subscribe(move |s| statuses.lock().unwrap().push(s.clone()))
    };
    let status = provider.download("Cube", None).await.unwrap();
    assert_eq!(status.total_bytes, expected);
    assert_eq!(status.downloaded_bytes, expected);
    assert!(statuses
        .lock()
        .unwrap()
        .iter()
        .all(|s| s.status.total_bytes == expected));

    // Never committed, so it still counts.
    assert!(!provider.runtime().is_version_cached("cube_bundle", "h1").await);
    assert_eq!(provider.get_download_size("Cube").await.unwrap(), expected);
}

#[tokio::test]
async fn test_cached_bundle_is_not_refetched() {
    let server = MockServer::start().await;
    let route = "/bundles/h1/cube_bundle";
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(cube_payload()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);

    let first = provider.load_asset::<GameObject>(Some("Cube")).await.unwrap();
    assert_eq!(first.data["mesh"], "cube");
    first.release();
    assert_eq!(provider.runtime().loaded_bundle_count(), 0);

    let second = provider.load_asset::<GameObject>(Some("Cube")).await.unwrap();
    assert_eq!(second.name, "Cube");
    assert!(provider.runtime().is_version_cached("cube_bundle", "h1").await);
}

#[tokio::test]
async fn test_connect_retries_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/bundles/h1/cube_bundle"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_bundle(&server, "h1").await;

    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);
    let (retrying, retried, _subs) = record_retries(&provider);

    let status = provider.download("Cube", None).await.unwrap();
    assert!(status.is_done);
    assert_eq!(*retrying.lock().unwrap(), vec![1, 2]);
    assert_eq!(*retried.lock().unwrap(), vec![RetryOutcome::Success]);
}

#[tokio::test]
async fn test_connect_exhaustion_returns_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/bundles/h1/cube_bundle"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 2);
    let (retrying, retried, _subs) = record_retries(&provider);
    let downloaded = Arc::new(Mutex::new(0usize));
    let _d = {
        let downloaded = downloaded.clone();
        provider
            .on_downloaded()
            .subscribe(move |_| *downloaded.lock().unwrap() += 1)
    };

    let err = provider.download("Cube", None).await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err}");
    assert_eq!(*retrying.lock().unwrap(), vec![1, 2]);
    assert_eq!(*retried.lock().unwrap(), vec![RetryOutcome::Failure]);
    assert_eq!(*downloaded.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_connect_404_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/bundles/h1/cube_bundle"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);
    let (retrying, retried, _subs) = record_retries(&provider);

    let err = provider.download("Cube", None).await.unwrap_err();
    assert!(matches!(err, AssetError::Dependency { .. }));
    assert!(retrying.lock().unwrap().is_empty());
    assert!(retried.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_is_wrapped_dependency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bundles/h1/cube_bundle"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);

    let err = provider
        .load_asset::<GameObject>(Some("Cube"))
        .await
        .unwrap_err();
    assert!(matches!(err, AssetError::Operation { .. }));
    assert!(err.root_cause().to_string().contains("Dependency Exception"));
}

#[tokio::test]
async fn test_catalog_update_keeps_old_version_by_default() {
    let server = MockServer::start().await;
    mount_bundle(&server, "h1").await;
    mount_bundle(&server, "h2").await;
    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);

    provider.load_asset::<GameObject>(Some("Cube")).await.unwrap();

    let update = provider
        .runtime()
        .update_catalog(catalog(&server, "h2", options("h2")))
        .unwrap();
    assert_eq!(update.changed.len(), 1);
    let change = &update.changed[0];
    assert_ne!(change.previous, change.current);

    assert_eq!(
        provider.get_download_size("Cube").await.unwrap(),
        cube_payload().len() as u64
    );
    provider.load_asset::<GameObject>(Some("Cube")).await.unwrap();

    let runtime = provider.runtime();
    assert!(runtime.is_version_cached("cube_bundle", "h1").await);
    assert!(runtime.is_version_cached("cube_bundle", "h2").await);
}

#[tokio::test]
async fn test_catalog_update_clears_old_version_when_loaded() {
    let server = MockServer::start().await;
    mount_bundle(&server, "h1").await;
    mount_bundle(&server, "h2").await;
    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);

    provider.load_asset::<GameObject>(Some("Cube")).await.unwrap();
    provider
        .runtime()
        .update_catalog(catalog(
            &server,
            "h2",
            options("h2").with_clear_other_versions(true),
        ))
        .unwrap();

    // Superseded but still cached until the new version loads.
    assert!(provider.runtime().is_version_cached("cube_bundle", "h1").await);
    provider.load_asset::<GameObject>(Some("Cube")).await.unwrap();

    assert!(!provider.runtime().is_version_cached("cube_bundle", "h1").await);
    assert!(provider.runtime().is_version_cached("cube_bundle", "h2").await);
}

#[tokio::test]
async fn test_cache_limit_evicts_least_recently_used() {
    let server = MockServer::start().await;
    mount_bundle(&server, "h1").await;
    mount_bundle(&server, "h2").await;
    let dir = TempDir::new().unwrap();
    let limit = cube_payload().len() as u64 * 3 / 2;
    let runtime = Addressables::new(
        config(&dir).with_max_cache_bytes(limit),
        catalog(&server, "h1", options("h1")),
    )
    .unwrap();
    let provider = AssetProvider::from_runtime(runtime);

    provider.download("Cube", None).await.unwrap();
    provider
        .runtime()
        .update_catalog(catalog(&server, "h2", options("h2")))
        .unwrap();
    provider.download("Cube", None).await.unwrap();

    assert!(!provider.runtime().is_version_cached("cube_bundle", "h1").await);
    assert!(provider.runtime().is_version_cached("cube_bundle", "h2").await);
}

#[tokio::test]
async fn test_invalid_key_everywhere() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);

    let err = provider.load_asset::<GameObject>(Some("NotExisted")).await.unwrap_err();
    assert!(err.root_cause().to_string().contains("Key=NotExisted"));

    let err = provider.load_scene("NotExisted").await.unwrap_err();
    assert!(err.root_cause().to_string().contains("Key=NotExisted"));

    // A key holding another type fails the same way.
    let err = provider.load_scene("Cube").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.root_cause().to_string().contains("Key=Cube"));

    let err = provider.download("NotExisted", None).await.unwrap_err();
    assert!(err.is_not_found());

    let err = provider.get_download_size("NotExisted").await.unwrap_err();
    assert!(matches!(err, AssetError::InvalidKey { .. }));
}

#[tokio::test]
async fn test_load_by_type_requires_unique_match() {
    let server = MockServer::start().await;
    mount_bundle(&server, "h1").await;
    let dir = TempDir::new().unwrap();
    let provider = provider(&dir, catalog(&server, "h1", options("h1")), 3);

    let cube = provider.load_asset::<GameObject>(None).await.unwrap();
    assert_eq!(cube.name, "Cube");

    let mut ambiguous = catalog(&server, "h1", options("h1"));
    let mut twin = ambiguous.assets["Cube"].clone();
    twin.bundle = "cube_bundle".to_string();
    ambiguous.assets.insert("CubeTwin".to_string(), twin);
    provider.runtime().update_catalog(ambiguous).unwrap();

    let err = provider.load_asset::<GameObject>(None).await.unwrap_err();
    assert!(matches!(
        err,
        AssetError::NoUniqueTypeMatch { matches: 2, .. }
    ));
    assert!(err.is_not_found());
}
