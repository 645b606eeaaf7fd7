//! Raw bundle byte acquisition from HTTP(S) hosts and the local filesystem.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.

use std::path::Path;

use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::catalog::BundleLocation;
use crate::config::WorkflowConfig;
use crate::error::{AssetError, AssetResult};

mod helpers;
mod http;

use helpers::{display_uri, local_path};
use http::HttpBackend;

/// Progress sink: bytes of the current bundle received so far.
pub type Progress = dyn Fn(u64) + Send + Sync;

/// Fetches raw (possibly encrypted) bundle bytes.
#[derive(Debug, Clone)]
pub struct BundleFetcher {
    http: HttpBackend,
}

impl BundleFetcher {
    pub fn new(config: &WorkflowConfig) -> AssetResult<Self> {
        Self::with_token_provider(config, TokenProvider::from_config(config.token.as_deref()))
    }

    pub fn with_token_provider(
        config: &WorkflowConfig,
        token_provider: TokenProvider,
    ) -> AssetResult<Self> {
        Ok(Self {
            http: HttpBackend::new(config.timeout(), token_provider)?,
        })
    }

    /// Fetch the bundle, trying each URI in order. The last failure is
    /// returned when every source fails.
    pub async fn fetch(&self, location: &BundleLocation, progress: &Progress) -> AssetResult<Vec<u8>> {
        let options = location.options.as_ref();
        let mut last_err = None;

        for uri in &location.uris {
            debug!(bundle = %location.bundle_name, uri = %display_uri(uri), "fetching bundle");
            let result = match local_path(uri) {
                Some(path) => read_local(&path, &location.bundle_name, progress).await,
                None => {
                    self.http
                        .get(uri, &location.bundle_name, options, progress)
                        .await
                }
            };
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!(
                        bundle = %location.bundle_name,
                        uri = %display_uri(uri),
                        error = %e,
                        "bundle source failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| no_sources(location)))
    }

    /// Check that the bundle is reachable without downloading it.
    ///
    /// Returns the advertised size when the source reports one.
    pub async fn probe(&self, location: &BundleLocation) -> AssetResult<Option<u64>> {
        let options = location.options.as_ref();
        let mut last_err = None;

        for uri in &location.uris {
            let result = match local_path(uri) {
                Some(path) => tokio::fs::metadata(&path)
                    .await
                    .map(|meta| Some(meta.len()))
                    .map_err(|e| local_error(&location.bundle_name, &path, e)),
                None => self.http.head(uri, &location.bundle_name, options).await,
            };
            match result {
                Ok(size) => return Ok(size),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| no_sources(location)))
    }
}

fn no_sources(location: &BundleLocation) -> AssetError {
    AssetError::Catalog {
        message: format!("bundle {} has no uris", location.bundle_name),
    }
}

async fn read_local(path: &Path, bundle: &str, progress: &Progress) -> AssetResult<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| local_error(bundle, path, e))?;
    progress(bytes.len() as u64);
    Ok(bytes)
}

fn local_error(bundle: &str, path: &Path, err: std::io::Error) -> AssetError {
    AssetError::Dependency {
        bundle: bundle.to_string(),
        message: format!("failed to read {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::types::BundleRequestOptions;

    fn location(uris: Vec<String>) -> BundleLocation {
        BundleLocation {
            bundle_name: "cube_bundle".to_string(),
            uris,
            provider_id: "bundle".to_string(),
            options: Some(BundleRequestOptions::new("cube_bundle", "h1")),
        }
    }

    fn fetcher() -> BundleFetcher {
        BundleFetcher::with_token_provider(&WorkflowConfig::default(), TokenProvider::None).unwrap()
    }

    fn noop(_: u64) {}

    #[tokio::test]
    async fn test_fetch_http_reports_progress() {
        let server = MockServer::start().await;
        let body = vec![42u8; 64 * 1024];
        Mock::given(method("GET"))
            .and(path("/bundles/cube_bundle"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let seen = Arc::new(AtomicU64::new(0));
        let sink = {
            let seen = seen.clone();
            move |n: u64| {
                seen.fetch_max(n, Ordering::SeqCst);
            }
        };
        let bytes = fetcher()
            .fetch(
                &location(vec![format!("{}/bundles/cube_bundle", server.uri())]),
                &sink,
            )
            .await
            .unwrap();

        assert_eq!(bytes, body);
        assert_eq!(seen.load(Ordering::SeqCst), body.len() as u64);
    }

    #[tokio::test]
    async fn test_fetch_404_is_dependency_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch(&location(vec![format!("{}/missing", server.uri())]), &noop)
            .await
            .unwrap_err();

        assert!(matches!(err, AssetError::Dependency { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_fetch_503_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch(&location(vec![format!("{}/busy", server.uri())]), &noop)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = BundleFetcher::with_token_provider(
            &WorkflowConfig::default(),
            TokenProvider::static_token("secret-token"),
        )
        .unwrap();
        let bytes = fetcher
            .fetch(&location(vec![format!("{}/cube", server.uri())]), &noop)
            .await
            .unwrap();
        assert_eq!(bytes, b"ok");
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_next_uri() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/primary"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mirror"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mirror".to_vec()))
            .mount(&server)
            .await;

        let bytes = fetcher()
            .fetch(
                &location(vec![
                    format!("{}/primary", server.uri()),
                    format!("{}/mirror", server.uri()),
                ]),
                &noop,
            )
            .await
            .unwrap();
        assert_eq!(bytes, b"mirror");
    }

    #[tokio::test]
    async fn test_redirect_limit_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", format!("{}/loop", server.uri())),
            )
            .mount(&server)
            .await;

        let mut loc = location(vec![format!("{}/loop", server.uri())]);
        loc.options = loc.options.map(|o| o.with_redirect_limit(2));

        let err = fetcher().fetch(&loc, &noop).await.unwrap_err();
        assert!(matches!(err, AssetError::Dependency { .. }));
        assert!(err.to_string().contains("redirect"));
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("cube_bundle");
        tokio::fs::write(&file, b"local bytes").await.unwrap();

        let bytes = fetcher()
            .fetch(&location(vec![file.display().to_string()]), &noop)
            .await
            .unwrap();
        assert_eq!(bytes, b"local bytes");

        let size = fetcher()
            .probe(&location(vec![file.display().to_string()]))
            .await
            .unwrap();
        assert_eq!(size, Some(11));
    }

    #[tokio::test]
    async fn test_fetch_missing_local_file() {
        let err = fetcher()
            .fetch(&location(vec!["/no/such/bundle".to_string()]), &noop)
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::Dependency { .. }));
    }

    #[tokio::test]
    async fn test_probe_uses_head() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/cube"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        assert!(fetcher()
            .probe(&location(vec![format!("{}/cube", server.uri())]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_no_uris() {
        let err = fetcher().fetch(&location(vec![]), &noop).await.unwrap_err();
        assert!(matches!(err, AssetError::Catalog { .. }));
    }
}
