//! HTTP layer: client construction, redirect policy, status mapping.
//!
//! This is the ONLY place for status code handling. fetch/mod.rs never
//! interprets status codes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use tracing::debug;

use crate::auth::TokenProvider;
use crate::error::{AssetError, AssetResult};
use crate::types::BundleRequestOptions;

use super::helpers::display_uri;
use super::Progress;

const USER_AGENT_VALUE: &str = concat!("asset-workflow/", env!("CARGO_PKG_VERSION"));

/// HTTP backend (holds reqwest clients and auth).
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    client: reqwest::Client,
    /// Clients with an explicit redirect limit, built on first use.
    limited: Arc<Mutex<HashMap<u32, reqwest::Client>>>,
    token_provider: TokenProvider,
    timeout: Duration,
}

fn build_client(timeout: Duration, redirect_limit: Option<u32>) -> AssetResult<reqwest::Client> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(default_headers);
    if let Some(limit) = redirect_limit {
        builder = builder.redirect(reqwest::redirect::Policy::limited(limit as usize));
    }

    builder.build().map_err(|e| AssetError::Config {
        message: format!("failed to create HTTP client: {}", e),
    })
}

impl HttpBackend {
    pub(crate) fn new(timeout: Duration, token_provider: TokenProvider) -> AssetResult<Self> {
        Ok(Self {
            client: build_client(timeout, None)?,
            limited: Arc::new(Mutex::new(HashMap::new())),
            token_provider,
            timeout,
        })
    }

    fn client_for(&self, redirect_limit: Option<u32>) -> AssetResult<reqwest::Client> {
        let Some(limit) = redirect_limit else {
            return Ok(self.client.clone());
        };
        let mut clients = self.limited.lock().map_err(|_| AssetError::Config {
            message: "HTTP client pool lock poisoned".to_string(),
        })?;
        if let Some(client) = clients.get(&limit) {
            return Ok(client.clone());
        }
        let client = build_client(self.timeout, Some(limit))?;
        clients.insert(limit, client.clone());
        Ok(client)
    }

    /// GET the whole body, reporting bytes received so far.
    pub(crate) async fn get(
        &self,
        url: &str,
        bundle: &str,
        options: Option<&BundleRequestOptions>,
        progress: &Progress,
    ) -> AssetResult<Vec<u8>> {
        let response = self
            .request_once(reqwest::Method::GET, url, bundle, options)
            .await?;

        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AssetError::Network {
                message: format!("failed to read response body: {}", e),
            })?;
            body.extend_from_slice(&chunk);
            progress(body.len() as u64);
        }

        debug!(url = %display_uri(url), bytes = body.len(), "fetched bundle");
        Ok(body)
    }

    /// HEAD probe; returns the advertised content length.
    pub(crate) async fn head(
        &self,
        url: &str,
        bundle: &str,
        options: Option<&BundleRequestOptions>,
    ) -> AssetResult<Option<u64>> {
        let response = self
            .request_once(reqwest::Method::HEAD, url, bundle, options)
            .await?;
        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()))
    }

    async fn request_once(
        &self,
        method: reqwest::Method,
        url: &str,
        bundle: &str,
        options: Option<&BundleRequestOptions>,
    ) -> AssetResult<reqwest::Response> {
        let client = self.client_for(options.and_then(BundleRequestOptions::redirect_limit))?;
        let mut request = client.request(method, url);

        if let Some(timeout) = options.and_then(BundleRequestOptions::timeout) {
            request = request.timeout(timeout);
        }

        if let Some(token) = self.token_provider.token() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(bundle, url, e))?;
        let status = response.status();

        match status.as_u16() {
            200..=299 => Ok(response),

            408 | 429 | 500..=599 => Err(AssetError::Network {
                message: format!("HTTP {} fetching {}", status.as_u16(), display_uri(url)),
            }),

            _ => Err(AssetError::Dependency {
                bundle: bundle.to_string(),
                message: format!("HTTP {} fetching {}", status, display_uri(url)),
            }),
        }
    }
}

/// Too many redirects is a configuration problem, not a transient one.
fn map_transport_error(bundle: &str, url: &str, err: reqwest::Error) -> AssetError {
    if err.is_redirect() {
        return AssetError::Dependency {
            bundle: bundle.to_string(),
            message: format!("redirect limit exceeded fetching {}", display_uri(url)),
        };
    }
    AssetError::from(err)
}
