use async_trait::async_trait;

use crate::catalog::{BundleLocation, DEFAULT_PROVIDER_ID};
use crate::error::AssetResult;

use super::{acquire, LoadedBundle, ProvideContext, ResourceProvider};

/// Plain bundle provider: fetch, cache and decode without decryption.
#[derive(Debug, Clone)]
pub struct AssetBundleProvider {
    id: String,
}

impl AssetBundleProvider {
    pub fn new() -> Self {
        Self::with_id(DEFAULT_PROVIDER_ID)
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for AssetBundleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for AssetBundleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn provide(
        &self,
        location: &BundleLocation,
        ctx: &ProvideContext<'_>,
    ) -> AssetResult<LoadedBundle> {
        acquire(location, ctx, None).await
    }
}
