use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::BundleLocation;
use crate::crypto::{AesCbcStreamFactory, CryptoStreamFactory};
use crate::error::AssetResult;

use super::{acquire, LoadedBundle, ProvideContext, ResourceProvider};

/// Provider for encrypted bundles.
///
/// Raw bytes are decrypted through the injected [`CryptoStreamFactory`] into
/// a private file under the decrypted directory, then loaded like a plain
/// bundle. The versioned cache holds the decrypted payload. Decrypt failures
/// propagate unchanged.
#[derive(Debug, Clone)]
pub struct CryptoAssetBundleProvider {
    id: String,
    factory: Arc<dyn CryptoStreamFactory>,
}

impl CryptoAssetBundleProvider {
    pub fn new(id: impl Into<String>, factory: Arc<dyn CryptoStreamFactory>) -> Self {
        Self {
            id: id.into(),
            factory,
        }
    }

    /// AES-CBC provider registered as `"aes-cbc"`.
    pub fn aes_cbc() -> Self {
        Self::new("aes-cbc", Arc::new(AesCbcStreamFactory::new()))
    }

    pub fn factory(&self) -> &Arc<dyn CryptoStreamFactory> {
        &self.factory
    }
}

#[async_trait]
impl ResourceProvider for CryptoAssetBundleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn provide(
        &self,
        location: &BundleLocation,
        ctx: &ProvideContext<'_>,
    ) -> AssetResult<LoadedBundle> {
        acquire(location, ctx, Some(self.factory.as_ref())).await
    }
}
