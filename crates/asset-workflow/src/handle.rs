//! Typed asset results and the handles that keep their bundles loaded.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::AssetResult;
use crate::runtime::{LoadedAsset, OperationHandle};

/// A type that can be materialised from a catalog asset.
pub trait AssetType: Sized + Send + 'static {
    /// Catalog `type_name` this type loads from.
    const TYPE_NAME: &'static str;

    fn from_asset(asset: LoadedAsset) -> AssetResult<Self>;
}

/// Prefab-like asset: its key and raw bundle data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObject {
    pub name: String,
    pub data: serde_json::Value,
}

impl AssetType for GameObject {
    const TYPE_NAME: &'static str = "GameObject";

    fn from_asset(asset: LoadedAsset) -> AssetResult<Self> {
        Ok(Self {
            name: asset.key,
            data: asset.data,
        })
    }
}

/// How a scene joins the ones already loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadSceneMode {
    Single,
    #[default]
    Additive,
}

/// A loaded scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    pub mode: LoadSceneMode,
    pub data: serde_json::Value,
}

impl AssetType for Scene {
    const TYPE_NAME: &'static str = "Scene";

    fn from_asset(asset: LoadedAsset) -> AssetResult<Self> {
        Ok(Self {
            name: asset.key,
            mode: LoadSceneMode::Additive,
            data: asset.data,
        })
    }
}

/// Owns a loaded result and the runtime references behind it.
///
/// Dropping the value (or calling [`Disposable::release`]) releases the
/// bundle references exactly once.
pub struct Disposable<T> {
    result: T,
    handle: OperationHandle,
}

impl<T> Disposable<T> {
    pub(crate) fn new(result: T, handle: OperationHandle) -> Self {
        Self { result, handle }
    }

    pub fn result(&self) -> &T {
        &self.result
    }

    pub fn handle(&self) -> &OperationHandle {
        &self.handle
    }

    /// Release the bundle references now.
    pub fn release(self) {
        self.handle.release();
    }
}

impl<T> Deref for Disposable<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.result
    }
}

impl<T: fmt::Debug> fmt::Debug for Disposable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("result", &self.result)
            .field("handle", &self.handle)
            .finish()
    }
}
