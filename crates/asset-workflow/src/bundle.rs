//! Asset bundle container.
//!
//! # Wire format
//!
//! ```text
//! "AWB1"  magic (4 bytes)
//! u8      compression (0 = uncompressed, 1 = lz4 size-prepended block)
//! ...     body: JSON `{ "assets": { key: { "type_name": .., "data": .. } } }`
//! ```
//!
//! The CRC in the request options is computed over this whole payload, after
//! decryption and before decompression.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AssetError, AssetResult};
use crate::types::CompressionMode;

const MAGIC: &[u8; 4] = b"AWB1";
const HEADER_LEN: usize = MAGIC.len() + 1;

/// One asset stored in a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundledAsset {
    pub type_name: String,
    pub data: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct Body {
    assets: BTreeMap<String, BundledAsset>,
}

/// A decoded, in-memory bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetBundle {
    name: String,
    assets: BTreeMap<String, BundledAsset>,
}

impl AssetBundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assets: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `value` under `key`.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        type_name: impl Into<String>,
        value: &T,
    ) -> AssetResult<()> {
        let data = serde_json::to_value(value).map_err(|e| AssetError::InvalidBundle {
            bundle: self.name.clone(),
            message: format!("failed to serialize asset: {}", e),
        })?;
        self.assets.insert(
            key.into(),
            BundledAsset {
                type_name: type_name.into(),
                data,
            },
        );
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&BundledAsset> {
        self.assets.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Serialize to the stored payload format.
    pub fn encode(&self, compression: CompressionMode) -> AssetResult<Vec<u8>> {
        let body = serde_json::to_vec(&BodyRef {
            assets: &self.assets,
        })
        .map_err(|e| self.invalid(format!("failed to serialize bundle: {}", e)))?;

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        match compression {
            CompressionMode::Uncompressed => {
                out.push(0);
                out.extend_from_slice(&body);
            }
            CompressionMode::Lz4 => {
                out.push(1);
                out.extend_from_slice(&lz4_flex::block::compress_prepend_size(&body));
            }
        }
        Ok(out)
    }

    /// Parse a stored payload.
    pub fn decode(name: impl Into<String>, bytes: &[u8]) -> AssetResult<Self> {
        let name = name.into();
        let invalid = |message: String| AssetError::InvalidBundle {
            bundle: name.clone(),
            message,
        };

        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(invalid("not an asset bundle (bad magic)".to_string()));
        }
        let payload = &bytes[HEADER_LEN..];
        let body: Body = match bytes[MAGIC.len()] {
            0 => serde_json::from_slice(payload),
            1 => {
                let raw = lz4_flex::block::decompress_size_prepended(payload)
                    .map_err(|e| invalid(format!("lz4 decompression failed: {}", e)))?;
                serde_json::from_slice(&raw)
            }
            other => return Err(invalid(format!("unknown compression tag {}", other))),
        }
        .map_err(|e| invalid(format!("malformed bundle body: {}", e)))?;

        Ok(Self {
            name,
            assets: body.assets,
        })
    }

    fn invalid(&self, message: String) -> AssetError {
        AssetError::InvalidBundle {
            bundle: self.name.clone(),
            message,
        }
    }
}

#[derive(Serialize)]
struct BodyRef<'a> {
    assets: &'a BTreeMap<String, BundledAsset>,
}

/// CRC32 of a stored payload.
pub fn payload_crc(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Fail with `CrcMismatch` unless `bytes` hash to `expected`.
pub fn verify_crc(bundle: &str, bytes: &[u8], expected: u32) -> AssetResult<()> {
    let actual = payload_crc(bytes);
    if actual != expected {
        return Err(AssetError::CrcMismatch {
            bundle: bundle.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
