//! Error types for asset acquisition.
//!
//! Failures are plain data (strings and boxed causes) so a single failure can
//! be handed to every caller sharing an in-flight bundle fetch.

use crate::crypto::CryptoError;

/// Asset workflow errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetError {
    /// No catalog entry for the requested key.
    #[error("invalid key: Key={key}")]
    InvalidKey { key: String },

    /// Type-only lookup did not find exactly one catalog entry.
    #[error("no unique catalog entry of type {type_name}: {matches} matches")]
    NoUniqueTypeMatch { type_name: String, matches: usize },

    /// Catalog entry exists but holds a different asset type. Reported as an
    /// invalid key for the (key, type) pair.
    #[error("invalid key: Key={key}, Type={expected} (catalog entry is {actual})")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// An acquisition step failed; `cause` is the failure that stopped it.
    #[error("operation failed for {key}: {cause}")]
    Operation {
        key: String,
        #[source]
        cause: Box<AssetError>,
    },

    /// A bundle the asset depends on could not be acquired.
    #[error("Dependency Exception: {bundle}: {message}")]
    Dependency { bundle: String, message: String },

    /// Transient connectivity failure (transport, timeout, 408/429/5xx).
    #[error("network error: {message}")]
    Network { message: String },

    /// Decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A catalog bundle carries no request options.
    #[error("bundle {bundle} has no request options in the catalog")]
    MissingOptions { bundle: String },

    /// CRC check of a bundle payload failed.
    #[error("CRC mismatch for bundle {bundle}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        bundle: String,
        expected: u32,
        actual: u32,
    },

    /// Bundle payload could not be decoded.
    #[error("invalid bundle {bundle}: {message}")]
    InvalidBundle { bundle: String, message: String },

    /// Cache error (I/O, corrupt metadata, integrity).
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Catalog could not be loaded or parsed.
    #[error("catalog error: {message}")]
    Catalog { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A required argument was absent.
    #[error("argument must not be null: {argument}")]
    InvalidArgument { argument: String },

    /// The provider has been disposed.
    #[error("asset provider has been disposed")]
    Disposed,
}

impl AssetError {
    /// Wrap `cause` as the failure of the acquisition of `key`.
    pub fn operation(key: impl Into<String>, cause: AssetError) -> Self {
        Self::Operation {
            key: key.into(),
            cause: Box::new(cause),
        }
    }

    /// Unwrap one level of `Operation`; any other error is its own root.
    pub fn root_cause(&self) -> &AssetError {
        match self {
            Self::Operation { cause, .. } => cause,
            other => other,
        }
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether the error means "nothing in the catalog answers this request".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::InvalidKey { .. } | Self::NoUniqueTypeMatch { .. } | Self::TypeMismatch { .. }
        )
    }
}

impl From<reqwest::Error> for AssetError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for asset operations.
pub type AssetResult<T> = Result<T, AssetError>;
