//! Cipher stream factories for encrypted asset bundles.
//!
//! A factory turns a raw byte stream plus the bundle's request options into an
//! encrypting writer or a decrypting reader. Keys are derived from a shared
//! password with the bundle name as salt, so no per-bundle key distribution
//! is needed.

use std::fmt;
use std::io::{self, Read, Write};

use crate::types::BundleRequestOptions;

mod aes_cbc;
#[cfg(any(test, feature = "insecure-derived-iv"))]
mod derived_iv;
pub mod kdf;
pub mod stream;

pub use aes_cbc::AesCbcStreamFactory;
#[cfg(any(test, feature = "insecure-derived-iv"))]
pub use derived_iv::DerivedIvStreamFactory;
pub use stream::{CbcDecryptReader, CbcEncryptWriter, BLOCK_LEN};

/// Cryptographic failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Padding check failed: wrong key/salt or corrupted ciphertext.
    #[error("cryptographic error: invalid padding")]
    Padding,

    /// Ciphertext ends early or is not block aligned.
    #[error("cryptographic error: truncated ciphertext: {0}")]
    Truncated(String),

    /// Underlying stream failed.
    #[error("cryptographic error: stream I/O failed: {0}")]
    Io(String),
}

impl CryptoError {
    /// Recover the crypto error carried by a stream error, if any.
    pub fn from_io(err: &io::Error) -> Self {
        match err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<CryptoError>())
        {
            Some(crypto) => crypto.clone(),
            None if err.kind() == io::ErrorKind::UnexpectedEof => {
                Self::Truncated(err.to_string())
            }
            None => Self::Io(err.to_string()),
        }
    }

    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Writer half of a cipher stream.
pub trait CipherWrite: Write + Send {
    /// Pad and emit the final block. Further writes fail.
    fn finish(&mut self) -> io::Result<()>;
}

/// Produces paired encrypt/decrypt transforms for one bundle.
pub trait CryptoStreamFactory: fmt::Debug + Send + Sync {
    fn create_encrypt_stream<'a>(
        &self,
        base: Box<dyn Write + Send + 'a>,
        options: &BundleRequestOptions,
    ) -> CryptoResult<Box<dyn CipherWrite + 'a>>;

    fn create_decrypt_stream<'a>(
        &self,
        base: Box<dyn Read + Send + 'a>,
        options: &BundleRequestOptions,
    ) -> CryptoResult<Box<dyn Read + Send + 'a>>;
}

/// Encrypt `plaintext` in memory.
pub fn encrypt_bytes(
    factory: &dyn CryptoStreamFactory,
    plaintext: &[u8],
    options: &BundleRequestOptions,
) -> CryptoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(plaintext.len() + 2 * BLOCK_LEN);
    {
        let mut writer = factory.create_encrypt_stream(Box::new(&mut out), options)?;
        writer
            .write_all(plaintext)
            .map_err(|e| CryptoError::from_io(&e))?;
        writer.finish().map_err(|e| CryptoError::from_io(&e))?;
    }
    Ok(out)
}

/// Decrypt `ciphertext` in memory.
pub fn decrypt_bytes(
    factory: &dyn CryptoStreamFactory,
    ciphertext: &[u8],
    options: &BundleRequestOptions,
) -> CryptoResult<Vec<u8>> {
    let mut reader = factory.create_decrypt_stream(Box::new(ciphertext), options)?;
    let mut out = Vec::with_capacity(ciphertext.len());
    reader
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::from_io(&e))?;
    Ok(out)
}
