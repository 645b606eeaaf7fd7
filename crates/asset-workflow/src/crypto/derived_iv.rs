//! Deterministic-IV factory kept for negative tests.
//!
//! Encrypt and decrypt derive their keys from different passwords, so a
//! payload written by this factory never decrypts back to its plaintext. The
//! IV is derived from the bundle name, which leaks equality of payloads. Do
//! not ship it.

use std::io::{Read, Write};

use super::kdf::{derive_block, Prf};
use super::stream::{CbcDecryptReader, CbcEncryptWriter};
use super::{CipherWrite, CryptoResult, CryptoStreamFactory};
use crate::types::BundleRequestOptions;

const ENCRYPT_KEY_PASSWORD: &str = "encrypt-key";
const DECRYPT_KEY_PASSWORD: &str = "decrypt-key";
const IV_PASSWORD: &str = "derived-iv";
const KEY_ITERATIONS: u32 = 100;
const IV_ITERATIONS: u32 = 1;

#[derive(Debug, Clone, Default)]
pub struct DerivedIvStreamFactory;

impl DerivedIvStreamFactory {
    fn iv_for(options: &BundleRequestOptions) -> [u8; 16] {
        derive_block(
            IV_PASSWORD,
            options.bundle_name.as_bytes(),
            IV_ITERATIONS,
            Prf::HmacSha256,
        )
    }

    fn key_for(password: &str, options: &BundleRequestOptions) -> [u8; 16] {
        derive_block(
            password,
            options.bundle_name.as_bytes(),
            KEY_ITERATIONS,
            Prf::HmacSha256,
        )
    }
}

impl CryptoStreamFactory for DerivedIvStreamFactory {
    fn create_encrypt_stream<'a>(
        &self,
        base: Box<dyn Write + Send + 'a>,
        options: &BundleRequestOptions,
    ) -> CryptoResult<Box<dyn CipherWrite + 'a>> {
        let key = Self::key_for(ENCRYPT_KEY_PASSWORD, options);
        Ok(Box::new(CbcEncryptWriter::new(
            base,
            &key,
            &Self::iv_for(options),
        )))
    }

    fn create_decrypt_stream<'a>(
        &self,
        base: Box<dyn Read + Send + 'a>,
        options: &BundleRequestOptions,
    ) -> CryptoResult<Box<dyn Read + Send + 'a>> {
        let key = Self::key_for(DECRYPT_KEY_PASSWORD, options);
        Ok(Box::new(CbcDecryptReader::new(
            base,
            &key,
            &Self::iv_for(options),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt_bytes, encrypt_bytes, CryptoError};

    #[test]
    fn test_deterministic_ciphertext() {
        let opts = BundleRequestOptions::new("cube_bundle", "h1");
        let a = encrypt_bytes(&DerivedIvStreamFactory, b"payload", &opts).unwrap();
        let b = encrypt_bytes(&DerivedIvStreamFactory, b"payload", &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_iv_uses_single_round() {
        let opts = BundleRequestOptions::new("cube_bundle", "h1");
        let iv = DerivedIvStreamFactory::iv_for(&opts);
        assert_eq!(
            iv,
            derive_block(IV_PASSWORD, b"cube_bundle", 1, Prf::HmacSha256)
        );
        assert_ne!(
            iv,
            derive_block(IV_PASSWORD, b"cube_bundle", KEY_ITERATIONS, Prf::HmacSha256)
        );
        assert_eq!(
            DerivedIvStreamFactory::key_for(ENCRYPT_KEY_PASSWORD, &opts),
            derive_block(ENCRYPT_KEY_PASSWORD, b"cube_bundle", 100, Prf::HmacSha256)
        );
    }

    #[test]
    fn test_never_round_trips() {
        let opts = BundleRequestOptions::new("cube_bundle", "h1");
        let plain = b"a payload that should not come back".to_vec();
        let cipher = encrypt_bytes(&DerivedIvStreamFactory, &plain, &opts).unwrap();

        match decrypt_bytes(&DerivedIvStreamFactory, &cipher, &opts) {
            Ok(out) => assert_ne!(out, plain),
            Err(e) => assert_eq!(e, CryptoError::Padding),
        }
    }
}
