use std::fmt;
use std::io::{Read, Write};

use rand::RngCore;

use super::kdf::{derive_bundle_key, KEY_LEN};
use super::stream::{CbcDecryptReader, CbcEncryptWriter, BLOCK_LEN};
use super::{CipherWrite, CryptoError, CryptoResult, CryptoStreamFactory};
use crate::types::BundleRequestOptions;

const DEFAULT_PASSWORD: &str = "asset-workflow:bundle-cipher:v1";

/// AES-128-CBC factory with a random IV stored as a clear 16-byte header.
///
/// The key is PBKDF2-HMAC-SHA1(password, bundle name). Encrypting the same
/// payload twice yields different ciphertexts.
#[derive(Clone)]
pub struct AesCbcStreamFactory {
    password: String,
}

impl AesCbcStreamFactory {
    pub fn new() -> Self {
        Self {
            password: DEFAULT_PASSWORD.to_string(),
        }
    }

    /// Use a deployment-specific password instead of the built-in one.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }

    fn key_for(&self, options: &BundleRequestOptions) -> [u8; KEY_LEN] {
        derive_bundle_key(&self.password, &options.bundle_name)
    }
}

impl Default for AesCbcStreamFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AesCbcStreamFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCbcStreamFactory")
            .field("password", &"<redacted>")
            .finish()
    }
}

impl CryptoStreamFactory for AesCbcStreamFactory {
    fn create_encrypt_stream<'a>(
        &self,
        mut base: Box<dyn Write + Send + 'a>,
        options: &BundleRequestOptions,
    ) -> CryptoResult<Box<dyn CipherWrite + 'a>> {
        let mut iv = [0u8; BLOCK_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        base.write_all(&iv).map_err(|e| CryptoError::from_io(&e))?;

        let key = self.key_for(options);
        Ok(Box::new(CbcEncryptWriter::new(base, &key, &iv)))
    }

    fn create_decrypt_stream<'a>(
        &self,
        mut base: Box<dyn Read + Send + 'a>,
        options: &BundleRequestOptions,
    ) -> CryptoResult<Box<dyn Read + Send + 'a>> {
        let mut iv = [0u8; BLOCK_LEN];
        base.read_exact(&mut iv).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                CryptoError::Truncated("missing IV header".to_string())
            }
            _ => CryptoError::from_io(&e),
        })?;

        let key = self.key_for(options);
        Ok(Box::new(CbcDecryptReader::new(base, &key, &iv)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt_bytes, encrypt_bytes};

    fn opts(name: &str) -> BundleRequestOptions {
        BundleRequestOptions::new(name, "0123abcd")
    }

    #[test]
    fn test_round_trip() {
        let factory = AesCbcStreamFactory::new();
        let plain = br#"{"assets":{"Cube":{}}}"#.to_vec();
        let cipher = encrypt_bytes(&factory, &plain, &opts("cube_bundle")).unwrap();

        assert_eq!(cipher.len() % BLOCK_LEN, 0);
        assert!(cipher.len() >= BLOCK_LEN + plain.len());
        assert_eq!(
            decrypt_bytes(&factory, &cipher, &opts("cube_bundle")).unwrap(),
            plain
        );
    }

    #[test]
    fn test_random_iv_per_encryption() {
        let factory = AesCbcStreamFactory::new();
        let a = encrypt_bytes(&factory, b"same payload", &opts("cube_bundle")).unwrap();
        let b = encrypt_bytes(&factory, b"same payload", &opts("cube_bundle")).unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..BLOCK_LEN], b[..BLOCK_LEN]);
    }

    #[test]
    fn test_wrong_salt_does_not_recover_plaintext() {
        let factory = AesCbcStreamFactory::new();
        let plain = b"scene payload for the wrong salt".to_vec();
        let cipher = encrypt_bytes(&factory, &plain, &opts("scene_bundle")).unwrap();

        match decrypt_bytes(&factory, &cipher, &opts("other_bundle")) {
            Ok(out) => assert_ne!(out, plain),
            Err(e) => assert_eq!(e, CryptoError::Padding),
        }
    }

    #[test]
    fn test_wrong_password_does_not_recover_plaintext() {
        let plain = b"prefab payload".to_vec();
        let cipher =
            encrypt_bytes(&AesCbcStreamFactory::new(), &plain, &opts("cube_bundle")).unwrap();

        let wrong = AesCbcStreamFactory::with_password("not-the-password");
        match decrypt_bytes(&wrong, &cipher, &opts("cube_bundle")) {
            Ok(out) => assert_ne!(out, plain),
            Err(e) => assert_eq!(e, CryptoError::Padding),
        }
    }

    #[test]
    fn test_short_header_is_truncated() {
        let factory = AesCbcStreamFactory::new();
        let err = decrypt_bytes(&factory, &[0u8; 5], &opts("cube_bundle")).unwrap_err();
        assert!(matches!(err, CryptoError::Truncated(_)));
    }

    #[test]
    fn test_debug_redacts_password() {
        let factory = AesCbcStreamFactory::with_password("secret");
        assert!(!format!("{factory:?}").contains("secret"));
    }
}
