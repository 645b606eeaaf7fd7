//! PBKDF2 key derivation for bundle ciphers.
//!
//! The salt is always the UTF-8 bundle name, so every holder of the shared
//! password derives the same key for the same bundle.

use sha1::Sha1;
use sha2::Sha256;

/// AES-128 key / IV length in bytes.
pub const KEY_LEN: usize = 16;

/// PBKDF2 round count used by the production cipher.
pub const DEFAULT_ITERATIONS: u32 = 1000;

/// HMAC pseudo-random function for PBKDF2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prf {
    HmacSha1,
    HmacSha256,
}

/// Derive 16 bytes from `password` and `salt`.
pub fn derive_block(password: &str, salt: &[u8], iterations: u32, prf: Prf) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    match prf {
        Prf::HmacSha1 => pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, iterations, &mut out),
        Prf::HmacSha256 => {
            pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out)
        }
    }
    out
}

/// Key for `bundle_name` under `password` (PBKDF2-HMAC-SHA1, default rounds).
pub fn derive_bundle_key(password: &str, bundle_name: &str) -> [u8; KEY_LEN] {
    derive_block(
        password,
        bundle_name.as_bytes(),
        DEFAULT_ITERATIONS,
        Prf::HmacSha1,
    )
}
