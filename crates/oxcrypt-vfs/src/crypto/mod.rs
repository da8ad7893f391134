//! Key material and key-wrapping primitives used to unlock a vault.

pub mod key_wrap;
pub mod keys;

use thiserror::Error;

/// Errors that can occur while unlocking or creating vault key material.
///
/// Some variants indicate **integrity violations** and are marked with
/// `[INTEGRITY VIOLATION]` in their message.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// HMAC verification of the masterkey file version failed.
    #[error("[INTEGRITY VIOLATION] HMAC verification failed - masterkey file tampered")]
    HmacVerificationFailed,

    /// The masterkey file's integrity check failed during unwrapping.
    ///
    /// Usually a wrong passphrase; cryptographically indistinguishable from tampering.
    #[error("Key unwrap failed - incorrect passphrase or corrupted/tampered vault")]
    KeyUnwrapIntegrityFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    #[error("Invalid ciphertext length for key unwrap")]
    InvalidCiphertextLength,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl From<key_wrap::UnwrapError> for CryptoError {
    fn from(err: key_wrap::UnwrapError) -> Self {
        match err {
            key_wrap::UnwrapError::InvalidCiphertextLength
            | key_wrap::UnwrapError::CiphertextTooShort => CryptoError::InvalidCiphertextLength,
            key_wrap::UnwrapError::InvalidIntegrityCheck => CryptoError::KeyUnwrapIntegrityFailed,
        }
    }
}

pub use keys::{KeyAccessError, MasterKey};
