#![forbid(unsafe_code)]

use std::sync::RwLock;

use generic_array::{GenericArray, typenum::U64};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;
use zeroize::Zeroize;

/// Error type for key access operations.
#[derive(Debug, Error)]
pub enum KeyAccessError {
    /// The key material was wiped by [`MasterKey::destroy`].
    #[error("Master key has been destroyed")]
    Destroyed,

    /// Lock was poisoned (a thread panicked while holding it)
    #[error("Key lock was poisoned")]
    LockPoisoned,
}

/// Error type for JWT validation operations.
#[derive(Debug, Error)]
pub enum JwtValidationError {
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    #[error("JWT validation failed: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

struct KeyPair {
    aes: SecretBox<[u8; 32]>,
    mac: SecretBox<[u8; 32]>,
}

/// Master key pair for vault operations.
///
/// Holds the 256-bit AES encryption key and the 256-bit MAC key. Key material
/// lives in [`SecretBox`] containers, which zero their memory on drop, and is
/// only reachable through scoped accessors so it never escapes a callback.
///
/// # Thread Safety
///
/// `MasterKey` is `Send + Sync` and is normally shared as `Arc<MasterKey>`
/// between the name cryptor, the content layer and the owning filesystem.
/// Once [`destroy`](Self::destroy) has run, every accessor fails with
/// [`KeyAccessError::Destroyed`].
pub struct MasterKey {
    keys: RwLock<Option<KeyPair>>,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl MasterKey {
    /// Generate a new random master key pair using a cryptographically secure RNG.
    pub fn random() -> Self {
        let mut aes_master_key = [0u8; 32];
        let mut mac_master_key = [0u8; 32];
        rand::rng().fill_bytes(&mut aes_master_key);
        rand::rng().fill_bytes(&mut mac_master_key);
        let key = Self::new(aes_master_key, mac_master_key);
        aes_master_key.zeroize();
        mac_master_key.zeroize();
        key
    }

    /// Create a new master key pair from raw key material.
    ///
    /// The caller is responsible for zeroing the original arrays if they
    /// contain sensitive data.
    pub fn new(aes_key: [u8; 32], mac_key: [u8; 32]) -> Self {
        MasterKey {
            keys: RwLock::new(Some(KeyPair {
                aes: SecretBox::new(Box::new(aes_key)),
                mac: SecretBox::new(Box::new(mac_key)),
            })),
        }
    }

    /// Copy the key material into an independent `MasterKey`.
    pub fn try_clone(&self) -> Result<Self, KeyAccessError> {
        self.with_pair(|pair| Self::new(*pair.aes.expose_secret(), *pair.mac.expose_secret()))
    }

    /// Wipe the key material. Subsequent accesses fail with [`KeyAccessError::Destroyed`].
    pub fn destroy(&self) {
        // A poisoned lock still guards the keys; wipe them regardless.
        let mut guard = match self.keys.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    pub fn is_destroyed(&self) -> bool {
        self.keys.read().map_or(true, |guard| guard.is_none())
    }

    fn with_pair<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&KeyPair) -> R,
    {
        let guard = self.keys.read().map_err(|_| KeyAccessError::LockPoisoned)?;
        let pair = guard.as_ref().ok_or(KeyAccessError::Destroyed)?;
        Ok(f(pair))
    }

    /// Execute a function with access to the raw 512-bit key (AES key || MAC key).
    ///
    /// The combined buffer is zeroed when the callback returns.
    pub fn with_raw_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8]) -> R,
    {
        struct ZeroOnDrop([u8; 64]);
        impl Drop for ZeroOnDrop {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        self.with_pair(|pair| {
            let mut key = ZeroOnDrop([0u8; 64]);
            key.0[..32].copy_from_slice(pair.aes.expose_secret());
            key.0[32..].copy_from_slice(pair.mac.expose_secret());
            f(&key.0)
        })
    }

    /// Execute a function with access to just the AES encryption key.
    pub fn with_aes_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        self.with_pair(|pair| f(pair.aes.expose_secret()))
    }

    /// Execute a function with access to just the MAC key.
    pub fn with_mac_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        self.with_pair(|pair| f(pair.mac.expose_secret()))
    }

    /// Execute a function with access to both keys in AES-SIV order (MAC || AES).
    ///
    /// # Example
    ///
    /// ```
    /// # use oxcrypt_vfs::crypto::keys::MasterKey;
    /// # use aes_siv::{siv::Aes256Siv, KeyInit};
    /// let master_key = MasterKey::random();
    ///
    /// let cipher = master_key.with_siv_key(|key_bytes| {
    ///     Aes256Siv::new(key_bytes)
    /// }).unwrap();
    /// ```
    pub fn with_siv_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        // GenericArray doesn't implement DefaultIsZeroes
        struct ZeroizeOnDrop(GenericArray<u8, U64>);
        impl Drop for ZeroizeOnDrop {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        self.with_pair(|pair| {
            let mut key = ZeroizeOnDrop(GenericArray::<u8, U64>::default());
            key.0[..32].copy_from_slice(pair.mac.expose_secret());
            key.0[32..].copy_from_slice(pair.aes.expose_secret());
            f(&key.0)
        })
    }

    /// Create a JWT encoding key from the raw 512-bit key material.
    pub fn create_jwt_encoding_key(&self) -> Result<jsonwebtoken::EncodingKey, KeyAccessError> {
        self.with_raw_key(jsonwebtoken::EncodingKey::from_secret)
    }

    /// Validate and decode a JWT signed with this master key.
    pub fn validate_jwt<T>(
        &self,
        token: &str,
        validation: &jsonwebtoken::Validation,
    ) -> Result<T, JwtValidationError>
    where
        T: serde::de::DeserializeOwned,
    {
        let jwt_result = self.with_raw_key(|key_bytes| {
            let decoding_key = jsonwebtoken::DecodingKey::from_secret(key_bytes);
            jsonwebtoken::decode::<T>(token, &decoding_key, validation)
                .map(|token_data| token_data.claims)
        })?;
        jwt_result.map_err(JwtValidationError::from)
    }
}
