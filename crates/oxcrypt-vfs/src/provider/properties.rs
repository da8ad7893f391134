//! Properties used to open a vault filesystem.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::error::FsError;
use crate::vault::config::{DEFAULT_MASTERKEY_FILENAME, DEFAULT_VAULT_CONFIG_FILENAME};

const DEFAULT_LONG_NAME_CACHE_CAPACITY: u64 = 5_000;

/// Options for opening a vault.
///
/// ```
/// use oxcrypt_vfs::provider::properties::CryptoFileSystemProperties;
/// use secrecy::SecretString;
///
/// let props = CryptoFileSystemProperties::builder()
///     .passphrase(SecretString::from("correct horse".to_string()))
///     .read_only(true)
///     .build()
///     .unwrap();
/// assert!(props.read_only());
/// ```
pub struct CryptoFileSystemProperties {
    passphrase: SecretString,
    vault_config_filename: String,
    masterkey_filename: String,
    read_only: bool,
    shortening_threshold: Option<usize>,
    long_name_cache_capacity: u64,
}

impl fmt::Debug for CryptoFileSystemProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoFileSystemProperties")
            .field("passphrase", &"[REDACTED]")
            .field("vault_config_filename", &self.vault_config_filename)
            .field("masterkey_filename", &self.masterkey_filename)
            .field("read_only", &self.read_only)
            .field("shortening_threshold", &self.shortening_threshold)
            .finish_non_exhaustive()
    }
}

impl CryptoFileSystemProperties {
    pub fn builder() -> CryptoFileSystemPropertiesBuilder {
        CryptoFileSystemPropertiesBuilder::default()
    }

    pub fn passphrase(&self) -> &SecretString {
        &self.passphrase
    }

    /// An owned copy of the passphrase.
    pub fn passphrase_copy(&self) -> SecretString {
        SecretString::from(self.passphrase.expose_secret().to_string())
    }

    pub fn vault_config_filename(&self) -> &str {
        &self.vault_config_filename
    }

    pub fn masterkey_filename(&self) -> &str {
        &self.masterkey_filename
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Threshold overriding the one in the vault configuration.
    pub fn shortening_threshold(&self) -> Option<usize> {
        self.shortening_threshold
    }

    pub fn long_name_cache_capacity(&self) -> u64 {
        self.long_name_cache_capacity
    }
}

#[derive(Default)]
pub struct CryptoFileSystemPropertiesBuilder {
    passphrase: Option<SecretString>,
    vault_config_filename: Option<String>,
    masterkey_filename: Option<String>,
    read_only: bool,
    shortening_threshold: Option<usize>,
    long_name_cache_capacity: Option<u64>,
}

impl CryptoFileSystemPropertiesBuilder {
    #[must_use]
    pub fn passphrase(mut self, passphrase: SecretString) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    #[must_use]
    pub fn vault_config_filename(mut self, name: impl Into<String>) -> Self {
        self.vault_config_filename = Some(name.into());
        self
    }

    #[must_use]
    pub fn masterkey_filename(mut self, name: impl Into<String>) -> Self {
        self.masterkey_filename = Some(name.into());
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn shortening_threshold(mut self, threshold: usize) -> Self {
        self.shortening_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn long_name_cache_capacity(mut self, capacity: u64) -> Self {
        self.long_name_cache_capacity = Some(capacity);
        self
    }

    /// Fails with `InvalidArgument` when no passphrase was given.
    pub fn build(self) -> Result<CryptoFileSystemProperties, FsError> {
        let passphrase = self
            .passphrase
            .ok_or_else(|| FsError::InvalidArgument("passphrase is required".to_string()))?;
        if self.shortening_threshold == Some(0) {
            return Err(FsError::InvalidArgument(
                "shortening threshold must be positive".to_string(),
            ));
        }
        Ok(CryptoFileSystemProperties {
            passphrase,
            vault_config_filename: self
                .vault_config_filename
                .unwrap_or_else(|| DEFAULT_VAULT_CONFIG_FILENAME.to_string()),
            masterkey_filename: self
                .masterkey_filename
                .unwrap_or_else(|| DEFAULT_MASTERKEY_FILENAME.to_string()),
            read_only: self.read_only,
            shortening_threshold: self.shortening_threshold,
            long_name_cache_capacity: self
                .long_name_cache_capacity
                .unwrap_or(DEFAULT_LONG_NAME_CACHE_CAPACITY),
        })
    }
}
