#![forbid(unsafe_code)]

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::crypto::{
    CryptoError,
    key_wrap::{self, wrap_key},
    keys::{KeyAccessError, MasterKey},
};

const DEFAULT_SCRYPT_SALT_LENGTH: usize = 8;
const DEFAULT_SCRYPT_COST_PARAM_LOG2: u8 = 15; // 2^15 = 32768
const DEFAULT_SCRYPT_BLOCK_SIZE: u32 = 8;
const SCRYPT_PARALLELIZATION: u32 = 1;

/// Scrypt cost used when `OXCRYPT_FAST_KDF=1` (N = 2^10). Testing only.
const FAST_SCRYPT_COST_PARAM_LOG2: u8 = 10;

/// Legacy version field, fixed at 999 since vault format 8.
const MASTERKEY_FILE_VERSION: u32 = 999;

fn is_fast_kdf_enabled() -> bool {
    std::env::var("OXCRYPT_FAST_KDF")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Scrypt cost (log2 N) for newly created masterkey files.
pub fn default_scrypt_cost_log2() -> u8 {
    if is_fast_kdf_enabled() {
        FAST_SCRYPT_COST_PARAM_LOG2
    } else {
        DEFAULT_SCRYPT_COST_PARAM_LOG2
    }
}

#[derive(Error, Debug)]
pub enum MasterKeyCreationError {
    #[error("RNG failed: {0}")]
    Rng(String),

    #[error("Key derivation failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key wrap failed: {0}")]
    KeyWrap(#[from] key_wrap::WrapError),

    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// The masterkey file (`masterkey.cryptomator`).
///
/// Holds the AES and MAC master keys wrapped (RFC 3394) under a key encryption
/// key derived from the passphrase with scrypt.
#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyFile {
    version: u32,

    #[serde_as(as = "Base64")]
    pub scrypt_salt: Vec<u8>,

    /// Scrypt cost parameter N (a power of two).
    pub scrypt_cost_param: u32,

    pub scrypt_block_size: u32,

    #[serde_as(as = "Base64")]
    pub primary_master_key: Vec<u8>,

    #[serde_as(as = "Base64")]
    pub hmac_master_key: Vec<u8>,

    /// HMAC-SHA256 over the big-endian version number.
    #[serde_as(as = "Base64")]
    pub version_mac: Vec<u8>,
}

fn derive_kek(
    passphrase: &str,
    salt: &[u8],
    log2_n: u8,
    block_size: u32,
) -> Result<SecretBox<[u8; 32]>, CryptoError> {
    let normalized = Zeroizing::new(passphrase.nfc().collect::<String>());

    let params = scrypt::Params::new(log2_n, block_size, SCRYPT_PARALLELIZATION, 32).map_err(|e| {
        CryptoError::InvalidScryptParams(format!(
            "N=2^{log2_n}, r={block_size}, p={SCRYPT_PARALLELIZATION}: {e}"
        ))
    })?;

    let mut kek = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(normalized.as_bytes(), salt, &params, &mut kek[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    Ok(SecretBox::new(Box::new(*kek)))
}

fn unwrap_32(wrapped: &[u8], kek: &SecretBox<[u8; 32]>) -> Result<[u8; 32], CryptoError> {
    let key = key_wrap::unwrap_key(wrapped, kek)?;
    key.as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key.len(),
        })
}

impl MasterKeyFile {
    /// Unlock with a passphrase: derive the KEK, unwrap both keys, verify the version MAC.
    ///
    /// # Errors
    ///
    /// - `CryptoError::KeyUnwrapIntegrityFailed`: wrong passphrase or tampered key material
    /// - `CryptoError::HmacVerificationFailed`: **[INTEGRITY VIOLATION]** version tampered
    #[instrument(level = "debug", skip_all, fields(cost = self.scrypt_cost_param))]
    pub fn unlock(&self, passphrase: &str) -> Result<MasterKey, CryptoError> {
        if !self.scrypt_cost_param.is_power_of_two() {
            return Err(CryptoError::InvalidScryptParams(format!(
                "cost parameter {} is not a power of two",
                self.scrypt_cost_param
            )));
        }
        // Lossless: log2 of a u32 is at most 31
        let log2_n = self.scrypt_cost_param.trailing_zeros() as u8;
        let kek = derive_kek(passphrase, &self.scrypt_salt, log2_n, self.scrypt_block_size)?;

        // AES key first, then MAC key
        let mut aes_key = unwrap_32(&self.primary_master_key, &kek)?;
        let mut mac_key = unwrap_32(&self.hmac_master_key, &kek)?;

        let verified = self.check_version(&mac_key);
        let master_key = MasterKey::new(aes_key, mac_key);
        zeroize::Zeroize::zeroize(&mut aes_key);
        zeroize::Zeroize::zeroize(&mut mac_key);

        verified.inspect_err(|_| warn!("Masterkey version MAC mismatch"))?;
        debug!("Masterkey file unlocked");
        Ok(master_key)
    }

    fn check_version(&self, mac_key: &[u8; 32]) -> Result<(), CryptoError> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, mac_key);
        hmac::verify(&key, &self.version.to_be_bytes(), &self.version_mac)
            .map_err(|_| CryptoError::HmacVerificationFailed)
    }
}

/// Serialize `master_key` into masterkey file JSON protected by `passphrase`.
///
/// `scrypt_cost_log2` is normally [`default_scrypt_cost_log2`].
pub fn create_masterkey_file(
    master_key: &MasterKey,
    passphrase: &str,
    scrypt_cost_log2: u8,
) -> Result<String, MasterKeyCreationError> {
    let mut salt = vec![0u8; DEFAULT_SCRYPT_SALT_LENGTH];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| MasterKeyCreationError::Rng("Failed to generate salt".to_string()))?;

    let kek = derive_kek(passphrase, &salt, scrypt_cost_log2, DEFAULT_SCRYPT_BLOCK_SIZE)?;

    let primary_master_key = master_key.with_aes_key(|key| wrap_key(key, &kek))??;
    let hmac_master_key = master_key.with_mac_key(|key| wrap_key(key, &kek))??;

    let version_mac = master_key.with_mac_key(|key| {
        let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, key);
        hmac::sign(&hmac_key, &MASTERKEY_FILE_VERSION.to_be_bytes())
            .as_ref()
            .to_vec()
    })?;

    let file = MasterKeyFile {
        version: MASTERKEY_FILE_VERSION,
        scrypt_salt: salt,
        scrypt_cost_param: 1u32 << scrypt_cost_log2,
        scrypt_block_size: DEFAULT_SCRYPT_BLOCK_SIZE,
        primary_master_key,
        hmac_master_key,
        version_mac,
    };

    Ok(serde_json::to_string_pretty(&file)?)
}
