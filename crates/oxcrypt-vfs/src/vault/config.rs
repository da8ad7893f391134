#![forbid(unsafe_code)]

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use jsonwebtoken::{Algorithm, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::crypto::{
    CryptoError,
    keys::{JwtValidationError, KeyAccessError, MasterKey},
};
use crate::fs::name::NameCryptor;
use crate::vault::master_key::{
    MasterKeyCreationError, MasterKeyFile, create_masterkey_file, default_scrypt_cost_log2,
};
use crate::vault::path::DirId;

/// Default shortening threshold for filenames (in characters of encrypted name).
pub const DEFAULT_SHORTENING_THRESHOLD: usize = 220;

pub const DEFAULT_VAULT_CONFIG_FILENAME: &str = "vault.cryptomator";
pub const DEFAULT_MASTERKEY_FILENAME: &str = "masterkey.cryptomator";

const VAULT_FORMAT: i32 = 8;
const CIPHER_COMBO: &str = "SIV_GCM";
const MASTERKEY_FILE_SCHEME: &str = "masterkeyfile";

/// Claims carried in the vault configuration JWT.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfigClaims {
    pub format: i32,
    #[serde(default = "default_shortening_threshold")]
    pub shortening_threshold: i32,
    pub jti: String,
    pub cipher_combo: String,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn default_shortening_threshold() -> i32 {
    DEFAULT_SHORTENING_THRESHOLD as i32
}

/// A verified vault configuration.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    claims: VaultConfigClaims,
    key_id: Url,
}

impl VaultConfig {
    pub fn claims(&self) -> &VaultConfigClaims {
        &self.claims
    }

    /// Location of the masterkey, e.g. `masterkeyfile:masterkey.cryptomator`.
    pub fn key_id(&self) -> &Url {
        &self.key_id
    }

    pub fn shortening_threshold(&self) -> usize {
        usize::try_from(self.claims.shortening_threshold.max(0)).unwrap_or(DEFAULT_SHORTENING_THRESHOLD)
    }
}

#[derive(Error, Debug)]
pub enum VaultConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("Masterkey file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Vault config is not a valid JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Vault config signature rejected: {0}")]
    Signature(#[from] JwtValidationError),

    #[error("Vault config header has no key id")]
    MissingKeyId,

    #[error("Unsupported key id '{0}'")]
    UnsupportedKeyId(String),

    #[error("Unsupported vault format: {0}")]
    UnsupportedVaultFormat(i32),

    #[error("Unsupported cipher combo: {0}")]
    UnsupportedCipherCombo(String),

    #[error("Failed to unlock masterkey: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Failed to create masterkey: {0}")]
    Creation(#[from] MasterKeyCreationError),

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    #[error("Vault already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Failed to compute root directory path: {0}")]
    RootDirectory(String),
}

impl VaultConfigError {
    fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        VaultConfigError::Io {
            source,
            path: path.into(),
        }
    }
}

/// Produces the master key named by a vault configuration's key id.
pub trait MasterKeyLoader: Send + Sync {
    fn load(&self, vault_root: &Path, key_id: &Url) -> Result<MasterKey, VaultConfigError>;
}

/// Unlocks `masterkeyfile:` key ids with a passphrase.
pub struct PassphraseLoader {
    passphrase: SecretString,
}

impl PassphraseLoader {
    pub fn new(passphrase: SecretString) -> Self {
        Self { passphrase }
    }
}

impl MasterKeyLoader for PassphraseLoader {
    #[instrument(level = "debug", skip(self), fields(key_id = %key_id))]
    fn load(&self, vault_root: &Path, key_id: &Url) -> Result<MasterKey, VaultConfigError> {
        if key_id.scheme() != MASTERKEY_FILE_SCHEME {
            return Err(VaultConfigError::UnsupportedKeyId(key_id.to_string()));
        }
        let path = vault_root.join(key_id.path());
        let json = fs::read_to_string(&path).map_err(|e| VaultConfigError::io(e, &path))?;
        let file: MasterKeyFile = serde_json::from_str(&json)?;
        Ok(file.unlock(self.passphrase.expose_secret())?)
    }
}

/// Read `vault.cryptomator`, load its master key and verify the signed claims.
#[instrument(level = "debug", skip(loader))]
pub fn load_vault(
    vault_root: &Path,
    config_filename: &str,
    loader: &dyn MasterKeyLoader,
) -> Result<(VaultConfig, MasterKey), VaultConfigError> {
    let config_path = vault_root.join(config_filename);
    let token =
        fs::read_to_string(&config_path).map_err(|e| VaultConfigError::io(e, &config_path))?;
    let token = token.trim();

    let header = jsonwebtoken::decode_header(token)?;
    let kid = header.kid.ok_or(VaultConfigError::MissingKeyId)?;
    let key_id = Url::parse(&kid).map_err(|_| VaultConfigError::UnsupportedKeyId(kid.clone()))?;

    let master_key = loader.load(vault_root, &key_id)?;

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    let claims: VaultConfigClaims = master_key.validate_jwt(token, &validation)?;

    if claims.format != VAULT_FORMAT {
        return Err(VaultConfigError::UnsupportedVaultFormat(claims.format));
    }
    if claims.cipher_combo != CIPHER_COMBO {
        return Err(VaultConfigError::UnsupportedCipherCombo(claims.cipher_combo));
    }

    debug!(
        format = claims.format,
        shortening_threshold = claims.shortening_threshold,
        "Vault config verified"
    );
    Ok((VaultConfig { claims, key_id }, master_key))
}

/// Options for [`initialize_vault`].
#[derive(Debug, Clone)]
pub struct VaultInit<'a> {
    pub config_filename: &'a str,
    pub masterkey_filename: &'a str,
    pub shortening_threshold: usize,
    pub scrypt_cost_log2: u8,
}

impl Default for VaultInit<'_> {
    fn default() -> Self {
        Self {
            config_filename: DEFAULT_VAULT_CONFIG_FILENAME,
            masterkey_filename: DEFAULT_MASTERKEY_FILENAME,
            shortening_threshold: DEFAULT_SHORTENING_THRESHOLD,
            scrypt_cost_log2: default_scrypt_cost_log2(),
        }
    }
}

/// Create a new, empty vault at `vault_root`.
///
/// Writes the masterkey file, the signed vault configuration and the root
/// storage directory. Fails if a vault configuration already exists.
#[instrument(level = "info", skip(passphrase, names, init))]
pub fn initialize_vault(
    vault_root: &Path,
    passphrase: &SecretString,
    master_key: &MasterKey,
    names: &dyn NameCryptor,
    init: &VaultInit<'_>,
) -> Result<VaultConfig, VaultConfigError> {
    let config_path = vault_root.join(init.config_filename);
    if config_path.exists() {
        return Err(VaultConfigError::AlreadyInitialized(vault_root.to_path_buf()));
    }
    fs::create_dir_all(vault_root).map_err(|e| VaultConfigError::io(e, vault_root))?;

    let masterkey_json =
        create_masterkey_file(master_key, passphrase.expose_secret(), init.scrypt_cost_log2)?;
    let masterkey_path = vault_root.join(init.masterkey_filename);
    fs::write(&masterkey_path, masterkey_json)
        .map_err(|e| VaultConfigError::io(e, &masterkey_path))?;

    let claims = VaultConfigClaims {
        format: VAULT_FORMAT,
        shortening_threshold: i32::try_from(init.shortening_threshold).unwrap_or(i32::MAX),
        jti: uuid::Uuid::new_v4().to_string(),
        cipher_combo: CIPHER_COMBO.to_string(),
    };
    let kid = format!("{MASTERKEY_FILE_SCHEME}:{}", init.masterkey_filename);
    let key_id = Url::parse(&kid).map_err(|_| VaultConfigError::UnsupportedKeyId(kid.clone()))?;

    let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
    header.kid = Some(kid);
    let token = jsonwebtoken::encode(&header, &claims, &master_key.create_jwt_encoding_key()?)?;
    fs::write(&config_path, token).map_err(|e| VaultConfigError::io(e, &config_path))?;

    let root_dir = crate::vault::mapper::storage_path(vault_root, names, &DirId::root())
        .map_err(|e| VaultConfigError::RootDirectory(e.to_string()))?;
    fs::create_dir_all(&root_dir).map_err(|e| VaultConfigError::io(e, &root_dir))?;

    info!(vault = %vault_root.display(), "Vault initialized");
    Ok(VaultConfig { claims, key_id })
}
