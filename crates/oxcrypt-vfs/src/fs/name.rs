use std::{fmt, sync::Arc};

use aes_siv::{KeyInit, siv::Aes256Siv};
use base64::{Engine as _, engine::general_purpose};
use data_encoding::BASE32;
use ring::digest;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::keys::{KeyAccessError, MasterKey};
use crate::vault::path::DirId;

/// Extension carried by every regular ciphertext name.
pub const ENCRYPTED_SUFFIX: &str = ".c9r";

/// Context for filename operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    pub encrypted_name: Option<String>,
    pub cleartext_name: Option<String>,
    pub dir_id: Option<String>,
}

impl NameContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_encrypted_name(mut self, name: impl Into<String>) -> Self {
        self.encrypted_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_cleartext_name(mut self, name: impl Into<String>) -> Self {
        self.cleartext_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_dir_id(mut self, dir_id: &DirId) -> Self {
        self.dir_id = Some(dir_id.as_str().to_string());
        self
    }
}

impl fmt::Display for NameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref name) = self.cleartext_name {
            parts.push(format!("filename '{name}'"));
        } else if let Some(ref enc_name) = self.encrypted_name {
            let display_name = match enc_name.char_indices().nth(37) {
                Some((cut, _)) if enc_name.len() > 40 => format!("{}...", &enc_name[..cut]),
                _ => enc_name.clone(),
            };
            parts.push(format!("encrypted name '{display_name}'"));
        }

        if let Some(ref dir_id) = self.dir_id {
            let display_id = if dir_id.is_empty() {
                "<root>".to_string()
            } else {
                match dir_id.char_indices().nth(12) {
                    Some((cut, _)) => format!("{}...", &dir_id[..cut]),
                    None => dir_id.clone(),
                }
            };
            parts.push(format!("in directory {display_id}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Errors that can occur during filename encryption/decryption.
///
/// Decryption failures are **integrity violations**: AES-SIV is authenticated,
/// so a failure means tampering, the wrong key, or the wrong parent directory.
#[derive(Error, Debug)]
pub enum NameError {
    #[error(
        "[INTEGRITY VIOLATION] Failed to decrypt {context}: authentication failed - possible tampering, wrong key, or filename moved between directories"
    )]
    DecryptionFailed { context: NameContext },

    /// The name is not `<base64url>.c9r`, optionally followed by a conflict marker.
    #[error("Not a ciphertext name: {context}")]
    NotCiphertext { context: NameContext },

    #[error("Invalid base64 encoding for {context}: {reason}")]
    Base64Decode { reason: String, context: NameContext },

    #[error("Invalid UTF-8 after decryption for {context}: {reason}")]
    Utf8Decode { reason: String, context: NameContext },

    #[error("Unexpected encryption failure for {context}")]
    EncryptionFailed { context: NameContext },

    #[error("Failed to hash directory ID '{dir_id}': encryption error")]
    DirIdHashFailed { dir_id: String },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// Name-encryption capability.
///
/// `encrypt` returns the complete ciphertext name including the `.c9r`
/// extension; `decrypt` accepts such a name, tolerating a trailing conflict
/// marker. The directory identity is bound in as associated data.
pub trait NameCryptor: Send + Sync {
    fn encrypt(&self, cleartext: &str, dir_id: &DirId) -> Result<String, NameError>;

    fn decrypt(&self, ciphertext: &str, dir_id: &DirId) -> Result<String, NameError>;

    /// Storage hash for a directory identity, 32 characters of BASE32.
    fn hash_dir_id(&self, dir_id: &DirId) -> Result<String, NameError>;
}

fn is_base64url_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=')
}

/// Extract the base64url body of a ciphertext name.
///
/// Accepts `BODY.c9r` and `BODY<conflict marker>.c9r`, where the marker starts
/// with a character outside the base64url alphabet (cloud sync tools append
/// things like `" (1)"` or `" (conflicted copy)"`). Anything before the body
/// is rejected.
pub fn ciphertext_body(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(ENCRYPTED_SUFFIX)?;
    let end = stem.find(|c| !is_base64url_char(c)).unwrap_or(stem.len());
    let body = &stem[..end];
    // Shortest valid SIV output is a 16-byte tag: 24 base64 characters.
    (body.len() >= 24).then_some(body)
}

/// AES-SIV name cryptor keyed by the vault master key.
#[derive(Clone)]
pub struct SivNameCryptor {
    master_key: Arc<MasterKey>,
}

impl fmt::Debug for SivNameCryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SivNameCryptor").finish_non_exhaustive()
    }
}

impl SivNameCryptor {
    pub fn new(master_key: Arc<MasterKey>) -> Self {
        Self { master_key }
    }
}

impl NameCryptor for SivNameCryptor {
    /// Names are normalized to NFC before encryption so that macOS (NFD) and
    /// other platforms agree on the ciphertext.
    fn encrypt(&self, cleartext: &str, dir_id: &DirId) -> Result<String, NameError> {
        let context = NameContext::new()
            .with_cleartext_name(cleartext)
            .with_dir_id(dir_id);
        let normalized: String = cleartext.nfc().collect();

        self.master_key.with_siv_key(|key| {
            let mut cipher = Aes256Siv::new(key);
            let associated_data: &[&[u8]] = &[dir_id.as_str().as_bytes()];
            let encrypted = cipher
                .encrypt(associated_data, normalized.as_bytes())
                .map_err(|_| NameError::EncryptionFailed { context })?;

            // Base64URL with padding, as written by the reference clients
            let mut name = general_purpose::URL_SAFE.encode(&encrypted);
            name.push_str(ENCRYPTED_SUFFIX);
            Ok(name)
        })?
    }

    fn decrypt(&self, ciphertext: &str, dir_id: &DirId) -> Result<String, NameError> {
        let context = NameContext::new()
            .with_encrypted_name(ciphertext)
            .with_dir_id(dir_id);

        let Some(body) = ciphertext_body(ciphertext) else {
            return Err(NameError::NotCiphertext { context });
        };

        // Padded first, unpadded for names written by other implementations
        let decoded = general_purpose::URL_SAFE
            .decode(body)
            .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(body))
            .map_err(|e| NameError::Base64Decode {
                reason: e.to_string(),
                context: context.clone(),
            })?;

        self.master_key.with_siv_key(|key| {
            let mut cipher = Aes256Siv::new(key);
            let associated_data: &[&[u8]] = &[dir_id.as_str().as_bytes()];
            let decrypted = cipher
                .decrypt(associated_data, &decoded)
                .map_err(|_| NameError::DecryptionFailed {
                    context: context.clone(),
                })?;

            String::from_utf8(decrypted).map_err(|e| NameError::Utf8Decode {
                reason: e.to_string(),
                context,
            })
        })?
    }

    /// AES-SIV over the id with no associated data, SHA-1, then BASE32.
    fn hash_dir_id(&self, dir_id: &DirId) -> Result<String, NameError> {
        self.master_key.with_siv_key(|key| {
            let mut cipher = Aes256Siv::new(key);
            let associated_data: &[&[u8]] = &[];
            let encrypted = cipher
                .encrypt(associated_data, dir_id.as_str().as_bytes())
                .map_err(|_| NameError::DirIdHashFailed {
                    dir_id: dir_id.as_str().to_string(),
                })?;

            let hashed = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &encrypted);
            Ok(BASE32.encode(hashed.as_ref()))
        })?
    }
}
