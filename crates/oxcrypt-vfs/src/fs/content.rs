//! File content encryption (AES-GCM, 32 KiB chunks).
//!
//! Layout: a 68-byte header (12-byte nonce, AES-GCM of `0xFF * 8 || content key`
//! under the master AES key, 16-byte tag) followed by chunks of
//! `nonce(12) || ciphertext || tag(16)`. Each chunk's AAD is its chunk number
//! (u64 BE) followed by the header nonce, which pins chunks to their position
//! and their file.

use std::fmt;

use aead::Payload;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::keys::{KeyAccessError, MasterKey};

pub const HEADER_SIZE: usize = 68;
pub const CHUNK_CLEARTEXT_SIZE: usize = 32 * 1024;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
const CHUNK_CIPHERTEXT_SIZE: usize = CHUNK_CLEARTEXT_SIZE + CHUNK_OVERHEAD;

#[derive(Error, Debug)]
pub enum ContentError {
    /// **[INTEGRITY VIOLATION]** Header tag mismatch.
    #[error(
        "Failed to decrypt file header: invalid authentication tag - possible tampering or wrong key"
    )]
    HeaderDecryption,

    /// **[INTEGRITY VIOLATION]** Chunk tag mismatch.
    #[error(
        "Failed to decrypt chunk {chunk}: invalid authentication tag - possible tampering or wrong key"
    )]
    ChunkDecryption { chunk: usize },

    #[error("Invalid file header: {reason}")]
    InvalidHeader { reason: String },

    #[error("Incomplete chunk {chunk}: expected at least 28 bytes, got {actual_size}")]
    IncompleteChunk { chunk: usize, actual_size: usize },

    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// Decrypted file header.
pub struct FileHeader {
    pub nonce: [u8; NONCE_SIZE],
    pub content_key: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHeader")
            .field("nonce", &hex::encode(self.nonce))
            .field("content_key", &"[REDACTED]")
            .finish()
    }
}

impl FileHeader {
    /// A header with a fresh random nonce and content key.
    pub fn generate() -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        let mut content_key = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut nonce);
        rand::rng().fill_bytes(&mut content_key[..]);
        Self { nonce, content_key }
    }
}

pub fn encrypt_header(header: &FileHeader, master_key: &MasterKey) -> Result<Vec<u8>, ContentError> {
    master_key.with_aes_key(|aes_key| {
        let key: &Key<Aes256Gcm> = aes_key.into();
        let cipher = Aes256Gcm::new(key);

        let mut plaintext = Zeroizing::new(vec![0xFF; 8]);
        plaintext.extend_from_slice(&header.content_key[..]);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&header.nonce), plaintext.as_slice())
            .map_err(|e| ContentError::Encryption {
                reason: e.to_string(),
            })?;

        let mut encrypted = Vec::with_capacity(HEADER_SIZE);
        encrypted.extend_from_slice(&header.nonce);
        encrypted.extend_from_slice(&ciphertext);
        Ok(encrypted)
    })?
}

pub fn decrypt_header(encrypted: &[u8], master_key: &MasterKey) -> Result<FileHeader, ContentError> {
    if encrypted.len() != HEADER_SIZE {
        warn!(actual_size = encrypted.len(), "Invalid header size");
        return Err(ContentError::InvalidHeader {
            reason: format!("expected {HEADER_SIZE} bytes, got {}", encrypted.len()),
        });
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&encrypted[..NONCE_SIZE]);

    master_key.with_aes_key(|aes_key| {
        let key: &Key<Aes256Gcm> = aes_key.into();
        let cipher = Aes256Gcm::new(key);

        let decrypted = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), &encrypted[NONCE_SIZE..])
                .map_err(|_| {
                    warn!("Header decryption failed - authentication tag mismatch");
                    ContentError::HeaderDecryption
                })?,
        );

        if decrypted.len() != 40 {
            return Err(ContentError::InvalidHeader {
                reason: format!("payload is {} bytes, expected 40", decrypted.len()),
            });
        }
        // Reserved bytes are not validated, for forward compatibility
        if decrypted[..8] != [0xFF; 8] {
            debug!("Header has non-standard reserved bytes");
        }

        let mut content_key = Zeroizing::new([0u8; 32]);
        content_key.copy_from_slice(&decrypted[8..40]);
        Ok(FileHeader { nonce, content_key })
    })?
}

fn chunk_aad(chunk_number: usize, header_nonce: &[u8; NONCE_SIZE]) -> [u8; 20] {
    let mut aad = [0u8; 20];
    aad[..8].copy_from_slice(&(chunk_number as u64).to_be_bytes());
    aad[8..].copy_from_slice(header_nonce);
    aad
}

/// Encrypt a whole file: header plus chunks. Empty content still gets one chunk.
#[instrument(level = "debug", skip_all, fields(size = content.len()))]
pub fn encrypt_content(content: &[u8], master_key: &MasterKey) -> Result<Vec<u8>, ContentError> {
    let header = FileHeader::generate();
    let mut out = encrypt_header(&header, master_key)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&header.content_key[..]));
    let chunks: Vec<&[u8]> = if content.is_empty() {
        vec![content]
    } else {
        content.chunks(CHUNK_CLEARTEXT_SIZE).collect()
    };
    out.reserve(content.len() + chunks.len() * CHUNK_OVERHEAD);

    for (chunk_number, chunk) in chunks.into_iter().enumerate() {
        let mut chunk_nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut chunk_nonce);
        let aad = chunk_aad(chunk_number, &header.nonce);

        let encrypted = cipher
            .encrypt(
                Nonce::from_slice(&chunk_nonce),
                Payload {
                    msg: chunk,
                    aad: &aad,
                },
            )
            .map_err(|e| ContentError::Encryption {
                reason: e.to_string(),
            })?;

        out.extend_from_slice(&chunk_nonce);
        out.extend_from_slice(&encrypted);
    }

    Ok(out)
}

/// Decrypt a whole file produced by [`encrypt_content`].
#[instrument(level = "debug", skip_all, fields(size = data.len()))]
pub fn decrypt_content(data: &[u8], master_key: &MasterKey) -> Result<Vec<u8>, ContentError> {
    if data.len() < HEADER_SIZE {
        return Err(ContentError::InvalidHeader {
            reason: format!("file is only {} bytes", data.len()),
        });
    }
    let header = decrypt_header(&data[..HEADER_SIZE], master_key)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&header.content_key[..]));

    let body = &data[HEADER_SIZE..];
    let mut cleartext = Vec::with_capacity(cleartext_size(data.len() as u64) as usize);

    for (chunk_number, chunk) in body.chunks(CHUNK_CIPHERTEXT_SIZE).enumerate() {
        if chunk.len() < CHUNK_OVERHEAD {
            warn!(chunk = chunk_number, actual_size = chunk.len(), "Incomplete chunk");
            return Err(ContentError::IncompleteChunk {
                chunk: chunk_number,
                actual_size: chunk.len(),
            });
        }
        let aad = chunk_aad(chunk_number, &header.nonce);

        let decrypted = cipher
            .decrypt(
                Nonce::from_slice(&chunk[..NONCE_SIZE]),
                Payload {
                    msg: &chunk[NONCE_SIZE..],
                    aad: &aad,
                },
            )
            .map_err(|_| {
                warn!(chunk = chunk_number, "Chunk decryption failed - authentication tag mismatch");
                ContentError::ChunkDecryption {
                    chunk: chunk_number,
                }
            })?;
        trace!(chunk = chunk_number, size = decrypted.len(), "Chunk decrypted");
        cleartext.extend_from_slice(&decrypted);
    }

    Ok(cleartext)
}

/// Cleartext length of a ciphertext file of `ciphertext_len` bytes.
///
/// Malformed lengths (a trailing partial chunk shorter than its overhead)
/// count only the complete chunks.
pub fn cleartext_size(ciphertext_len: u64) -> u64 {
    let Some(body) = ciphertext_len.checked_sub(HEADER_SIZE as u64) else {
        return 0;
    };
    let full = body / CHUNK_CIPHERTEXT_SIZE as u64;
    let rest = body % CHUNK_CIPHERTEXT_SIZE as u64;
    let partial = rest.saturating_sub(CHUNK_OVERHEAD as u64);
    full * CHUNK_CLEARTEXT_SIZE as u64 + partial
}
