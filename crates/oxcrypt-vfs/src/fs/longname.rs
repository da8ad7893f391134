//! Shortening of over-length ciphertext names.
//!
//! A ciphertext name longer than the vault's shortening threshold is replaced
//! on disk by `base64url(SHA1(name)) + ".c9s"`. The original name is stored in
//! a mapping file under `m/` addressed purely by that token, so the same long
//! name always shortens to the same token and the mapping is found without
//! any other context.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use base64::{Engine as _, engine::general_purpose};
use moka::sync::Cache;
use ring::digest;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

/// Marker extension of shortened names.
pub const SHORTENED_SUFFIX: &str = ".c9s";

/// Directory below the vault root holding long-name mappings.
pub const METADATA_DIR: &str = "m";

const DEFAULT_CACHE_CAPACITY: u64 = 5_000;

/// Failure to shorten or inflate a name. Always I/O-class.
#[derive(Error, Debug)]
pub enum LongNameError {
    #[error("No long name mapping for {token}")]
    NotFound { token: String },

    #[error("Long name mapping for {token} is corrupt: {reason}")]
    Corrupt { token: String, reason: String },

    #[error("Not a shortened name: {name}")]
    NotShortened { name: String },

    #[error("IO error on long name mapping {token}: {source}")]
    Io {
        #[source]
        source: io::Error,
        token: String,
    },
}

impl LongNameError {
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            LongNameError::NotFound { .. } => io::ErrorKind::NotFound,
            LongNameError::Corrupt { .. } => io::ErrorKind::InvalidData,
            LongNameError::NotShortened { .. } => io::ErrorKind::InvalidInput,
            LongNameError::Io { source, .. } => source.kind(),
        }
    }
}

impl From<LongNameError> for io::Error {
    fn from(err: LongNameError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// Long-name persistence capability.
pub trait LongNameStore: Send + Sync {
    /// Whether `name` is long enough that it must be shortened.
    fn needs_shortening(&self, name: &str) -> bool;

    /// The shortened name `name` would get. Pure; nothing is persisted.
    fn shortened_name(&self, name: &str) -> String {
        shortened_name(name)
    }

    /// Persist the mapping for `original` and return its shortened name.
    ///
    /// Idempotent: the same original always yields the same token and a
    /// single mapping.
    fn shorten(&self, original: &str) -> Result<String, LongNameError>;

    /// Recover the original name behind a shortened name.
    fn inflate(&self, shortened: &str) -> Result<String, LongNameError>;

    /// Drop the mapping once the entry it shortens is gone.
    fn remove(&self, shortened: &str) -> Result<(), LongNameError>;
}

pub fn is_shortened(name: &str) -> bool {
    name.ends_with(SHORTENED_SUFFIX)
}

/// `base64url(SHA1(original)) + ".c9s"`, 32 characters.
pub fn shortened_name(original: &str) -> String {
    let hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, original.as_bytes());
    let mut name = general_purpose::URL_SAFE.encode(hash.as_ref());
    name.push_str(SHORTENED_SUFFIX);
    name
}

/// Mappings stored as files at `m/<t[0..2]>/<t[2..4]>/<token>.c9s`.
pub struct FsLongNameStore {
    metadata_root: PathBuf,
    threshold: usize,
    cache: Cache<String, String>,
}

impl std::fmt::Debug for FsLongNameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsLongNameStore")
            .field("metadata_root", &self.metadata_root)
            .field("threshold", &self.threshold)
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

impl FsLongNameStore {
    pub fn new(vault_root: &Path, threshold: usize) -> Self {
        Self::with_cache_capacity(vault_root, threshold, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(vault_root: &Path, threshold: usize, capacity: u64) -> Self {
        Self {
            metadata_root: vault_root.join(METADATA_DIR),
            threshold,
            cache: Cache::new(capacity),
        }
    }

    fn mapping_path(&self, shortened: &str) -> PathBuf {
        // Tokens are ASCII, so byte slicing is safe
        self.metadata_root
            .join(&shortened[0..2])
            .join(&shortened[2..4])
            .join(shortened)
    }

    fn check_token<'a>(&self, shortened: &'a str) -> Result<&'a str, LongNameError> {
        if is_shortened(shortened) && shortened.len() > 4 && shortened.is_ascii() {
            Ok(shortened)
        } else {
            Err(LongNameError::NotShortened {
                name: shortened.to_string(),
            })
        }
    }

    fn write_mapping(&self, token: &str, original: &str) -> Result<(), LongNameError> {
        let io_err = |source| LongNameError::Io {
            source,
            token: token.to_string(),
        };
        let path = self.mapping_path(token);
        if path.is_file() {
            return Ok(());
        }
        let parent = path.parent().unwrap_or(&self.metadata_root);
        fs::create_dir_all(parent).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
        io::Write::write_all(&mut tmp, original.as_bytes()).map_err(io_err)?;
        // Concurrent writers race with identical content; last rename wins.
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        debug!(token, "Persisted long name mapping");
        Ok(())
    }
}

impl LongNameStore for FsLongNameStore {
    fn needs_shortening(&self, name: &str) -> bool {
        name.len() > self.threshold
    }

    #[instrument(level = "trace", skip(self, original), fields(len = original.len()))]
    fn shorten(&self, original: &str) -> Result<String, LongNameError> {
        let token = shortened_name(original);
        if self.cache.contains_key(&token) {
            trace!(token = %token, "Long name mapping cached");
            return Ok(token);
        }
        self.write_mapping(&token, original)?;
        self.cache.insert(token.clone(), original.to_string());
        Ok(token)
    }

    #[instrument(level = "trace", skip(self))]
    fn inflate(&self, shortened: &str) -> Result<String, LongNameError> {
        let token = self.check_token(shortened)?;
        if let Some(original) = self.cache.get(token) {
            return Ok(original);
        }

        let path = self.mapping_path(token);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LongNameError::NotFound {
                    token: token.to_string(),
                });
            }
            Err(source) => {
                return Err(LongNameError::Io {
                    source,
                    token: token.to_string(),
                });
            }
        };

        let original = String::from_utf8(bytes).map_err(|e| LongNameError::Corrupt {
            token: token.to_string(),
            reason: e.to_string(),
        })?;
        if shortened_name(&original) != token {
            warn!(token, "Long name mapping does not hash to its token");
            return Err(LongNameError::Corrupt {
                token: token.to_string(),
                reason: "content does not match token".to_string(),
            });
        }

        self.cache.insert(token.to_string(), original.clone());
        Ok(original)
    }

    fn remove(&self, shortened: &str) -> Result<(), LongNameError> {
        let token = self.check_token(shortened)?;
        self.cache.invalidate(token);
        match fs::remove_file(self.mapping_path(token)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LongNameError::Io {
                source,
                token: token.to_string(),
            }),
        }
    }
}
