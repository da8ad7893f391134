//! Logical directory paths to physical storage.
//!
//! A directory's children live in a storage directory derived from its
//! [`DirId`] (`d/XX/YYYY...`), not from its name chain. The directory's own
//! entry under its parent is `{encrypted name}.c9r/dir.c9r` holding the ID.
//! Renaming a directory therefore only moves that entry.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use moka::sync::Cache;
use tracing::{debug, instrument, trace, warn};

use crate::error::FsError;
use crate::fs::longname::{LongNameError, LongNameStore};
use crate::fs::name::{NameCryptor, NameError};
use crate::vault::path::DirId;

/// File inside a directory entry that holds the directory's ID.
pub const DIR_MARKER: &str = "dir.c9r";

/// Top-level folder of all storage directories.
pub const DATA_DIR: &str = "d";

const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Storage directory of `dir_id`: `{vault}/d/{hash[0..2]}/{hash[2..32]}`.
pub fn storage_path(
    vault_root: &Path,
    names: &dyn NameCryptor,
    dir_id: &DirId,
) -> Result<PathBuf, NameError> {
    let hashed = names.hash_dir_id(dir_id)?;
    if hashed.len() < 32 || !hashed.is_ascii() {
        return Err(NameError::DirIdHashFailed {
            dir_id: dir_id.as_str().to_string(),
        });
    }
    Ok(vault_root
        .join(DATA_DIR)
        .join(&hashed[0..2])
        .join(&hashed[2..32]))
}

/// A resolved directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub dir_id: DirId,
    /// Physical folder holding the directory's children.
    pub path: PathBuf,
}

/// Physical location of one named child of a directory.
#[derive(Debug, Clone)]
pub struct CiphertextEntry {
    pub parent: Directory,
    pub cleartext_name: String,
    /// Full ciphertext name, `.c9r` included.
    pub ciphertext_name: String,
    /// Name on disk; the shortened token for over-length names.
    pub physical_name: String,
    pub path: PathBuf,
}

impl CiphertextEntry {
    pub fn is_shortened(&self) -> bool {
        self.physical_name != self.ciphertext_name
    }

    pub fn dir_marker(&self) -> PathBuf {
        self.path.join(DIR_MARKER)
    }
}

/// Directory resolution capability.
///
/// Paths are given as cleartext name segments from the vault root.
pub trait DirectoryMapper: Send + Sync {
    /// Fails with `NotFound` when any segment is not a directory.
    fn resolve(&self, names: &[String]) -> Result<Directory, FsError>;

    /// Assign a fresh [`DirId`] and create the directory.
    ///
    /// Fails with `AlreadyExists` when an entry with that name exists.
    fn create(&self, names: &[String]) -> Result<Directory, FsError>;

    /// Locate the entry for the last segment. The entry need not exist.
    fn entry(&self, names: &[String]) -> Result<CiphertextEntry, FsError>;

    /// Directory behind an existing directory entry.
    fn directory_of(&self, entry: &CiphertextEntry) -> Result<Directory, FsError>;

    /// Forget cached resolutions after a move or delete.
    fn invalidate_all(&self);
}

fn display(names: &[String]) -> String {
    format!("/{}", names.join("/"))
}

/// [`DirectoryMapper`] backed by the vault's storage tree.
pub struct CryptoPathMapper {
    vault_root: PathBuf,
    names: Arc<dyn NameCryptor>,
    long_names: Arc<dyn LongNameStore>,
    cache: Cache<String, Directory>,
    /// Bumped by every `invalidate_all`.
    generation: AtomicU64,
}

impl fmt::Debug for CryptoPathMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoPathMapper")
            .field("vault_root", &self.vault_root)
            .field("cached", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl CryptoPathMapper {
    pub fn new(
        vault_root: &Path,
        names: Arc<dyn NameCryptor>,
        long_names: Arc<dyn LongNameStore>,
    ) -> Self {
        Self {
            vault_root: vault_root.to_path_buf(),
            names,
            long_names,
            cache: Cache::new(DEFAULT_CACHE_CAPACITY),
            generation: AtomicU64::new(0),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cache a resolution read while the cache was at `generation`.
    ///
    /// Dropped when an invalidation happened since, as the disk state it was
    /// read from may already be gone.
    fn remember(&self, key: String, directory: Directory, generation: u64) {
        if self.generation() != generation {
            trace!(path = %key, "Skipping stale cache insert");
            return;
        }
        self.cache.insert(key.clone(), directory);
        if self.generation() != generation {
            self.cache.invalidate(&key);
        }
    }

    fn root(&self) -> Result<Directory, FsError> {
        let dir_id = DirId::root();
        let path = storage_path(&self.vault_root, self.names.as_ref(), &dir_id)?;
        Ok(Directory { dir_id, path })
    }

    /// Locate `name` inside `parent`.
    ///
    /// An existing shortened entry must have a mapping that inflates back to
    /// the expected ciphertext name.
    pub fn child_entry(&self, parent: &Directory, name: &str) -> Result<CiphertextEntry, FsError> {
        let ciphertext_name = self.names.encrypt(name, &parent.dir_id)?;
        let physical_name = if self.long_names.needs_shortening(&ciphertext_name) {
            self.long_names.shortened_name(&ciphertext_name)
        } else {
            ciphertext_name.clone()
        };
        let path = parent.path.join(&physical_name);

        if physical_name != ciphertext_name && path.exists() {
            let original = self.long_names.inflate(&physical_name)?;
            if original != ciphertext_name {
                return Err(FsError::Inflate(LongNameError::Corrupt {
                    token: physical_name,
                    reason: "mapping belongs to a different name".to_string(),
                }));
            }
        }

        Ok(CiphertextEntry {
            parent: parent.clone(),
            cleartext_name: name.to_string(),
            ciphertext_name,
            physical_name,
            path,
        })
    }

    /// Fill a freshly created entry: long-name mapping, ID marker, storage.
    fn populate(
        &self,
        entry: &CiphertextEntry,
        dir_id: &DirId,
        label: &str,
    ) -> Result<PathBuf, FsError> {
        if entry.is_shortened() {
            self.long_names.shorten(&entry.ciphertext_name)?;
        }
        fs::write(entry.dir_marker(), dir_id.as_str()).map_err(|e| FsError::io(e, label))?;
        let path = storage_path(&self.vault_root, self.names.as_ref(), dir_id)?;
        fs::create_dir_all(&path).map_err(|e| FsError::io(e, label))?;
        Ok(path)
    }

    /// Undo a failed `populate`. Best effort; the first error is what the
    /// caller reports.
    fn roll_back(&self, entry: &CiphertextEntry, dir_id: &DirId) {
        if let Ok(path) = storage_path(&self.vault_root, self.names.as_ref(), dir_id)
            && let Err(err) = fs::remove_dir(&path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %err, "Failed to roll back storage directory");
        }
        if let Err(err) = fs::remove_dir_all(&entry.path) {
            warn!(path = %entry.path.display(), error = %err, "Failed to roll back directory entry");
        }
        if entry.is_shortened()
            && let Err(err) = self.long_names.remove(&entry.physical_name)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(token = %entry.physical_name, error = %err, "Failed to roll back long name mapping");
        }
    }

    fn read_dir_id(&self, marker: &Path, label: &str) -> Result<DirId, FsError> {
        match fs::read_to_string(marker) {
            Ok(id) => Ok(DirId::from_raw(id.trim())),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                Err(FsError::not_found(label))
            }
            Err(e) => Err(FsError::io(e, label)),
        }
    }
}

impl DirectoryMapper for CryptoPathMapper {
    #[instrument(level = "trace", skip(self))]
    fn resolve(&self, names: &[String]) -> Result<Directory, FsError> {
        let generation = self.generation();
        let mut current = self.root()?;
        for depth in 1..=names.len() {
            let prefix = &names[..depth];
            let key = display(prefix);
            if let Some(cached) = self.cache.get(&key) {
                current = cached;
                continue;
            }
            let entry = self.child_entry(&current, &names[depth - 1])?;
            current = self.directory_of(&entry).map_err(|e| match e {
                FsError::NotFound { .. } => FsError::not_found(display(names)),
                other => other,
            })?;
            self.remember(key, current.clone(), generation);
        }
        Ok(current)
    }

    #[instrument(level = "debug", skip(self))]
    fn create(&self, names: &[String]) -> Result<Directory, FsError> {
        let Some((name, parent_names)) = names.split_last() else {
            return Err(FsError::already_exists("/"));
        };
        let label = display(names);
        let generation = self.generation();
        let parent = self.resolve(parent_names)?;
        let entry = self.child_entry(&parent, name)?;

        // create_dir is the atomic existence check
        fs::create_dir(&entry.path).map_err(|e| FsError::io(e, &label))?;
        let dir_id = DirId::generate();
        let path = match self.populate(&entry, &dir_id, &label) {
            Ok(path) => path,
            Err(err) => {
                self.roll_back(&entry, &dir_id);
                return Err(err);
            }
        };

        debug!(path = %label, dir_id = %dir_id, "Created directory");
        let directory = Directory { dir_id, path };
        self.remember(label, directory.clone(), generation);
        Ok(directory)
    }

    fn entry(&self, names: &[String]) -> Result<CiphertextEntry, FsError> {
        let Some((name, parent_names)) = names.split_last() else {
            return Err(FsError::InvalidArgument(
                "the root directory has no entry".to_string(),
            ));
        };
        let parent = self.resolve(parent_names)?;
        self.child_entry(&parent, name)
    }

    fn directory_of(&self, entry: &CiphertextEntry) -> Result<Directory, FsError> {
        let dir_id = self.read_dir_id(&entry.dir_marker(), &entry.cleartext_name)?;
        let path = storage_path(&self.vault_root, self.names.as_ref(), &dir_id)?;
        trace!(name = %entry.cleartext_name, dir_id = %dir_id, "Resolved directory entry");
        Ok(Directory { dir_id, path })
    }

    fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }
}
