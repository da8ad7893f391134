//! One open filesystem per vault root.
//!
//! Roots are canonicalised before lookup, so different spellings of the same
//! directory share one instance. Opens of one root are serialised by a
//! per-root lock, so two concurrent opens observe the same instance. The map
//! itself is never locked while a vault is being unlocked.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::FsError;
use crate::provider::ProviderId;
use crate::provider::properties::CryptoFileSystemProperties;
use crate::vault::filesystem::{CryptoFileSystem, VaultFileSystem};

/// Opens filesystem instances for the registry.
pub trait FileSystemFactory: Send + Sync {
    fn open(
        &self,
        provider: ProviderId,
        vault_root: &Path,
        props: &CryptoFileSystemProperties,
        registry: Weak<FileSystemRegistry>,
    ) -> Result<Arc<dyn CryptoFileSystem>, FsError>;
}

/// Opens [`VaultFileSystem`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct VaultFileSystemFactory;

impl FileSystemFactory for VaultFileSystemFactory {
    fn open(
        &self,
        provider: ProviderId,
        vault_root: &Path,
        props: &CryptoFileSystemProperties,
        registry: Weak<FileSystemRegistry>,
    ) -> Result<Arc<dyn CryptoFileSystem>, FsError> {
        let fs: Arc<dyn CryptoFileSystem> =
            VaultFileSystem::open(provider, vault_root, props, registry)?;
        Ok(fs)
    }
}

/// Canonical form of a vault root; falls back to the path as given.
pub fn normalize_root(vault_root: &Path) -> PathBuf {
    vault_root
        .canonicalize()
        .unwrap_or_else(|_| vault_root.to_path_buf())
}

pub struct FileSystemRegistry {
    provider: ProviderId,
    factory: Arc<dyn FileSystemFactory>,
    filesystems: DashMap<PathBuf, Arc<dyn CryptoFileSystem>>,
    /// Per-root open locks. Kept for the registry's lifetime.
    opening: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl fmt::Debug for FileSystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemRegistry")
            .field("provider", &self.provider)
            .field("open", &self.filesystems.len())
            .finish_non_exhaustive()
    }
}

impl FileSystemRegistry {
    pub fn new(provider: ProviderId, factory: Arc<dyn FileSystemFactory>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            factory,
            filesystems: DashMap::new(),
            opening: DashMap::new(),
        })
    }

    fn open_instance(&self, key: &Path) -> Option<Arc<dyn CryptoFileSystem>> {
        self.filesystems
            .get(key)
            .map(|fs| Arc::clone(fs.value()))
            .filter(|fs| fs.is_open())
    }

    /// The instance for `vault_root`, opening it if none is open.
    pub fn create(
        self: &Arc<Self>,
        vault_root: &Path,
        props: &CryptoFileSystemProperties,
    ) -> Result<Arc<dyn CryptoFileSystem>, FsError> {
        let key = normalize_root(vault_root);
        if let Some(fs) = self.open_instance(&key) {
            trace!(vault = %key.display(), "Reusing open filesystem");
            return Ok(fs);
        }

        let slot = Arc::clone(self.opening.entry(key.clone()).or_default().value());
        let _guard = slot.lock();
        if let Some(fs) = self.open_instance(&key) {
            return Ok(fs);
        }
        let fs = self
            .factory
            .open(self.provider, &key, props, Arc::downgrade(self))?;
        debug!(vault = %key.display(), "Registered filesystem");
        self.filesystems.insert(key, Arc::clone(&fs));
        Ok(fs)
    }

    /// The open instance for `vault_root`, or `FileSystemNotFound`.
    pub fn get(&self, vault_root: &Path) -> Result<Arc<dyn CryptoFileSystem>, FsError> {
        let key = normalize_root(vault_root);
        self.filesystems
            .get(&key)
            .map(|fs| Arc::clone(fs.value()))
            .ok_or(FsError::FileSystemNotFound { path: key })
    }

    pub fn contains(&self, vault_root: &Path) -> bool {
        self.filesystems.contains_key(&normalize_root(vault_root))
    }

    /// Drop the slot for `vault_root` if it still holds `fs`.
    pub fn remove_if_same(&self, vault_root: &Path, fs: &dyn CryptoFileSystem) {
        let key = normalize_root(vault_root);
        let removed = self.filesystems.remove_if(&key, |_, existing| {
            std::ptr::addr_eq(Arc::as_ptr(existing), std::ptr::from_ref(fs))
        });
        if removed.is_some() {
            debug!(vault = %key.display(), "Unregistered filesystem");
        }
    }

    pub fn len(&self) -> usize {
        self.filesystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filesystems.is_empty()
    }
}
