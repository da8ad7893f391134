//! Entry point for vault filesystems.
//!
//! [`CryptoFileSystemProvider`] checks that every path it is handed belongs to
//! one of its own filesystems, then delegates to that filesystem.

pub mod properties;
pub mod uri;

use std::{
    collections::BTreeMap,
    fmt,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, instrument};
use url::Url;

use crate::crypto::keys::MasterKey;
use crate::error::FsError;
use crate::fs::channel::{FileChannel, OpenOptions};
use crate::fs::name::SivNameCryptor;
use crate::fs::stream::{CryptoDirectoryStream, EntryFilter};
use crate::vault::attributes::{
    AccessMode, AttributeValue, BasicFileAttributeView, BasicFileAttributes, CopyOption, FileStore,
};
use crate::vault::config::{DEFAULT_SHORTENING_THRESHOLD, VaultInit, initialize_vault};
use crate::vault::filesystem::CryptoFileSystem;
use crate::vault::master_key::default_scrypt_cost_log2;
use crate::vault::path::CryptoPath;
use crate::vault::registry::{FileSystemFactory, FileSystemRegistry, VaultFileSystemFactory};

#[cfg(feature = "async")]
use crate::fs::{async_channel::AsyncDelegatingFileChannel, channel::OpenOption};
#[cfg(feature = "async")]
use tokio::runtime::Handle;

use properties::CryptoFileSystemProperties;

/// URI scheme of vault filesystems.
pub const SCHEME: &str = "cryptomator";

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(u64);

impl ProviderId {
    /// A fresh, process-unique identity.
    pub fn next() -> Self {
        ProviderId(NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider-{}", self.0)
    }
}

pub struct CryptoFileSystemProvider {
    id: ProviderId,
    registry: Arc<FileSystemRegistry>,
    #[cfg(feature = "async")]
    default_executor: Option<Handle>,
}

impl fmt::Debug for CryptoFileSystemProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoFileSystemProvider")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Default for CryptoFileSystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoFileSystemProvider {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(VaultFileSystemFactory))
    }

    /// A provider whose filesystems are opened by `factory`.
    pub fn with_factory(factory: Arc<dyn FileSystemFactory>) -> Self {
        let id = ProviderId::next();
        Self {
            id,
            registry: FileSystemRegistry::new(id, factory),
            #[cfg(feature = "async")]
            default_executor: None,
        }
    }

    /// Executor used by async channels when the caller supplies none.
    #[cfg(feature = "async")]
    #[must_use]
    pub fn with_default_executor(mut self, executor: Handle) -> Self {
        self.default_executor = Some(executor);
        self
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn scheme(&self) -> &'static str {
        SCHEME
    }

    pub fn registry(&self) -> &Arc<FileSystemRegistry> {
        &self.registry
    }

    /// Create an empty vault at `vault_root` with a fresh master key.
    #[instrument(level = "info", skip(props))]
    pub fn initialize_vault(
        vault_root: &Path,
        props: &CryptoFileSystemProperties,
    ) -> Result<(), FsError> {
        let master_key = Arc::new(MasterKey::random());
        let names = SivNameCryptor::new(Arc::clone(&master_key));
        let init = VaultInit {
            config_filename: props.vault_config_filename(),
            masterkey_filename: props.masterkey_filename(),
            shortening_threshold: props
                .shortening_threshold()
                .unwrap_or(DEFAULT_SHORTENING_THRESHOLD),
            scrypt_cost_log2: default_scrypt_cost_log2(),
        };
        let result = initialize_vault(vault_root, props.passphrase(), &master_key, &names, &init);
        master_key.destroy();
        result?;
        debug!(vault = %vault_root.display(), "Vault created");
        Ok(())
    }

    fn check_owned<'p>(&self, path: &'p CryptoPath) -> Result<&'p Arc<dyn CryptoFileSystem>, FsError> {
        let fs = path.file_system();
        if fs.provider_id() == self.id {
            Ok(fs)
        } else {
            Err(FsError::ProviderMismatch {
                path: path.to_string(),
            })
        }
    }

    // ========================================================================
    // Filesystems
    // ========================================================================

    /// Open (or return the already open) filesystem addressed by `uri`.
    pub fn new_file_system(
        &self,
        uri: &Url,
        props: &CryptoFileSystemProperties,
    ) -> Result<Arc<dyn CryptoFileSystem>, FsError> {
        let (vault_root, _) = uri::parse_uri(uri)?;
        self.registry.create(&vault_root, props)
    }

    /// Open (or return the already open) filesystem of `vault_root`.
    pub fn new_file_system_at(
        &self,
        vault_root: &Path,
        props: &CryptoFileSystemProperties,
    ) -> Result<Arc<dyn CryptoFileSystem>, FsError> {
        self.registry.create(vault_root, props)
    }

    pub fn get_file_system(&self, uri: &Url) -> Result<Arc<dyn CryptoFileSystem>, FsError> {
        let (vault_root, _) = uri::parse_uri(uri)?;
        self.registry.get(&vault_root)
    }

    /// Path named by `uri` on its already open filesystem.
    pub fn get_path(&self, uri: &Url) -> Result<CryptoPath, FsError> {
        let (vault_root, internal) = uri::parse_uri(uri)?;
        let fs = self.registry.get(&vault_root)?;
        Ok(CryptoPath::new(fs, &internal))
    }

    // ========================================================================
    // Directories
    // ========================================================================

    pub fn new_directory_stream(
        &self,
        dir: &CryptoPath,
        filter: EntryFilter,
    ) -> Result<CryptoDirectoryStream, FsError> {
        self.check_owned(dir)?.new_directory_stream(dir, filter)
    }

    pub fn create_directory(&self, dir: &CryptoPath) -> Result<(), FsError> {
        self.check_owned(dir)?.create_directory(dir)
    }

    pub fn delete(&self, path: &CryptoPath) -> Result<(), FsError> {
        self.check_owned(path)?.delete(path)
    }

    /// Like [`delete`](Self::delete), but a missing path is not an error.
    pub fn delete_if_exists(&self, path: &CryptoPath) -> Result<bool, FsError> {
        match self.check_owned(path)?.delete(path) {
            Ok(()) => Ok(true),
            Err(FsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn copy(
        &self,
        source: &CryptoPath,
        target: &CryptoPath,
        options: &[CopyOption],
    ) -> Result<(), FsError> {
        let fs = self.check_owned(source)?;
        self.check_owned(target)?;
        if !source.same_file_system(target) {
            return Err(FsError::Unsupported(
                "copy between vault filesystems".to_string(),
            ));
        }
        fs.copy(source, target, options)
    }

    pub fn move_path(
        &self,
        source: &CryptoPath,
        target: &CryptoPath,
        options: &[CopyOption],
    ) -> Result<(), FsError> {
        let fs = self.check_owned(source)?;
        self.check_owned(target)?;
        if !source.same_file_system(target) {
            return Err(FsError::Unsupported(
                "move between vault filesystems".to_string(),
            ));
        }
        fs.move_path(source, target, options)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// False across filesystems, whoever owns them; otherwise canonical-path equality.
    pub fn is_same_file(&self, a: &CryptoPath, b: &CryptoPath) -> Result<bool, FsError> {
        if !a.same_file_system(b) {
            return Ok(false);
        }
        self.check_owned(a)?;
        Ok(a.to_real_path() == b.to_real_path())
    }

    pub fn is_hidden(&self, path: &CryptoPath) -> Result<bool, FsError> {
        self.check_owned(path)?.is_hidden(path)
    }

    pub fn exists(&self, path: &CryptoPath) -> Result<bool, FsError> {
        match self.check_owned(path)?.check_access(path, &[]) {
            Ok(()) => Ok(true),
            Err(FsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get_file_store(&self, path: &CryptoPath) -> Result<FileStore, FsError> {
        self.check_owned(path)?.file_store(path)
    }

    pub fn check_access(&self, path: &CryptoPath, modes: &[AccessMode]) -> Result<(), FsError> {
        self.check_owned(path)?.check_access(path, modes)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn get_file_attribute_view(
        &self,
        path: &CryptoPath,
    ) -> Result<BasicFileAttributeView, FsError> {
        self.check_owned(path)?.file_attribute_view(path)
    }

    pub fn read_attributes(&self, path: &CryptoPath) -> Result<BasicFileAttributes, FsError> {
        self.check_owned(path)?.read_attributes(path)
    }

    pub fn read_attributes_named(
        &self,
        path: &CryptoPath,
        attributes: &str,
    ) -> Result<BTreeMap<String, AttributeValue>, FsError> {
        self.check_owned(path)?
            .read_attributes_named(path, attributes)
    }

    pub fn set_attribute(
        &self,
        path: &CryptoPath,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<(), FsError> {
        self.check_owned(path)?
            .set_attribute(path, attribute, value)
    }

    // ========================================================================
    // Channels
    // ========================================================================

    pub fn new_file_channel(
        &self,
        path: &CryptoPath,
        options: &OpenOptions,
    ) -> Result<Box<dyn FileChannel>, FsError> {
        self.check_owned(path)?.new_file_channel(path, options)
    }

    pub fn new_byte_channel(
        &self,
        path: &CryptoPath,
        options: &OpenOptions,
    ) -> Result<Box<dyn FileChannel>, FsError> {
        self.check_owned(path)?.new_file_channel(path, options)
    }

    /// Async channel on `executor`, the provider default, or the current runtime.
    ///
    /// `Append` is always rejected with `InvalidArgument`.
    #[cfg(feature = "async")]
    pub fn new_async_file_channel(
        &self,
        path: &CryptoPath,
        options: &OpenOptions,
        executor: Option<Handle>,
    ) -> Result<AsyncDelegatingFileChannel, FsError> {
        if options.contains(OpenOption::Append) {
            return Err(FsError::InvalidArgument(
                "APPEND is not supported for async channels".to_string(),
            ));
        }
        let fs = self.check_owned(path)?;
        let executor = executor
            .or_else(|| self.default_executor.clone())
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| FsError::InvalidArgument("no executor available".to_string()))?;
        let channel = fs.new_file_channel(path, options)?;
        Ok(AsyncDelegatingFileChannel::new(channel, executor))
    }
}
