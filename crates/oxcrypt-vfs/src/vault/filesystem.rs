//! The per-vault filesystem.
//!
//! [`CryptoFileSystem`] is the surface the provider delegates to.
//! [`VaultFileSystem`] implements it over an unlocked vault directory.

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::SystemTime,
};

use tracing::{debug, info, instrument, warn};

use crate::crypto::keys::MasterKey;
use crate::error::FsError;
use crate::fs::channel::{CleartextFileChannel, FileChannel, OpenOption, OpenOptions};
use crate::fs::content::cleartext_size;
use crate::fs::longname::{FsLongNameStore, LongNameStore};
use crate::fs::name::{NameCryptor, SivNameCryptor};
use crate::fs::stream::{CryptoDirectoryStream, EntryFilter, ReadDirStream};
use crate::provider::ProviderId;
use crate::provider::properties::CryptoFileSystemProperties;
use crate::vault::attributes::{
    AccessMode, AttributeValue, BasicFileAttributeView, BasicFileAttributes, CopyOption,
    EntryKind, FileStore, LAST_ACCESS_TIME, LAST_MODIFIED_TIME, split_view,
};
use crate::vault::config::{PassphraseLoader, VaultConfig, load_vault};
use crate::vault::mapper::{CiphertextEntry, CryptoPathMapper, Directory, DirectoryMapper};
use crate::vault::path::CryptoPath;
use crate::vault::registry::FileSystemRegistry;

/// Operations of one open vault filesystem.
///
/// Paths passed in are assumed to belong to this filesystem; ownership is
/// checked by the provider.
pub trait CryptoFileSystem: Send + Sync + fmt::Debug {
    fn provider_id(&self) -> ProviderId;

    /// Canonical vault root this instance is registered under.
    fn vault_root(&self) -> &Path;

    fn is_open(&self) -> bool;

    fn is_read_only(&self) -> bool;

    /// Release the vault. Later operations fail with `ClosedFileSystem`.
    fn close(&self) -> Result<(), FsError>;

    fn new_directory_stream(
        &self,
        dir: &CryptoPath,
        filter: EntryFilter,
    ) -> Result<CryptoDirectoryStream, FsError>;

    fn create_directory(&self, dir: &CryptoPath) -> Result<(), FsError>;

    fn delete(&self, path: &CryptoPath) -> Result<(), FsError>;

    fn copy(
        &self,
        source: &CryptoPath,
        target: &CryptoPath,
        options: &[CopyOption],
    ) -> Result<(), FsError>;

    fn move_path(
        &self,
        source: &CryptoPath,
        target: &CryptoPath,
        options: &[CopyOption],
    ) -> Result<(), FsError>;

    fn is_hidden(&self, path: &CryptoPath) -> Result<bool, FsError>;

    fn file_store(&self, path: &CryptoPath) -> Result<FileStore, FsError>;

    /// An empty `modes` checks existence only.
    fn check_access(&self, path: &CryptoPath, modes: &[AccessMode]) -> Result<(), FsError>;

    fn file_attribute_view(&self, path: &CryptoPath) -> Result<BasicFileAttributeView, FsError>;

    fn read_attributes(&self, path: &CryptoPath) -> Result<BasicFileAttributes, FsError>;

    fn read_attributes_named(
        &self,
        path: &CryptoPath,
        attributes: &str,
    ) -> Result<BTreeMap<String, AttributeValue>, FsError>;

    fn set_attribute(
        &self,
        path: &CryptoPath,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<(), FsError>;

    fn new_file_channel(
        &self,
        path: &CryptoPath,
        options: &OpenOptions,
    ) -> Result<Box<dyn FileChannel>, FsError>;
}

impl dyn CryptoFileSystem {
    /// Path `first` (joined with `more`) on this filesystem.
    pub fn get_path(self: &Arc<Self>, first: &str, more: &[&str]) -> CryptoPath {
        let mut joined = first.to_string();
        for segment in more {
            if !joined.is_empty() && !joined.ends_with('/') {
                joined.push('/');
            }
            joined.push_str(segment);
        }
        CryptoPath::new(Arc::clone(self), &joined)
    }

    pub fn root_path(self: &Arc<Self>) -> CryptoPath {
        CryptoPath::root(Arc::clone(self))
    }
}

/// Where a cleartext path lives on disk.
enum Located {
    Root(Directory),
    Entry(CiphertextEntry, EntryKind),
}

impl Located {
    fn kind(&self) -> EntryKind {
        match self {
            Located::Root(_) => EntryKind::Directory,
            Located::Entry(_, kind) => *kind,
        }
    }

    fn physical_path(&self) -> &Path {
        match self {
            Located::Root(dir) => &dir.path,
            Located::Entry(entry, _) => &entry.path,
        }
    }
}

/// Filesystem over an unlocked vault.
pub struct VaultFileSystem {
    provider: ProviderId,
    vault_root: PathBuf,
    config: VaultConfig,
    master_key: Arc<MasterKey>,
    names: Arc<dyn NameCryptor>,
    long_names: Arc<dyn LongNameStore>,
    mapper: Arc<dyn DirectoryMapper>,
    read_only: bool,
    open: AtomicBool,
    open_streams: Arc<AtomicUsize>,
    registry: Weak<FileSystemRegistry>,
}

impl fmt::Debug for VaultFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultFileSystem")
            .field("provider", &self.provider)
            .field("vault_root", &self.vault_root)
            .field("read_only", &self.read_only)
            .field("open", &self.is_open())
            .field("open_streams", &self.open_stream_count())
            .finish_non_exhaustive()
    }
}

impl VaultFileSystem {
    /// Unlock the vault at `vault_root`.
    #[instrument(level = "info", skip(props, registry), fields(vault = %vault_root.display()))]
    pub fn open(
        provider: ProviderId,
        vault_root: &Path,
        props: &CryptoFileSystemProperties,
        registry: Weak<FileSystemRegistry>,
    ) -> Result<Arc<Self>, FsError> {
        let loader = PassphraseLoader::new(props.passphrase_copy());
        let (config, master_key) = load_vault(vault_root, props.vault_config_filename(), &loader)?;
        let master_key = Arc::new(master_key);

        let threshold = props
            .shortening_threshold()
            .unwrap_or_else(|| config.shortening_threshold());
        let names: Arc<dyn NameCryptor> = Arc::new(SivNameCryptor::new(Arc::clone(&master_key)));
        let long_names: Arc<dyn LongNameStore> = Arc::new(FsLongNameStore::with_cache_capacity(
            vault_root,
            threshold,
            props.long_name_cache_capacity(),
        ));
        let mapper: Arc<dyn DirectoryMapper> = Arc::new(CryptoPathMapper::new(
            vault_root,
            Arc::clone(&names),
            Arc::clone(&long_names),
        ));

        let root = mapper.resolve(&[])?;
        if !root.path.is_dir() {
            master_key.destroy();
            return Err(FsError::not_found(format!(
                "{} (root storage directory)",
                vault_root.display()
            )));
        }

        info!(threshold, read_only = props.read_only(), "Vault filesystem opened");
        Ok(Arc::new(Self {
            provider,
            vault_root: vault_root.to_path_buf(),
            config,
            master_key,
            names,
            long_names,
            mapper,
            read_only: props.read_only(),
            open: AtomicBool::new(true),
            open_streams: Arc::new(AtomicUsize::new(0)),
            registry,
        }))
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Directory streams not yet closed.
    pub fn open_stream_count(&self) -> usize {
        self.open_streams.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), FsError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FsError::ClosedFileSystem)
        }
    }

    fn ensure_writable(&self) -> Result<(), FsError> {
        self.ensure_open()?;
        if self.read_only {
            Err(FsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// What sits at `entry`. `None` when nothing, or nothing we recognise, is there.
    fn classify(&self, entry: &CiphertextEntry) -> Result<Option<EntryKind>, FsError> {
        match fs::symlink_metadata(&entry.path) {
            Ok(meta) if meta.is_file() => Ok(Some(EntryKind::File)),
            Ok(meta) if meta.is_dir() && entry.dir_marker().is_file() => {
                Ok(Some(EntryKind::Directory))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FsError::io(e, &entry.cleartext_name)),
        }
    }

    fn locate(&self, path: &CryptoPath) -> Result<Located, FsError> {
        let names = path.names();
        if names.is_empty() {
            return Ok(Located::Root(self.mapper.resolve(&[])?));
        }
        let entry = self.mapper.entry(&names)?;
        match self.classify(&entry)? {
            Some(kind) => Ok(Located::Entry(entry, kind)),
            None => Err(FsError::not_found(path.to_real_path())),
        }
    }

    fn remove_entry(&self, entry: &CiphertextEntry, kind: EntryKind, label: &str) -> Result<(), FsError> {
        match kind {
            EntryKind::File => fs::remove_file(&entry.path).map_err(|e| FsError::io(e, label))?,
            EntryKind::Directory => {
                let directory = self.mapper.directory_of(entry)?;
                let mut contents =
                    fs::read_dir(&directory.path).map_err(|e| FsError::io(e, label))?;
                if contents.next().is_some() {
                    return Err(FsError::DirectoryNotEmpty {
                        path: label.to_string(),
                    });
                }
                // Never leave an entry whose storage is gone
                fs::remove_dir_all(&entry.path).map_err(|e| FsError::io(e, label))?;
                self.mapper.invalidate_all();
                if let Err(err) = fs::remove_dir(&directory.path) {
                    warn!(
                        path = %directory.path.display(),
                        error = %err,
                        "Orphaned storage directory of deleted directory"
                    );
                }
            }
        }
        if entry.is_shortened() {
            self.long_names.remove(&entry.physical_name)?;
        }
        Ok(())
    }

    /// Prepare `target` to receive an entry, honouring `ReplaceExisting`.
    fn prepare_target(
        &self,
        target: &CryptoPath,
        options: &[CopyOption],
    ) -> Result<CiphertextEntry, FsError> {
        let names = target.names();
        if names.is_empty() {
            return Err(FsError::already_exists("/"));
        }
        let label = target.to_real_path().to_string();
        let entry = self.mapper.entry(&names)?;
        if let Some(kind) = self.classify(&entry)? {
            if !options.contains(&CopyOption::ReplaceExisting) {
                return Err(FsError::already_exists(&label));
            }
            self.remove_entry(&entry, kind, &label)?;
        }
        if entry.is_shortened() {
            self.long_names.shorten(&entry.ciphertext_name)?;
        }
        Ok(entry)
    }

    fn set_time(&self, located: &Located, attribute: &str, time: SystemTime) -> Result<(), FsError> {
        let physical = located.physical_path();
        let label = physical.display().to_string();
        let file = match located.kind() {
            EntryKind::File => fs::OpenOptions::new().write(true).open(physical),
            EntryKind::Directory => fs::File::open(physical),
        }
        .map_err(|e| FsError::io(e, &label))?;

        let times = fs::FileTimes::new();
        let times = match attribute {
            LAST_MODIFIED_TIME => times.set_modified(time),
            LAST_ACCESS_TIME => times.set_accessed(time),
            other => return Err(FsError::Unsupported(format!("setting attribute '{other}'"))),
        };
        file.set_times(times).map_err(|e| FsError::io(e, &label))
    }
}

impl CryptoFileSystem for VaultFileSystem {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[instrument(level = "info", skip(self), fields(vault = %self.vault_root.display()))]
    fn close(&self) -> Result<(), FsError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let streams = self.open_stream_count();
        if streams > 0 {
            warn!(streams, "Closing vault with open directory streams");
        }
        self.mapper.invalidate_all();
        self.master_key.destroy();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(&self.vault_root, self);
        }
        info!("Vault filesystem closed");
        Ok(())
    }

    #[instrument(level = "debug", skip(self, filter), fields(dir = %dir))]
    fn new_directory_stream(
        &self,
        dir: &CryptoPath,
        filter: EntryFilter,
    ) -> Result<CryptoDirectoryStream, FsError> {
        self.ensure_open()?;
        let directory = match self.locate(dir)? {
            Located::Root(directory) => directory,
            Located::Entry(entry, EntryKind::Directory) => self.mapper.directory_of(&entry)?,
            Located::Entry(_, EntryKind::File) => {
                return Err(FsError::NotADirectory {
                    path: dir.to_string(),
                });
            }
        };
        let raw = ReadDirStream::open(&directory.path).map_err(|e| FsError::io(e, dir))?;

        self.open_streams.fetch_add(1, Ordering::AcqRel);
        let counter = Arc::clone(&self.open_streams);
        Ok(CryptoDirectoryStream::new(
            Box::new(raw),
            directory.dir_id,
            dir.clone(),
            Arc::clone(&self.names),
            Arc::clone(&self.long_names),
            filter,
            Some(Box::new(move || {
                counter.fetch_sub(1, Ordering::AcqRel);
                Ok(())
            })),
        ))
    }

    fn create_directory(&self, dir: &CryptoPath) -> Result<(), FsError> {
        self.ensure_writable()?;
        let names = dir.names();
        if names.is_empty() {
            return Err(FsError::already_exists("/"));
        }
        // A file with that name also blocks creation
        let entry = self.mapper.entry(&names)?;
        if self.classify(&entry)?.is_some() {
            return Err(FsError::already_exists(dir.to_real_path()));
        }
        self.mapper.create(&names)?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(path = %path))]
    fn delete(&self, path: &CryptoPath) -> Result<(), FsError> {
        self.ensure_writable()?;
        let label = path.to_real_path().to_string();
        match self.locate(path)? {
            Located::Root(_) => Err(FsError::AccessDenied { path: label }),
            Located::Entry(entry, kind) => {
                self.remove_entry(&entry, kind, &label)?;
                debug!(kind = ?kind, "Deleted entry");
                Ok(())
            }
        }
    }

    #[instrument(level = "debug", skip(self), fields(source = %source, target = %target))]
    fn copy(
        &self,
        source: &CryptoPath,
        target: &CryptoPath,
        options: &[CopyOption],
    ) -> Result<(), FsError> {
        self.ensure_writable()?;
        if source.to_real_path() == target.to_real_path() {
            return Ok(());
        }
        let located = self.locate(source)?;
        let kind = located.kind();
        let label = target.to_real_path().to_string();
        let entry = self.prepare_target(target, options)?;

        match kind {
            EntryKind::File => {
                fs::copy(located.physical_path(), &entry.path).map_err(|e| FsError::io(e, &label))?;
            }
            EntryKind::Directory => {
                self.mapper.create(&target.names())?;
            }
        }

        if options.contains(&CopyOption::CopyAttributes) {
            let modified = fs::metadata(located.physical_path())
                .and_then(|m| m.modified())
                .map_err(|e| FsError::io(e, source))?;
            self.set_time(&Located::Entry(entry, kind), LAST_MODIFIED_TIME, modified)?;
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(source = %source, target = %target))]
    fn move_path(
        &self,
        source: &CryptoPath,
        target: &CryptoPath,
        options: &[CopyOption],
    ) -> Result<(), FsError> {
        self.ensure_writable()?;
        let source_names = source.names();
        let target_names = target.names();
        if source_names == target_names {
            return Ok(());
        }
        let (from, kind) = match self.locate(source)? {
            Located::Root(_) => {
                return Err(FsError::AccessDenied {
                    path: "/".to_string(),
                });
            }
            Located::Entry(entry, kind) => (entry, kind),
        };
        if kind == EntryKind::Directory && target_names.starts_with(&source_names) {
            return Err(FsError::InvalidArgument(format!(
                "cannot move {source} into itself"
            )));
        }

        let to = self.prepare_target(target, options)?;
        let label = target.to_real_path().to_string();
        fs::rename(&from.path, &to.path).map_err(|e| FsError::io(e, &label))?;
        if from.is_shortened() {
            self.long_names.remove(&from.physical_name)?;
        }
        self.mapper.invalidate_all();
        debug!(kind = ?kind, "Moved entry");
        Ok(())
    }

    fn is_hidden(&self, path: &CryptoPath) -> Result<bool, FsError> {
        self.ensure_open()?;
        self.locate(path)?;
        Ok(path
            .to_real_path()
            .file_name()
            .is_some_and(|name| name.starts_with('.')))
    }

    fn file_store(&self, path: &CryptoPath) -> Result<FileStore, FsError> {
        self.ensure_open()?;
        self.locate(path)?;
        Ok(FileStore {
            name: self.vault_root.display().to_string(),
            vault_root: self.vault_root.clone(),
            read_only: self.read_only,
        })
    }

    fn check_access(&self, path: &CryptoPath, modes: &[AccessMode]) -> Result<(), FsError> {
        self.ensure_open()?;
        let located = self.locate(path)?;
        let label = || path.to_real_path().to_string();
        for mode in modes {
            match mode {
                AccessMode::Read => {}
                AccessMode::Write => {
                    let readonly = fs::metadata(located.physical_path())
                        .map_err(|e| FsError::io(e, label()))?
                        .permissions()
                        .readonly();
                    if self.read_only || readonly {
                        return Err(FsError::AccessDenied { path: label() });
                    }
                }
                AccessMode::Execute => {
                    if located.kind() != EntryKind::Directory {
                        return Err(FsError::AccessDenied { path: label() });
                    }
                }
            }
        }
        Ok(())
    }

    fn file_attribute_view(&self, path: &CryptoPath) -> Result<BasicFileAttributeView, FsError> {
        self.ensure_open()?;
        Ok(BasicFileAttributeView::new(path.clone()))
    }

    fn read_attributes(&self, path: &CryptoPath) -> Result<BasicFileAttributes, FsError> {
        self.ensure_open()?;
        let located = self.locate(path)?;
        let meta = fs::metadata(located.physical_path()).map_err(|e| FsError::io(e, path))?;
        let modified = meta.modified().map_err(|e| FsError::io(e, path))?;
        let kind = located.kind();
        Ok(BasicFileAttributes {
            kind,
            size: match kind {
                EntryKind::File => cleartext_size(meta.len()),
                EntryKind::Directory => 0,
            },
            last_modified_time: modified,
            last_access_time: meta.accessed().unwrap_or(modified),
            creation_time: meta.created().unwrap_or(modified),
        })
    }

    fn read_attributes_named(
        &self,
        path: &CryptoPath,
        attributes: &str,
    ) -> Result<BTreeMap<String, AttributeValue>, FsError> {
        split_view(attributes)?;
        self.read_attributes(path)?.select(attributes)
    }

    #[instrument(level = "debug", skip(self, value), fields(path = %path))]
    fn set_attribute(
        &self,
        path: &CryptoPath,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<(), FsError> {
        self.ensure_writable()?;
        let name = split_view(attribute)?;
        let AttributeValue::Time(time) = value else {
            return Err(FsError::InvalidArgument(format!(
                "attribute '{name}' expects a time"
            )));
        };
        let located = self.locate(path)?;
        self.set_time(&located, name, time)
    }

    #[instrument(level = "debug", skip(self, options), fields(path = %path))]
    fn new_file_channel(
        &self,
        path: &CryptoPath,
        options: &OpenOptions,
    ) -> Result<Box<dyn FileChannel>, FsError> {
        self.ensure_open()?;
        options.validate()?;
        let label = path.to_real_path().to_string();
        let names = path.names();
        if names.is_empty() {
            return Err(FsError::IsADirectory { path: label });
        }
        let entry = self.mapper.entry(&names)?;
        if self.classify(&entry)? == Some(EntryKind::Directory) {
            return Err(FsError::IsADirectory { path: label });
        }

        let creating = options.is_writable()
            && (options.contains(OpenOption::Create) || options.contains(OpenOption::CreateNew));
        if creating && !self.read_only && entry.is_shortened() {
            self.long_names.shorten(&entry.ciphertext_name)?;
        }
        let channel = CleartextFileChannel::open(
            &entry.path,
            &label,
            Arc::clone(&self.master_key),
            options,
            self.read_only,
        )?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::MasterKey;
    use crate::fs::stream::accept_all;
    use crate::vault::config::{VaultInit, initialize_vault};
    use secrecy::SecretString;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn open_vault(tmp: &TempDir, read_only: bool) -> Arc<dyn CryptoFileSystem> {
        let root = tmp.path().join("vault");
        if !root.join("vault.cryptomator").exists() {
            let key = MasterKey::random();
            let names = SivNameCryptor::new(Arc::new(key.try_clone().unwrap()));
            let init = VaultInit {
                scrypt_cost_log2: 4,
                ..VaultInit::default()
            };
            initialize_vault(&root, &SecretString::from("pw".to_string()), &key, &names, &init)
                .unwrap();
        }
        let props = CryptoFileSystemProperties::builder()
            .passphrase(SecretString::from("pw".to_string()))
            .read_only(read_only)
            .build()
            .unwrap();
        VaultFileSystem::open(ProviderId::next(), &root, &props, Weak::new()).unwrap()
    }

    fn list(fs: &Arc<dyn CryptoFileSystem>, dir: &str) -> Vec<String> {
        let mut stream = fs
            .new_directory_stream(&fs.get_path(dir, &[]), accept_all())
            .unwrap();
        let mut names: Vec<String> = stream
            .iter()
            .unwrap()
            .map(|p| p.unwrap().file_name().unwrap().to_string())
            .collect();
        stream.close().unwrap();
        names.sort();
        names
    }

    fn write_file(fs: &Arc<dyn CryptoFileSystem>, path: &str, content: &[u8]) {
        let mut channel = fs
            .new_file_channel(&fs.get_path(path, &[]), &OpenOptions::read_write_create())
            .unwrap();
        channel.write_all(content).unwrap();
        channel.close().unwrap();
    }

    fn read_file(fs: &Arc<dyn CryptoFileSystem>, path: &str) -> Vec<u8> {
        let mut channel = fs
            .new_file_channel(&fs.get_path(path, &[]), &OpenOptions::read())
            .unwrap();
        let mut out = Vec::new();
        channel.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_create_list_and_read() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);

        fs.create_directory(&fs.get_path("/docs", &[])).unwrap();
        write_file(&fs, "/docs/a.txt", b"alpha");
        write_file(&fs, "/top.txt", b"top");

        assert_eq!(list(&fs, "/"), vec!["docs", "top.txt"]);
        assert_eq!(list(&fs, "/docs"), vec!["a.txt"]);
        assert_eq!(read_file(&fs, "/docs/a.txt"), b"alpha");

        let attrs = fs.read_attributes(&fs.get_path("/docs/a.txt", &[])).unwrap();
        assert!(attrs.is_regular_file());
        assert_eq!(attrs.size, 5);
    }

    #[test]
    fn test_long_names_round_trip() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        let long = "n".repeat(180);

        fs.create_directory(&fs.get_path("/", &[long.as_str()])).unwrap();
        write_file(&fs, &format!("/{long}/{long}.txt"), b"deep");
        assert_eq!(list(&fs, "/"), vec![long.clone()]);
        assert_eq!(read_file(&fs, &format!("/{long}/{long}.txt")), b"deep");
    }

    #[test]
    fn test_move_directory_keeps_children() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        fs.create_directory(&fs.get_path("/from", &[])).unwrap();
        write_file(&fs, "/from/child.txt", b"data");

        fs.move_path(&fs.get_path("/from", &[]), &fs.get_path("/to", &[]), &[])
            .unwrap();

        assert_eq!(list(&fs, "/"), vec!["to"]);
        assert_eq!(read_file(&fs, "/to/child.txt"), b"data");
        assert!(matches!(
            fs.read_attributes(&fs.get_path("/from", &[])),
            Err(FsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_move_into_itself_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        fs.create_directory(&fs.get_path("/a", &[])).unwrap();
        assert!(matches!(
            fs.move_path(&fs.get_path("/a", &[]), &fs.get_path("/a/b", &[]), &[]),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_copy_and_replace() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        write_file(&fs, "/a.txt", b"first");
        write_file(&fs, "/b.txt", b"second");

        let a = fs.get_path("/a.txt", &[]);
        let b = fs.get_path("/b.txt", &[]);
        assert!(matches!(fs.copy(&a, &b, &[]), Err(FsError::AlreadyExists { .. })));

        fs.copy(&a, &b, &[CopyOption::ReplaceExisting]).unwrap();
        assert_eq!(read_file(&fs, "/b.txt"), b"first");
    }

    #[test]
    fn test_delete_non_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        fs.create_directory(&fs.get_path("/d", &[])).unwrap();
        write_file(&fs, "/d/f", b"x");

        assert!(matches!(
            fs.delete(&fs.get_path("/d", &[])),
            Err(FsError::DirectoryNotEmpty { .. })
        ));
        fs.delete(&fs.get_path("/d/f", &[])).unwrap();
        fs.delete(&fs.get_path("/d", &[])).unwrap();
        assert!(list(&fs, "/").is_empty());
    }

    fn storage_dirs(tmp: &TempDir) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for prefix in fs::read_dir(tmp.path().join("vault").join("d")).unwrap() {
            for dir in fs::read_dir(prefix.unwrap().path()).unwrap() {
                dirs.push(dir.unwrap().path());
            }
        }
        dirs.sort();
        dirs
    }

    #[test]
    fn test_delete_directory_removes_entry_and_storage() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        let before = storage_dirs(&tmp);

        fs.create_directory(&fs.get_path("/d", &[])).unwrap();
        assert_eq!(storage_dirs(&tmp).len(), before.len() + 1);

        fs.delete(&fs.get_path("/d", &[])).unwrap();
        assert_eq!(storage_dirs(&tmp), before);
        assert!(list(&fs, "/").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_directory_with_unremovable_storage() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        let before = storage_dirs(&tmp);
        fs.create_directory(&fs.get_path("/d", &[])).unwrap();
        let storage = storage_dirs(&tmp)
            .into_iter()
            .find(|dir| !before.contains(dir))
            .unwrap();

        // rmdir refuses a symlink, so only the storage step can fail
        let empty = tmp.path().join("empty");
        fs::create_dir(&empty).unwrap();
        fs::remove_dir(&storage).unwrap();
        std::os::unix::fs::symlink(&empty, &storage).unwrap();

        fs.delete(&fs.get_path("/d", &[])).unwrap();
        assert!(list(&fs, "/").is_empty());
        assert!(matches!(
            fs.read_attributes(&fs.get_path("/d", &[])),
            Err(FsError::NotFound { .. })
        ));
        fs.create_directory(&fs.get_path("/d", &[])).unwrap();
        assert_eq!(list(&fs, "/"), vec!["d"]);
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        write_file(&fs, "/f", b"x");
        assert!(matches!(
            fs.new_directory_stream(&fs.get_path("/f", &[]), accept_all()),
            Err(FsError::NotADirectory { .. })
        ));
        assert!(matches!(
            fs.create_directory(&fs.get_path("/f", &[])),
            Err(FsError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_hidden_and_named_attributes() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        write_file(&fs, "/.secret", b"abc");

        let path = fs.get_path("/.secret", &[]);
        assert!(fs.is_hidden(&path).unwrap());

        let attrs = fs.read_attributes_named(&path, "basic:size,isRegularFile").unwrap();
        assert_eq!(attrs["size"], AttributeValue::U64(3));
        assert_eq!(attrs["isRegularFile"], AttributeValue::Bool(true));
    }

    #[test]
    fn test_set_last_modified_time() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        write_file(&fs, "/t", b"x");
        let path = fs.get_path("/t", &[]);
        let time = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);

        fs.set_attribute(&path, "lastModifiedTime", AttributeValue::Time(time))
            .unwrap();
        assert_eq!(fs.read_attributes(&path).unwrap().last_modified_time, time);
    }

    #[test]
    fn test_read_only_vault() {
        let tmp = TempDir::new().unwrap();
        drop(open_vault(&tmp, false));
        let fs = open_vault(&tmp, true);

        assert!(matches!(
            fs.create_directory(&fs.get_path("/x", &[])),
            Err(FsError::ReadOnly)
        ));
        assert!(matches!(
            fs.check_access(&fs.root_path(), &[AccessMode::Write]),
            Err(FsError::AccessDenied { .. })
        ));
        fs.check_access(&fs.root_path(), &[AccessMode::Read]).unwrap();
    }

    #[test]
    fn test_close_rejects_operations() {
        let tmp = TempDir::new().unwrap();
        let fs = open_vault(&tmp, false);
        let mut stream = fs.new_directory_stream(&fs.root_path(), accept_all()).unwrap();
        stream.close().unwrap();

        fs.close().unwrap();
        fs.close().unwrap();
        assert!(!fs.is_open());
        assert!(matches!(
            fs.read_attributes(&fs.root_path()),
            Err(FsError::ClosedFileSystem)
        ));
    }
}
