//! Shared fixtures for oxcrypt-vfs integration tests.

#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use assert_fs::TempDir;
use oxcrypt_vfs::crypto::keys::MasterKey;
use oxcrypt_vfs::fs::channel::{FileChannel, OpenOptions};
use oxcrypt_vfs::fs::name::SivNameCryptor;
use oxcrypt_vfs::fs::stream::{CryptoDirectoryStream, EntryFilter};
use oxcrypt_vfs::vault::attributes::{
    AccessMode, AttributeValue, BasicFileAttributeView, BasicFileAttributes, CopyOption, FileStore,
};
use oxcrypt_vfs::vault::config::{VaultInit, initialize_vault};
use oxcrypt_vfs::{
    CryptoFileSystem, CryptoFileSystemProperties, CryptoFileSystemProvider, CryptoPath, FsError,
    ProviderId,
};
use secrecy::SecretString;

pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// Route `tracing` output to the test writer. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Deterministic key material for fixtures that do not touch disk.
pub fn create_test_master_key() -> MasterKey {
    MasterKey::new([0x11; 32], [0x22; 32])
}

pub fn test_properties() -> CryptoFileSystemProperties {
    CryptoFileSystemProperties::builder()
        .passphrase(SecretString::from(TEST_PASSWORD.to_string()))
        .build()
        .expect("valid properties")
}

/// Create an empty vault under `root` with a cheap KDF.
pub fn create_vault(root: &Path) {
    let master_key = Arc::new(MasterKey::random());
    let names = SivNameCryptor::new(Arc::clone(&master_key));
    let init = VaultInit {
        scrypt_cost_log2: 4,
        ..VaultInit::default()
    };
    initialize_vault(
        root,
        &SecretString::from(TEST_PASSWORD.to_string()),
        &master_key,
        &names,
        &init,
    )
    .expect("Failed to create test vault");
}

/// A vault in a temp directory opened through a fresh provider.
pub struct TestVault {
    _tmp: TempDir,
    pub root: PathBuf,
    pub provider: CryptoFileSystemProvider,
    pub fs: Arc<dyn CryptoFileSystem>,
}

impl TestVault {
    pub fn new() -> Self {
        init_tracing();
        let tmp = TempDir::new().expect("temp dir");
        let root = tmp.path().join("vault");
        create_vault(&root);
        let provider = CryptoFileSystemProvider::new();
        let fs = provider
            .new_file_system_at(&root, &test_properties())
            .expect("Failed to open test vault");
        Self {
            _tmp: tmp,
            root,
            provider,
            fs,
        }
    }

    pub fn path(&self, path: &str) -> CryptoPath {
        self.fs.get_path(path, &[])
    }

    pub fn write(&self, path: &str, contents: &[u8]) {
        let mut channel = self
            .provider
            .new_file_channel(&self.path(path), &OpenOptions::read_write_create())
            .expect("open for write");
        channel.write_at(contents, 0).expect("write");
        channel.close().expect("close");
    }

    pub fn read(&self, path: &str) -> Vec<u8> {
        let mut channel = self
            .provider
            .new_file_channel(&self.path(path), &OpenOptions::read())
            .expect("open for read");
        let size = usize::try_from(channel.size().expect("size")).expect("fits");
        let mut buf = vec![0u8; size];
        let n = channel.read_at(&mut buf, 0).expect("read");
        buf.truncate(n);
        buf
    }

    /// Cleartext names in `dir`, sorted.
    pub fn list(&self, dir: &str) -> Vec<String> {
        let mut stream = self
            .provider
            .new_directory_stream(&self.path(dir), oxcrypt_vfs::fs::accept_all())
            .expect("open stream");
        let mut names: Vec<String> = stream
            .iter()
            .expect("iterator")
            .map(|p| p.expect("entry").file_name().expect("name").to_string())
            .collect();
        stream.close().expect("close stream");
        names.sort();
        names
    }
}

/// A filesystem owned by no provider that counts every delegated call.
#[derive(Debug)]
pub struct RecordingFileSystem {
    provider: ProviderId,
    root: PathBuf,
    calls: AtomicUsize,
}

impl RecordingFileSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            provider: ProviderId::next(),
            root: PathBuf::from("/recording"),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record<T>(&self) -> Result<T, FsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FsError::Unsupported("recording".to_string()))
    }
}

impl CryptoFileSystem for RecordingFileSystem {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    fn vault_root(&self) -> &Path {
        &self.root
    }

    fn is_open(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn close(&self) -> Result<(), FsError> {
        self.record()
    }

    fn new_directory_stream(
        &self,
        _dir: &CryptoPath,
        _filter: EntryFilter,
    ) -> Result<CryptoDirectoryStream, FsError> {
        self.record()
    }

    fn create_directory(&self, _dir: &CryptoPath) -> Result<(), FsError> {
        self.record()
    }

    fn delete(&self, _path: &CryptoPath) -> Result<(), FsError> {
        self.record()
    }

    fn copy(&self, _: &CryptoPath, _: &CryptoPath, _: &[CopyOption]) -> Result<(), FsError> {
        self.record()
    }

    fn move_path(&self, _: &CryptoPath, _: &CryptoPath, _: &[CopyOption]) -> Result<(), FsError> {
        self.record()
    }

    fn is_hidden(&self, _path: &CryptoPath) -> Result<bool, FsError> {
        self.record()
    }

    fn file_store(&self, _path: &CryptoPath) -> Result<FileStore, FsError> {
        self.record()
    }

    fn check_access(&self, _path: &CryptoPath, _modes: &[AccessMode]) -> Result<(), FsError> {
        self.record()
    }

    fn file_attribute_view(&self, _path: &CryptoPath) -> Result<BasicFileAttributeView, FsError> {
        self.record()
    }

    fn read_attributes(&self, _path: &CryptoPath) -> Result<BasicFileAttributes, FsError> {
        self.record()
    }

    fn read_attributes_named(
        &self,
        _path: &CryptoPath,
        _attributes: &str,
    ) -> Result<BTreeMap<String, AttributeValue>, FsError> {
        self.record()
    }

    fn set_attribute(&self, _: &CryptoPath, _: &str, _: AttributeValue) -> Result<(), FsError> {
        self.record()
    }

    fn new_file_channel(
        &self,
        _path: &CryptoPath,
        _options: &OpenOptions,
    ) -> Result<Box<dyn FileChannel>, FsError> {
        self.record()
    }
}

/// A path on a fresh [`RecordingFileSystem`].
pub fn foreign_path(path: &str) -> (Arc<RecordingFileSystem>, CryptoPath) {
    let recording = RecordingFileSystem::new();
    let fs: Arc<dyn CryptoFileSystem> = recording.clone();
    (recording, fs.get_path(path, &[]))
}
