//! Fakes shared by unit tests.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::FsError;
use crate::fs::channel::{FileChannel, OpenOptions};
use crate::fs::stream::{CryptoDirectoryStream, EntryFilter};
use crate::provider::ProviderId;
use crate::vault::attributes::{
    AccessMode, AttributeValue, BasicFileAttributeView, BasicFileAttributes, CopyOption, FileStore,
};
use crate::vault::filesystem::CryptoFileSystem;
use crate::vault::path::CryptoPath;

/// A filesystem that only has an identity. Every operation is unsupported.
#[derive(Debug)]
pub struct NullFileSystem {
    provider: ProviderId,
    root: PathBuf,
}

impl NullFileSystem {
    pub fn arc() -> Arc<dyn CryptoFileSystem> {
        Self::arc_at(Path::new("/null"))
    }

    pub fn arc_at(root: &Path) -> Arc<dyn CryptoFileSystem> {
        Arc::new(Self {
            provider: ProviderId::next(),
            root: root.to_path_buf(),
        })
    }
}

fn unsupported<T>() -> Result<T, FsError> {
    Err(FsError::Unsupported("null filesystem".to_string()))
}

impl CryptoFileSystem for NullFileSystem {
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
        true
    }

    fn close(&self) -> Result<(), FsError> {
        Ok(())
    }

    fn new_directory_stream(
        &self,
        _dir: &CryptoPath,
        _filter: EntryFilter,
    ) -> Result<CryptoDirectoryStream, FsError> {
        unsupported()
    }

    fn create_directory(&self, _dir: &CryptoPath) -> Result<(), FsError> {
        unsupported()
    }

    fn delete(&self, _path: &CryptoPath) -> Result<(), FsError> {
        unsupported()
    }

    fn copy(&self, _: &CryptoPath, _: &CryptoPath, _: &[CopyOption]) -> Result<(), FsError> {
        unsupported()
    }

    fn move_path(&self, _: &CryptoPath, _: &CryptoPath, _: &[CopyOption]) -> Result<(), FsError> {
        unsupported()
    }

    fn is_hidden(&self, _path: &CryptoPath) -> Result<bool, FsError> {
        unsupported()
    }

    fn file_store(&self, _path: &CryptoPath) -> Result<FileStore, FsError> {
        unsupported()
    }

    fn check_access(&self, _path: &CryptoPath, _modes: &[AccessMode]) -> Result<(), FsError> {
        unsupported()
    }

    fn file_attribute_view(&self, _path: &CryptoPath) -> Result<BasicFileAttributeView, FsError> {
        unsupported()
    }

    fn read_attributes(&self, _path: &CryptoPath) -> Result<BasicFileAttributes, FsError> {
        unsupported()
    }

    fn read_attributes_named(
        &self,
        _path: &CryptoPath,
        _attributes: &str,
    ) -> Result<BTreeMap<String, AttributeValue>, FsError> {
        unsupported()
    }

    fn set_attribute(&self, _: &CryptoPath, _: &str, _: AttributeValue) -> Result<(), FsError> {
        unsupported()
    }

    fn new_file_channel(
        &self,
        _path: &CryptoPath,
        _options: &OpenOptions,
    ) -> Result<Box<dyn FileChannel>, FsError> {
        unsupported()
    }
}
