//! Directory identities and cleartext paths.
//!
//! - `DirId`: the opaque identity of a directory, bound into its children's names
//! - `CryptoPath`: a cleartext path owned by exactly one filesystem instance

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use relative_path::{Component, RelativePath, RelativePathBuf};
use url::Url;

use crate::error::FsError;
use crate::vault::filesystem::CryptoFileSystem;

/// Opaque directory identifier.
///
/// Directory IDs are UUIDs stored in `dir.c9r` files. They stay fixed for the
/// lifetime of a directory, whatever it is renamed to. The root has the empty
/// ID.
///
/// ```
/// use oxcrypt_vfs::vault::path::DirId;
///
/// assert!(DirId::root().is_root());
/// assert!(!DirId::from_raw("550e8400-e29b-41d4-a716-446655440000").is_root());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirId(String);

impl DirId {
    #[inline]
    pub fn root() -> Self {
        DirId(String::new())
    }

    /// A fresh random identity for a new directory.
    pub fn generate() -> Self {
        DirId(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an ID read from a `dir.c9r` file.
    #[inline]
    pub fn from_raw(id: impl Into<String>) -> Self {
        DirId(id.into())
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A cleartext path inside one vault filesystem.
///
/// Uses `/` as separator regardless of host OS. Every path carries the
/// filesystem that created it; two paths are only equal when they belong to
/// the same filesystem instance.
#[derive(Clone)]
pub struct CryptoPath {
    fs: Arc<dyn CryptoFileSystem>,
    path: RelativePathBuf,
    absolute: bool,
}

impl CryptoPath {
    /// Parse `path` for `fs`. A leading `/` makes it absolute.
    pub fn new(fs: Arc<dyn CryptoFileSystem>, path: &str) -> Self {
        let absolute = path.starts_with('/');
        let trimmed = path.trim_start_matches('/');
        let path = RelativePathBuf::from(trimmed.trim_end_matches('/'));
        Self { fs, path, absolute }
    }

    pub fn root(fs: Arc<dyn CryptoFileSystem>) -> Self {
        Self::new(fs, "/")
    }

    pub fn file_system(&self) -> &Arc<dyn CryptoFileSystem> {
        &self.fs
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.names().is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }

    pub fn parent(&self) -> Option<CryptoPath> {
        let parent = self.path.parent()?;
        Some(self.with_path(parent.to_relative_path_buf(), self.absolute))
    }

    /// Resolve `other` against this path; an absolute `other` replaces it.
    pub fn resolve(&self, other: &str) -> CryptoPath {
        if other.starts_with('/') {
            return CryptoPath::new(Arc::clone(&self.fs), other);
        }
        self.with_path(self.path.join(other.trim_end_matches('/')), self.absolute)
    }

    /// Drop `.` segments and fold `..` into their parent.
    ///
    /// `..` above the root of an absolute path is discarded.
    #[must_use]
    pub fn normalize(&self) -> CryptoPath {
        let mut out: Vec<&str> = Vec::new();
        for component in self.path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => match out.last() {
                    Some(&last) if last != ".." => {
                        out.pop();
                    }
                    _ if self.absolute => {}
                    _ => out.push(".."),
                },
                Component::Normal(name) => out.push(name),
            }
        }
        self.with_path(RelativePathBuf::from(out.join("/")), self.absolute)
    }

    /// Relative paths are taken relative to the vault root.
    #[must_use]
    pub fn to_absolute_path(&self) -> CryptoPath {
        self.with_path(self.path.clone(), true)
    }

    /// Canonical form used for identity comparisons.
    #[must_use]
    pub fn to_real_path(&self) -> CryptoPath {
        self.to_absolute_path().normalize()
    }

    /// Cleartext names of the canonical path, root first.
    pub fn names(&self) -> Vec<String> {
        self.to_real_path()
            .path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn as_relative_path(&self) -> &RelativePath {
        &self.path
    }

    /// URI of the canonical form of this path.
    pub fn to_uri(&self) -> Result<Url, FsError> {
        let names = self.names();
        crate::provider::uri::create_uri(
            self.fs.vault_root(),
            names.iter().map(String::as_str),
        )
    }

    /// Same filesystem instance as `other`.
    pub fn same_file_system(&self, other: &CryptoPath) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.fs), Arc::as_ptr(&other.fs))
    }

    fn with_path(&self, path: RelativePathBuf, absolute: bool) -> CryptoPath {
        CryptoPath {
            fs: Arc::clone(&self.fs),
            path,
            absolute,
        }
    }
}

impl fmt::Display for CryptoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/{}", self.path)
        } else {
            write!(f, "{}", self.path)
        }
    }
}

impl fmt::Debug for CryptoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CryptoPath").field(&self.to_string()).finish()
    }
}

impl PartialEq for CryptoPath {
    fn eq(&self, other: &Self) -> bool {
        self.same_file_system(other) && self.absolute == other.absolute && self.path == other.path
    }
}

impl Eq for CryptoPath {}

impl Hash for CryptoPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.absolute.hash(state);
        self.path.hash(state);
    }
}
