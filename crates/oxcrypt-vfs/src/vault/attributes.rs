//! Attribute and option types shared by the filesystem and provider surfaces.

use std::{collections::BTreeMap, path::PathBuf, time::SystemTime};

use crate::error::FsError;
use crate::vault::path::CryptoPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyOption {
    ReplaceExisting,
    CopyAttributes,
    AtomicMove,
}

/// Value of a named attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Bool(bool),
    U64(u64),
    Time(SystemTime),
}

/// Basic attributes of a cleartext entry.
///
/// `size` is the cleartext size; times come from the ciphertext entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicFileAttributes {
    pub kind: EntryKind,
    pub size: u64,
    pub last_modified_time: SystemTime,
    pub last_access_time: SystemTime,
    pub creation_time: SystemTime,
}

const BASIC_VIEW: &str = "basic";

pub const SIZE: &str = "size";
pub const LAST_MODIFIED_TIME: &str = "lastModifiedTime";
pub const LAST_ACCESS_TIME: &str = "lastAccessTime";
pub const CREATION_TIME: &str = "creationTime";
pub const IS_REGULAR_FILE: &str = "isRegularFile";
pub const IS_DIRECTORY: &str = "isDirectory";
pub const IS_SYMBOLIC_LINK: &str = "isSymbolicLink";
pub const IS_OTHER: &str = "isOther";

const ALL_BASIC: [&str; 8] = [
    SIZE,
    LAST_MODIFIED_TIME,
    LAST_ACCESS_TIME,
    CREATION_TIME,
    IS_REGULAR_FILE,
    IS_DIRECTORY,
    IS_SYMBOLIC_LINK,
    IS_OTHER,
];

impl BasicFileAttributes {
    pub fn is_regular_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    fn get(&self, name: &str) -> Option<AttributeValue> {
        Some(match name {
            SIZE => AttributeValue::U64(self.size),
            LAST_MODIFIED_TIME => AttributeValue::Time(self.last_modified_time),
            LAST_ACCESS_TIME => AttributeValue::Time(self.last_access_time),
            CREATION_TIME => AttributeValue::Time(self.creation_time),
            IS_REGULAR_FILE => AttributeValue::Bool(self.is_regular_file()),
            IS_DIRECTORY => AttributeValue::Bool(self.is_directory()),
            IS_SYMBOLIC_LINK | IS_OTHER => AttributeValue::Bool(false),
            _ => return None,
        })
    }

    /// Select attributes by a `[view:]name,name...` expression; `*` selects all.
    pub fn select(&self, attributes: &str) -> Result<BTreeMap<String, AttributeValue>, FsError> {
        let list = split_view(attributes)?;
        let mut out = BTreeMap::new();
        for name in list.split(',').map(str::trim) {
            if name == "*" {
                for all in ALL_BASIC {
                    if let Some(value) = self.get(all) {
                        out.insert(all.to_string(), value);
                    }
                }
                continue;
            }
            let value = self
                .get(name)
                .ok_or_else(|| FsError::InvalidArgument(format!("unknown attribute '{name}'")))?;
            out.insert(name.to_string(), value);
        }
        Ok(out)
    }
}

/// Strip an optional `basic:` view prefix. Other views are unsupported.
pub fn split_view(attribute: &str) -> Result<&str, FsError> {
    match attribute.split_once(':') {
        None => Ok(attribute),
        Some((BASIC_VIEW, rest)) => Ok(rest),
        Some((view, _)) => Err(FsError::Unsupported(format!("attribute view '{view}'"))),
    }
}

/// Store backing a vault filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStore {
    pub name: String,
    pub vault_root: PathBuf,
    pub read_only: bool,
}

impl FileStore {
    pub fn type_name(&self) -> &'static str {
        crate::provider::SCHEME
    }

    pub fn supports_view(&self, view: &str) -> bool {
        view == BASIC_VIEW
    }
}

/// Attribute view bound to a path. Reads and writes go through the path's filesystem.
#[derive(Debug, Clone)]
pub struct BasicFileAttributeView {
    path: CryptoPath,
}

impl BasicFileAttributeView {
    pub fn new(path: CryptoPath) -> Self {
        Self { path }
    }

    pub fn name(&self) -> &'static str {
        BASIC_VIEW
    }

    pub fn read_attributes(&self) -> Result<BasicFileAttributes, FsError> {
        self.path.file_system().read_attributes(&self.path)
    }

    /// Update the given times; `None` leaves a time unchanged.
    pub fn set_times(
        &self,
        last_modified: Option<SystemTime>,
        last_access: Option<SystemTime>,
    ) -> Result<(), FsError> {
        let fs = self.path.file_system();
        if let Some(time) = last_modified {
            fs.set_attribute(&self.path, LAST_MODIFIED_TIME, AttributeValue::Time(time))?;
        }
        if let Some(time) = last_access {
            fs.set_attribute(&self.path, LAST_ACCESS_TIME, AttributeValue::Time(time))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn attrs() -> BasicFileAttributes {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        BasicFileAttributes {
            kind: EntryKind::File,
            size: 42,
            last_modified_time: t,
            last_access_time: t,
            creation_time: t,
        }
    }

    #[test]
    fn test_select_named() {
        let selected = attrs().select("basic:size,isDirectory").unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected["size"], AttributeValue::U64(42));
        assert_eq!(selected["isDirectory"], AttributeValue::Bool(false));
    }

    #[test]
    fn test_select_all() {
        assert_eq!(attrs().select("*").unwrap().len(), ALL_BASIC.len());
    }

    #[test]
    fn test_select_rejects_unknown() {
        assert!(matches!(
            attrs().select("size,owner"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            attrs().select("posix:permissions"),
            Err(FsError::Unsupported(_))
        ));
    }
}
