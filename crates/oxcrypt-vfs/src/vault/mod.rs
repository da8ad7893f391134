//! Vault-level components: keys on disk, configuration, path mapping and the filesystem.

pub mod attributes;
pub mod config;
pub mod filesystem;
pub mod mapper;
pub mod master_key;
pub mod path;
pub mod registry;

pub use attributes::{AccessMode, AttributeValue, BasicFileAttributes, CopyOption, EntryKind};
pub use config::{VaultConfig, VaultConfigError};
pub use filesystem::{CryptoFileSystem, VaultFileSystem};
pub use mapper::{CryptoPathMapper, Directory, DirectoryMapper};
pub use path::{CryptoPath, DirId};
pub use registry::FileSystemRegistry;
