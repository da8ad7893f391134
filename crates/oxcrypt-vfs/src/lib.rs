//! Encrypted virtual filesystem over Cryptomator vault format 8.
//!
//! A [`CryptoFileSystemProvider`] opens one [`VaultFileSystem`] per vault
//! root and routes every operation to the filesystem that owns its path.
//! Names are encrypted with AES-SIV bound to the parent directory's ID,
//! contents with AES-GCM, and over-length names are shortened.
//!
//! ```no_run
//! use oxcrypt_vfs::{CryptoFileSystemProvider, CryptoFileSystemProperties};
//! use oxcrypt_vfs::fs::accept_all;
//! use secrecy::SecretString;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), oxcrypt_vfs::FsError> {
//! let props = CryptoFileSystemProperties::builder()
//!     .passphrase(SecretString::from("passphrase".to_string()))
//!     .build()?;
//! let provider = CryptoFileSystemProvider::new();
//! let fs = provider.new_file_system_at(Path::new("/path/to/vault"), &props)?;
//!
//! let mut stream = provider.new_directory_stream(&fs.root_path(), accept_all())?;
//! for entry in stream.iter()? {
//!     println!("{}", entry?);
//! }
//! stream.close()?;
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod fs;
pub mod provider;
pub mod vault;

#[cfg(test)]
mod test_support;

pub use error::FsError;
pub use provider::properties::CryptoFileSystemProperties;
pub use provider::{CryptoFileSystemProvider, ProviderId, SCHEME};
pub use vault::filesystem::{CryptoFileSystem, VaultFileSystem};
pub use vault::path::{CryptoPath, DirId};
