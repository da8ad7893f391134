//! Ciphertext-level building blocks: names, long names, content, channels and listings.

pub mod channel;
pub mod cleanup;
pub mod content;
pub mod longname;
pub mod name;
pub mod stream;

#[cfg(feature = "async")]
pub mod async_channel;

pub use channel::{CleartextFileChannel, FileChannel, OpenOption, OpenOptions};
pub use cleanup::{CleanupStep, CloseError};
pub use content::{ContentError, cleartext_size, decrypt_content, encrypt_content};
pub use longname::{FsLongNameStore, LongNameError, LongNameStore};
pub use name::{NameCryptor, NameError, SivNameCryptor};
pub use stream::{CryptoDirectoryStream, EntryFilter, accept_all};

#[cfg(feature = "async")]
pub use async_channel::AsyncDelegatingFileChannel;
