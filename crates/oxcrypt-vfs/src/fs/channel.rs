//! Synchronous file channels over encrypted file content.

use std::{
    collections::BTreeSet,
    fs,
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use tempfile::NamedTempFile;
use tracing::{debug, instrument, trace, warn};

use crate::crypto::keys::MasterKey;
use crate::error::FsError;
use crate::fs::content::{decrypt_content, encrypt_content};

/// Largest cleartext a channel accepts. Content is held in memory while open.
pub const MAX_FILE_SIZE: u64 = 1 << 32;

/// How a channel is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpenOption {
    Read,
    Write,
    Append,
    Create,
    CreateNew,
    TruncateExisting,
}

/// A set of [`OpenOption`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    options: BTreeSet<OpenOption>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only access to an existing file.
    pub fn read() -> Self {
        [OpenOption::Read].into_iter().collect()
    }

    /// Read/write access, creating the file if needed.
    pub fn read_write_create() -> Self {
        [OpenOption::Read, OpenOption::Write, OpenOption::Create]
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn with(mut self, option: OpenOption) -> Self {
        self.options.insert(option);
        self
    }

    pub fn contains(&self, option: OpenOption) -> bool {
        self.options.contains(&option)
    }

    pub fn iter(&self) -> impl Iterator<Item = OpenOption> + '_ {
        self.options.iter().copied()
    }

    /// Whether the channel may modify the file.
    pub fn is_writable(&self) -> bool {
        self.contains(OpenOption::Write) || self.contains(OpenOption::Append)
    }

    /// Whether the channel may read. Read is implied when nothing writable is asked for.
    pub fn is_readable(&self) -> bool {
        self.contains(OpenOption::Read) || !self.is_writable()
    }

    /// Reject contradictory combinations.
    pub fn validate(&self) -> Result<(), FsError> {
        if self.contains(OpenOption::Append) && self.contains(OpenOption::Read) {
            return Err(FsError::InvalidArgument(
                "READ + APPEND not allowed".to_string(),
            ));
        }
        if self.contains(OpenOption::Append) && self.contains(OpenOption::TruncateExisting) {
            return Err(FsError::InvalidArgument(
                "APPEND + TRUNCATE_EXISTING not allowed".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromIterator<OpenOption> for OpenOptions {
    fn from_iter<I: IntoIterator<Item = OpenOption>>(iter: I) -> Self {
        Self {
            options: iter.into_iter().collect(),
        }
    }
}

/// A seekable byte channel with positional access.
///
/// Positional `read_at`/`write_at` leave the channel position untouched.
pub trait FileChannel: Read + Write + Seek + Send {
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> io::Result<usize>;

    fn write_at(&mut self, buf: &[u8], pos: u64) -> io::Result<usize>;

    fn size(&self) -> io::Result<u64>;

    /// Shrink to `size` bytes. A larger `size` leaves the file unchanged.
    fn truncate(&mut self, size: u64) -> io::Result<()>;

    /// Persist pending writes.
    fn force(&mut self) -> io::Result<()>;

    /// Persist pending writes and release the channel. Idempotent.
    fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;
}

/// Channel over one encrypted file.
///
/// The whole cleartext is decrypted on open and held in memory. `force` and
/// `close` re-encrypt it and atomically replace the ciphertext file.
pub struct CleartextFileChannel {
    ciphertext_path: PathBuf,
    cleartext_path: String,
    master_key: Arc<MasterKey>,
    content: Vec<u8>,
    position: u64,
    readable: bool,
    writable: bool,
    append: bool,
    dirty: bool,
    open: bool,
}

impl std::fmt::Debug for CleartextFileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleartextFileChannel")
            .field("path", &self.cleartext_path)
            .field("size", &self.content.len())
            .field("position", &self.position)
            .field("dirty", &self.dirty)
            .field("open", &self.open)
            .finish()
    }
}

impl CleartextFileChannel {
    /// Open the ciphertext file at `ciphertext_path`.
    ///
    /// `cleartext_path` only labels errors. A new file is written immediately
    /// so it is visible to listings before the first `force`.
    #[instrument(level = "debug", skip(master_key, options), fields(path = %cleartext_path))]
    pub fn open(
        ciphertext_path: &Path,
        cleartext_path: &str,
        master_key: Arc<MasterKey>,
        options: &OpenOptions,
        read_only: bool,
    ) -> Result<Self, FsError> {
        options.validate()?;
        let writable = options.is_writable();
        if writable && read_only {
            return Err(FsError::ReadOnly);
        }

        let metadata = match fs::metadata(ciphertext_path) {
            Ok(metadata) => Some(metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(FsError::io(e, cleartext_path)),
        };
        if metadata.as_ref().is_some_and(fs::Metadata::is_dir) {
            return Err(FsError::IsADirectory {
                path: cleartext_path.to_string(),
            });
        }
        let exists = metadata.is_some();
        let creating = writable
            && (options.contains(OpenOption::Create) || options.contains(OpenOption::CreateNew));

        if exists && writable && options.contains(OpenOption::CreateNew) {
            return Err(FsError::already_exists(cleartext_path));
        }
        if !exists && !creating {
            return Err(FsError::not_found(cleartext_path));
        }

        let truncate = writable && options.contains(OpenOption::TruncateExisting);
        let content = if exists && !truncate {
            let ciphertext =
                fs::read(ciphertext_path).map_err(|e| FsError::io(e, cleartext_path))?;
            decrypt_content(&ciphertext, &master_key)?
        } else {
            Vec::new()
        };

        let mut channel = Self {
            ciphertext_path: ciphertext_path.to_path_buf(),
            cleartext_path: cleartext_path.to_string(),
            master_key,
            content,
            position: 0,
            readable: options.is_readable(),
            writable,
            append: options.contains(OpenOption::Append),
            dirty: !exists || truncate,
            open: true,
        };
        if !exists {
            channel.persist().map_err(|e| FsError::io(e, cleartext_path))?;
        }
        debug!(size = channel.content.len(), created = !exists, "Opened file channel");
        Ok(channel)
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(FsError::ClosedChannel.into())
        }
    }

    fn ensure_readable(&self) -> io::Result<()> {
        self.ensure_open()?;
        if self.readable {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "channel not opened for reading",
            ))
        }
    }

    fn ensure_writable(&self) -> io::Result<()> {
        self.ensure_open()?;
        if self.writable {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "channel not opened for writing",
            ))
        }
    }

    fn copy_out(&self, buf: &mut [u8], pos: u64) -> usize {
        let len = self.content.len() as u64;
        if pos >= len {
            return 0;
        }
        let start = pos as usize;
        let n = buf.len().min(self.content.len() - start);
        buf[..n].copy_from_slice(&self.content[start..start + n]);
        n
    }

    fn copy_in(&mut self, buf: &[u8], pos: u64) -> io::Result<usize> {
        let too_large =
            || io::Error::new(io::ErrorKind::InvalidInput, "write past maximum file size");
        let end = pos
            .checked_add(buf.len() as u64)
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or_else(too_large)?;
        let start = usize::try_from(pos).map_err(|_| too_large())?;
        let end = usize::try_from(end).map_err(|_| too_large())?;
        if end > self.content.len() {
            self.content.resize(end, 0);
        }
        self.content[start..end].copy_from_slice(buf);
        self.dirty = true;
        Ok(buf.len())
    }

    fn persist(&mut self) -> io::Result<()> {
        let ciphertext = encrypt_content(&self.content, &self.master_key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let parent = self
            .ciphertext_path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file has no parent"))?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&ciphertext)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.ciphertext_path).map_err(|e| e.error)?;

        self.dirty = false;
        trace!(path = %self.cleartext_path, size = self.content.len(), "Persisted file content");
        Ok(())
    }
}

impl Read for CleartextFileChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_readable()?;
        let n = self.copy_out(buf, self.position);
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for CleartextFileChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_writable()?;
        if self.append {
            self.position = self.content.len() as u64;
        }
        let n = self.copy_in(buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.force()
    }
}

impl Seek for CleartextFileChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => (self.content.len() as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        self.position = target;
        Ok(target)
    }
}

impl FileChannel for CleartextFileChannel {
    fn read_at(&mut self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        self.ensure_readable()?;
        Ok(self.copy_out(buf, pos))
    }

    fn write_at(&mut self, buf: &[u8], pos: u64) -> io::Result<usize> {
        self.ensure_writable()?;
        self.copy_in(buf, pos)
    }

    fn size(&self) -> io::Result<u64> {
        self.ensure_open()?;
        Ok(self.content.len() as u64)
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.ensure_writable()?;
        if size < self.content.len() as u64 {
            self.content.truncate(size as usize);
            self.dirty = true;
        }
        self.position = self.position.min(size);
        Ok(())
    }

    fn force(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        if self.dirty {
            self.persist()?;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        let result = if self.dirty { self.persist() } else { Ok(()) };
        self.open = false;
        self.content.clear();
        result
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for CleartextFileChannel {
    fn drop(&mut self) {
        if self.open
            && let Err(e) = FileChannel::close(self)
        {
            warn!(path = %self.cleartext_path, error = %e, "Failed to persist file channel on drop");
        }
    }
}
