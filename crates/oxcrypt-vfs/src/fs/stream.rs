//! Cleartext directory listings.
//!
//! A [`CryptoDirectoryStream`] walks one physical storage directory and turns
//! each ciphertext entry into a cleartext [`CryptoPath`]:
//!
//! 1. shortened names are inflated through the [`LongNameStore`]
//! 2. the ciphertext name is decrypted with the directory's [`DirId`]
//! 3. the candidate path is checked against the caller's filter
//!
//! Entries failing step 1 or 2 do not belong to the cleartext tree and are
//! skipped without error. Translation runs lazily on the iterating thread.

use std::{borrow::Cow, fmt, fs, io, path::Path, sync::Arc};

use tracing::{debug, trace, warn};

use crate::error::FsError;
use crate::fs::cleanup::{self, CleanupStep};
use crate::fs::longname::{LongNameStore, is_shortened};
use crate::fs::name::NameCryptor;
use crate::vault::path::{CryptoPath, DirId};

/// Caller-supplied predicate over candidate entries.
pub type EntryFilter = Box<dyn Fn(&CryptoPath) -> bool + Send>;

/// Invoked once when a stream closes.
pub type CloseCallback = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// Accept every entry.
pub fn accept_all() -> EntryFilter {
    Box::new(|_| true)
}

/// Raw ciphertext names of one physical directory.
pub trait CiphertextDirStream: Iterator<Item = io::Result<String>> + Send {
    /// Release the underlying handle.
    fn close(&mut self) -> io::Result<()>;
}

/// [`CiphertextDirStream`] over `std::fs::read_dir`.
#[derive(Debug)]
pub struct ReadDirStream {
    inner: Option<fs::ReadDir>,
}

impl ReadDirStream {
    pub fn open(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            inner: Some(fs::read_dir(dir)?),
        })
    }
}

impl Iterator for ReadDirStream {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.as_mut()?.next()?;
        Some(entry.map(|e| e.file_name().to_string_lossy().into_owned()))
    }
}

impl CiphertextDirStream for ReadDirStream {
    fn close(&mut self) -> io::Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Why an entry was left out of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The shortened name has no readable mapping.
    Inflate,
    /// Not a ciphertext name of this directory.
    Decrypt,
    /// Decrypted to something that is not a single path segment.
    InvalidName,
    /// Rejected by the caller's filter.
    Filtered,
}

/// Outcome of translating one physical entry.
#[derive(Debug)]
pub enum Translation {
    Entry(CryptoPath),
    Skip(SkipReason),
}

/// Open directory listing.
pub struct CryptoDirectoryStream {
    raw: Option<Box<dyn CiphertextDirStream>>,
    on_close: Option<CloseCallback>,
    dir_id: DirId,
    base: CryptoPath,
    names: Arc<dyn NameCryptor>,
    long_names: Arc<dyn LongNameStore>,
    filter: EntryFilter,
    iterated: bool,
    closed: bool,
}

impl fmt::Debug for CryptoDirectoryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoDirectoryStream")
            .field("base", &self.base)
            .field("dir_id", &self.dir_id)
            .field("iterated", &self.iterated)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl CryptoDirectoryStream {
    pub fn new(
        raw: Box<dyn CiphertextDirStream>,
        dir_id: DirId,
        base: CryptoPath,
        names: Arc<dyn NameCryptor>,
        long_names: Arc<dyn LongNameStore>,
        filter: EntryFilter,
        on_close: Option<CloseCallback>,
    ) -> Self {
        Self {
            raw: Some(raw),
            on_close,
            dir_id,
            base,
            names,
            long_names,
            filter,
            iterated: false,
            closed: false,
        }
    }

    /// The directory being listed.
    pub fn base(&self) -> &CryptoPath {
        &self.base
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The single iterator view of this stream.
    ///
    /// Fails with `IllegalState` when called a second time or after close.
    pub fn iter(&mut self) -> Result<Entries<'_>, FsError> {
        if self.closed {
            return Err(FsError::IllegalState("directory stream is closed"));
        }
        if self.iterated {
            return Err(FsError::IllegalState("iterator already obtained"));
        }
        self.iterated = true;
        Ok(Entries {
            stream: self,
            peeked: None,
        })
    }

    /// Translate one physical name into a cleartext entry or a skip.
    pub fn translate(&self, physical: &str) -> Translation {
        let ciphertext = if is_shortened(physical) {
            match self.long_names.inflate(physical) {
                Ok(inflated) => Cow::Owned(inflated),
                Err(e) => {
                    debug!(encrypted_name = %physical, error = %e, "Skipping entry with unreadable long name");
                    return Translation::Skip(SkipReason::Inflate);
                }
            }
        } else {
            Cow::Borrowed(physical)
        };

        let cleartext = match self.names.decrypt(&ciphertext, &self.dir_id) {
            Ok(name) => name,
            Err(e) => {
                trace!(encrypted_name = %physical, error = %e, "Skipping non-ciphertext entry");
                return Translation::Skip(SkipReason::Decrypt);
            }
        };
        if cleartext.is_empty() || cleartext == "." || cleartext == ".." || cleartext.contains('/')
        {
            warn!(encrypted_name = %physical, "Entry decrypts to an invalid name");
            return Translation::Skip(SkipReason::InvalidName);
        }

        let candidate = self.base.resolve(&cleartext);
        if (self.filter)(&candidate) {
            Translation::Entry(candidate)
        } else {
            Translation::Skip(SkipReason::Filtered)
        }
    }

    fn advance(&mut self) -> Option<Result<CryptoPath, FsError>> {
        loop {
            let physical = match self.raw.as_mut()?.next()? {
                Ok(name) => name,
                Err(e) => return Some(Err(FsError::io(e, &self.base))),
            };
            match self.translate(&physical) {
                Translation::Entry(path) => return Some(Ok(path)),
                Translation::Skip(reason) => {
                    trace!(encrypted_name = %physical, ?reason, "Entry skipped");
                }
            }
        }
    }

    /// Close the physical handle, then run the close callback.
    ///
    /// Both steps always run. Later calls do nothing.
    pub fn close(&mut self) -> Result<(), FsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut steps = Vec::with_capacity(2);
        if let Some(mut raw) = self.raw.take() {
            steps.push(CleanupStep::new("directory handle", move || raw.close()));
        }
        if let Some(callback) = self.on_close.take() {
            steps.push(CleanupStep::new("close callback", callback));
        }
        cleanup::run_all(steps)?;
        trace!(path = %self.base, "Directory stream closed");
        Ok(())
    }
}

impl Drop for CryptoDirectoryStream {
    fn drop(&mut self) {
        if !self.closed
            && let Err(e) = self.close()
        {
            warn!(path = %self.base, error = %e, "Failed to close directory stream on drop");
        }
    }
}

/// Iterator view over a [`CryptoDirectoryStream`].
///
/// Yields nothing once the stream is closed.
pub struct Entries<'a> {
    stream: &'a mut CryptoDirectoryStream,
    peeked: Option<Result<CryptoPath, FsError>>,
}

impl Entries<'_> {
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.stream.advance();
        }
        self.peeked.is_some()
    }

    /// Next entry, or `NoSuchElement` when exhausted.
    pub fn next_path(&mut self) -> Result<CryptoPath, FsError> {
        self.next().unwrap_or(Err(FsError::NoSuchElement))
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<CryptoPath, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.peeked.take() {
            Some(entry) => Some(entry),
            None => self.stream.advance(),
        }
    }
}
