//! Async positional channel over a synchronous [`FileChannel`].
//!
//! Each operation runs on the bound runtime's blocking pool while holding the
//! channel mutex, so overlapping operations never interleave on the
//! underlying channel.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{instrument, trace};

use crate::error::FsError;
use crate::fs::channel::FileChannel;

type SharedChannel = Arc<Mutex<Box<dyn FileChannel>>>;

/// Async facade over one synchronous channel.
pub struct AsyncDelegatingFileChannel {
    channel: SharedChannel,
    executor: Handle,
    open: Arc<AtomicBool>,
}

impl std::fmt::Debug for AsyncDelegatingFileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDelegatingFileChannel")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl AsyncDelegatingFileChannel {
    pub fn new(channel: Box<dyn FileChannel>, executor: Handle) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
            executor,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn submit<T, F>(&self, op: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn FileChannel) -> io::Result<T> + Send + 'static,
    {
        if !self.is_open() {
            return Err(FsError::ClosedChannel.into());
        }
        let channel = Arc::clone(&self.channel);
        self.executor
            .spawn_blocking(move || {
                let mut guard = channel.lock();
                op(&mut **guard)
            })
            .await
            .map_err(|e| io::Error::other(format!("channel task failed: {e}")))?
    }

    /// Read up to `len` bytes at `position`. Returns fewer at end of file.
    #[instrument(level = "trace", skip(self))]
    pub async fn read_at(&self, len: usize, position: u64) -> io::Result<Vec<u8>> {
        self.submit(move |channel| {
            let mut buf = vec![0u8; len];
            let n = channel.read_at(&mut buf, position)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
    }

    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    pub async fn write_at(&self, data: Vec<u8>, position: u64) -> io::Result<usize> {
        self.submit(move |channel| channel.write_at(&data, position))
            .await
    }

    pub async fn size(&self) -> io::Result<u64> {
        self.submit(|channel| channel.size()).await
    }

    pub async fn truncate(&self, size: u64) -> io::Result<()> {
        self.submit(move |channel| channel.truncate(size)).await
    }

    pub async fn force(&self) -> io::Result<()> {
        self.submit(|channel| channel.force()).await
    }

    /// Close the underlying channel once queued operations finish.
    ///
    /// Operations submitted after this call fail with `ClosedChannel`.
    pub async fn close(&self) -> io::Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let channel = Arc::clone(&self.channel);
        self.executor
            .spawn_blocking(move || channel.lock().close())
            .await
            .map_err(|e| io::Error::other(format!("channel task failed: {e}")))??;
        trace!("Async channel closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};

    /// In-memory channel that flags overlapping access.
    #[derive(Default)]
    struct MemChannel {
        data: Vec<u8>,
        pos: u64,
        busy: Arc<AtomicBool>,
        open: bool,
    }

    impl MemChannel {
        fn enter(&self) -> io::Result<()> {
            if self.busy.swap(true, Ordering::SeqCst) {
                return Err(io::Error::other("overlapping access"));
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
            self.busy.store(false, Ordering::SeqCst);
            if self.open { Ok(()) } else { Err(FsError::ClosedChannel.into()) }
        }
    }

    impl Read for MemChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.read_at(buf, self.pos)?;
            self.pos += n as u64;
            Ok(n)
        }
    }

    impl Write for MemChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.write_at(buf, self.pos)?;
            self.pos += n as u64;
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for MemChannel {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            if let SeekFrom::Start(p) = pos {
                self.pos = p;
            }
            Ok(self.pos)
        }
    }

    impl FileChannel for MemChannel {
        fn read_at(&mut self, buf: &mut [u8], pos: u64) -> io::Result<usize> {
            self.enter()?;
            let start = (pos as usize).min(self.data.len());
            let n = buf.len().min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }
        fn write_at(&mut self, buf: &[u8], pos: u64) -> io::Result<usize> {
            self.enter()?;
            let end = pos as usize + buf.len();
            if self.data.len() < end {
                self.data.resize(end, 0);
            }
            self.data[pos as usize..end].copy_from_slice(buf);
            Ok(buf.len())
        }
        fn size(&self) -> io::Result<u64> {
            self.enter()?;
            Ok(self.data.len() as u64)
        }
        fn truncate(&mut self, size: u64) -> io::Result<()> {
            self.enter()?;
            self.data.truncate(size as usize);
            Ok(())
        }
        fn force(&mut self) -> io::Result<()> {
            self.enter()
        }
        fn close(&mut self) -> io::Result<()> {
            self.open = false;
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn channel() -> AsyncDelegatingFileChannel {
        let mem = MemChannel {
            open: true,
            ..MemChannel::default()
        };
        AsyncDelegatingFileChannel::new(Box::new(mem), Handle::current())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_are_serialized() {
        let channel = Arc::new(channel());
        let tasks: Vec<_> = (0..16u8)
            .map(|i| {
                let channel = Arc::clone(&channel);
                tokio::spawn(async move { channel.write_at(vec![i; 8], u64::from(i) * 8).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 8);
        }

        let data = channel.read_at(128, 0).await.unwrap();
        for (i, block) in data.chunks(8).enumerate() {
            assert!(block.iter().all(|&b| usize::from(b) == i));
        }
        assert_eq!(channel.size().await.unwrap(), 128);
    }

    #[tokio::test]
    async fn test_truncate_and_force() {
        let channel = channel();
        channel.write_at(b"hello world".to_vec(), 0).await.unwrap();
        channel.truncate(5).await.unwrap();
        channel.force().await.unwrap();
        assert_eq!(channel.read_at(64, 0).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let channel = channel();
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(!channel.is_open());

        let err = channel.size().await.unwrap_err();
        let inner = err.into_inner().unwrap();
        assert!(matches!(
            inner.downcast_ref::<FsError>(),
            Some(FsError::ClosedChannel)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_waits_for_in_flight_writes() {
        let channel = Arc::new(channel());
        let writer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.write_at(vec![1; 4], 0).await })
        };
        tokio::task::yield_now().await;
        channel.close().await.unwrap();

        // Either the write landed before close or it was rejected cleanly
        match writer.await.unwrap() {
            Ok(n) => assert_eq!(n, 4),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::Other),
        }
    }
}
